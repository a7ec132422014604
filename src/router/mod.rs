//! Message routing engine
//!
//! Everything between the inbound feed and the destination chat system:
//!
//! - `types` / `error` - core data structures and the error enum
//! - `store` - durable SQLite mapping and tracking store
//! - `sampler` - deterministic 1-in-N secondary sampling
//! - `format` - destination-specific body formatting
//! - `sink` - delivery trait, retry helpers, and the Discord REST client
//! - `engine` - the per-message create/update state machine
//! - `ingestion` - the channel-draining relay loop

pub mod discord;
pub mod engine;
pub mod error;
pub mod format;
pub mod ingestion;
pub mod sampler;
pub mod sink;
pub mod store;
pub mod types;

pub use discord::DiscordRestSink;
pub use engine::{RoutingConfig, RoutingEngine};
pub use error::RelayError;
pub use ingestion::{start_relay_ingestion, RelayStats};
pub use sink::{DeliverySink, RetryPolicy, UpdateStatus};
pub use store::{MappingStore, SqliteMappingStore};
pub use types::{InboundMessage, MessageMapping, RouteOutcome};
