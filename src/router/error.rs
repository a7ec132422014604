//! Error types for the routing core
//!
//! Every failure is scoped to the single message being processed; no variant
//! is allowed to take the process down. `DuplicateKey` and `NotFound` are the
//! store's insert/update contract errors and are converted between the
//! create and update paths by the engine rather than surfaced to operators.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// A mapping for this source message id has already been inserted
    #[error("mapping already exists for source message {0}")]
    DuplicateKey(String),

    /// No mapping exists for this source message id
    #[error("no mapping found for source message {0}")]
    NotFound(String),

    /// A destination call failed after bounded retries
    #[error("delivery to channel {channel} failed: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    /// Durable-store write or read error
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// Transport-level error from the outbound HTTP client
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Inbound message or stored row failed validation
    #[error("invalid message data: {0}")]
    InvalidMessage(String),
}
