//! relayflow — persistent message-mapping and signal-routing engine
//!
//! Core of a channel-forwarding service: inbound messages from a source
//! collaborator are classified, trading signals are numbered and sampled to a
//! secondary destination, and every routed message keeps a durable mapping to
//! the destination message ids it produced so later edits update in place.
//!
//! Module organization:
//! - `classifier` - category rules and message text utilities
//! - `config` - environment configuration
//! - `feed` - JSON-lines inbound feed adapter (stdin or tailed file)
//! - `router` - mapping store, sampler, formatting, delivery sink, engine

pub mod classifier;
pub mod config;
pub mod feed;
pub mod router;
