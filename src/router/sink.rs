//! Outbound delivery sink trait and retry helpers
//!
//! The sink is the narrow seam to the destination chat system: create a
//! message in a channel and get its id back, or update an existing message by
//! id. Both are fallible remote calls; the engine retries them with bounded
//! backoff and treats each destination independently.

use super::error::RelayError;
use async_trait::async_trait;
use tokio::time::{sleep, Duration};

/// Result of an update-by-id call at the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Applied,
    /// The destination no longer knows the message id
    NotFound,
}

/// Destination delivery contract
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Create a message in a destination channel, returning its id
    async fn create(
        &self,
        channel_id: &str,
        body: &str,
        media: &[String],
    ) -> Result<String, RelayError>;

    /// Update a previously created message in place
    async fn update(
        &self,
        channel_id: &str,
        message_id: &str,
        body: &str,
    ) -> Result<UpdateStatus, RelayError>;
}

/// Bounded-retry policy for transient delivery failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

/// Create with retries; the delay doubles between attempts
pub async fn create_with_retry(
    sink: &dyn DeliverySink,
    channel_id: &str,
    body: &str,
    media: &[String],
    policy: RetryPolicy,
) -> Result<String, RelayError> {
    let mut delay = policy.backoff_ms;
    let mut last_error: Option<RelayError> = None;

    for attempt in 1..=policy.max_attempts.max(1) {
        match sink.create(channel_id, body, media).await {
            Ok(message_id) => return Ok(message_id),
            Err(e) => {
                log::warn!(
                    "⚠️  Create attempt {}/{} to channel {} failed: {}",
                    attempt,
                    policy.max_attempts.max(1),
                    channel_id,
                    e
                );
                last_error = Some(e);
                if attempt < policy.max_attempts {
                    sleep(Duration::from_millis(delay)).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| RelayError::DeliveryFailed {
        channel: channel_id.to_string(),
        reason: "no delivery attempts made".to_string(),
    }))
}

/// Update with retries; `NotFound` from the destination is final, not retried
pub async fn update_with_retry(
    sink: &dyn DeliverySink,
    channel_id: &str,
    message_id: &str,
    body: &str,
    policy: RetryPolicy,
) -> Result<UpdateStatus, RelayError> {
    let mut delay = policy.backoff_ms;
    let mut last_error: Option<RelayError> = None;

    for attempt in 1..=policy.max_attempts.max(1) {
        match sink.update(channel_id, message_id, body).await {
            Ok(status) => return Ok(status),
            Err(e) => {
                log::warn!(
                    "⚠️  Update attempt {}/{} for message {} in {} failed: {}",
                    attempt,
                    policy.max_attempts.max(1),
                    message_id,
                    channel_id,
                    e
                );
                last_error = Some(e);
                if attempt < policy.max_attempts {
                    sleep(Duration::from_millis(delay)).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| RelayError::DeliveryFailed {
        channel: channel_id.to_string(),
        reason: "no delivery attempts made".to_string(),
    }))
}
