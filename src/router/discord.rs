//! Discord REST delivery sink
//!
//! Thin adapter implementing [`DeliverySink`] against the Discord HTTP API:
//! POST to create a channel message, PATCH to edit one in place. Session
//! management, gateway connections, and media transcoding stay with the
//! collaborator layer; this client only does the two calls the engine needs,
//! behind a sliding-window rate limiter.

use super::error::RelayError;
use super::sink::{DeliverySink, UpdateStatus};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use tokio::time::{sleep, Duration, Instant};

const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Sliding-window rate limiter for destination API calls
///
/// `acquire` blocks until a slot is free inside the window; calls outside the
/// window are pruned on each check.
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    calls: tokio::sync::Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            calls: tokio::sync::Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until another call is allowed, then record it
    pub async fn acquire(&self) {
        loop {
            {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                while calls
                    .front()
                    .map_or(false, |t| now.duration_since(*t) >= self.window)
                {
                    calls.pop_front();
                }
                if calls.len() < self.max_calls {
                    calls.push_back(now);
                    return;
                }
            }
            sleep(Duration::from_millis(250)).await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    id: String,
}

/// [`DeliverySink`] over the Discord REST API
pub struct DiscordRestSink {
    client: reqwest::Client,
    token: String,
    api_base: String,
    limiter: RateLimiter,
}

impl DiscordRestSink {
    /// Build a sink against the public Discord API
    pub fn new(token: String) -> Result<Self, RelayError> {
        Self::with_api_base(token, DEFAULT_API_BASE.to_string())
    }

    /// Build a sink against a custom API base (used in tests)
    pub fn with_api_base(token: String, api_base: String) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            token,
            api_base,
            // 50 messages per minute, matching the destination's bot limits
            limiter: RateLimiter::new(50, Duration::from_secs(60)),
        })
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// Media references are appended as plain URLs; Discord unfurls them
    fn content_with_media(body: &str, media: &[String]) -> String {
        if media.is_empty() {
            return body.to_string();
        }
        let mut content = body.to_string();
        for url in media {
            content.push('\n');
            content.push_str(url);
        }
        content
    }
}

#[async_trait]
impl DeliverySink for DiscordRestSink {
    async fn create(
        &self,
        channel_id: &str,
        body: &str,
        media: &[String],
    ) -> Result<String, RelayError> {
        self.limiter.acquire().await;

        let url = format!("{}/channels/{}/messages", self.api_base, channel_id);
        let content = Self::content_with_media(body, media);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RelayError::DeliveryFailed {
                channel: channel_id.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let created: CreatedMessage = response.json().await?;
        log::debug!("✅ Created message {} in channel {}", created.id, channel_id);
        Ok(created.id)
    }

    async fn update(
        &self,
        channel_id: &str,
        message_id: &str,
        body: &str,
    ) -> Result<UpdateStatus, RelayError> {
        self.limiter.acquire().await;

        let url = format!(
            "{}/channels/{}/messages/{}",
            self.api_base, channel_id, message_id
        );
        let response = self
            .client
            .patch(&url)
            .header("Authorization", self.auth_header())
            .json(&serde_json::json!({ "content": body }))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(UpdateStatus::NotFound);
        }
        if !response.status().is_success() {
            return Err(RelayError::DeliveryFailed {
                channel: channel_id.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        log::debug!("✅ Updated message {} in channel {}", message_id, channel_id);
        Ok(UpdateStatus::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_allows_burst_under_limit() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        // All five slots fit in the window without waiting
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_blocks_over_limit() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        limiter.acquire().await;
        limiter.acquire().await;

        // Third call must wait for the window to slide
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(750));
    }

    #[test]
    fn test_content_with_media_appends_urls() {
        let content = DiscordRestSink::content_with_media(
            "chart below",
            &["https://example.com/a.png".to_string()],
        );
        assert_eq!(content, "chart below\nhttps://example.com/a.png");
        assert_eq!(DiscordRestSink::content_with_media("plain", &[]), "plain");
    }
}
