use crate::router::{RetryPolicy, RoutingConfig};
use std::env;
use std::time::Duration;

/// Configuration loaded from environment variables
pub struct Config {
    pub db_path: String,
    pub discord_token: String,
    pub vip_signals_channel_id: String,
    pub vip_analysis_channel_id: String,
    pub free_channel_id: String,
    pub sampling_denominator: u64,
    pub delivery_max_attempts: u32,
    pub delivery_backoff_ms: u64,
    pub channel_buffer: usize,
    pub stats_interval_secs: u64,
    pub feed_path: Option<String>,
    pub rust_log: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// The three destination channel ids and the bot token are required.
    /// Everything else has a working default; set FEED_PATH to tail a JSONL
    /// file instead of reading stdin.
    pub fn from_env() -> Self {
        let discord_token = env::var("DISCORD_TOKEN")
            .expect("DISCORD_TOKEN must be set in .env file");
        let vip_signals_channel_id = env::var("VIP_SIGNALS_CHANNEL_ID")
            .expect("VIP_SIGNALS_CHANNEL_ID must be set in .env file");
        let vip_analysis_channel_id = env::var("VIP_ANALYSIS_CHANNEL_ID")
            .expect("VIP_ANALYSIS_CHANNEL_ID must be set in .env file");
        let free_channel_id = env::var("FREE_CHANNEL_ID")
            .expect("FREE_CHANNEL_ID must be set in .env file");

        let db_path = env::var("RELAY_DB_PATH").unwrap_or_else(|_| "relayflow.db".to_string());

        let sampling_denominator = parse_env("SAMPLING_DENOMINATOR", 10);
        let delivery_max_attempts = parse_env("DELIVERY_MAX_ATTEMPTS", 3);
        let delivery_backoff_ms = parse_env("DELIVERY_BACKOFF_MS", 500);
        let channel_buffer = parse_env("RELAY_CHANNEL_BUFFER", 1000);
        let stats_interval_secs = parse_env("STATS_INTERVAL_SECS", 60);

        let feed_path = env::var("FEED_PATH").ok();
        let rust_log = env::var("RUST_LOG").ok();

        Self {
            db_path,
            discord_token,
            vip_signals_channel_id,
            vip_analysis_channel_id,
            free_channel_id,
            sampling_denominator,
            delivery_max_attempts,
            delivery_backoff_ms,
            channel_buffer,
            stats_interval_secs,
            feed_path,
            rust_log,
        }
    }

    /// Routing-engine view of this configuration
    pub fn routing(&self) -> RoutingConfig {
        RoutingConfig {
            vip_signals_channel: self.vip_signals_channel_id.clone(),
            vip_analysis_channel: self.vip_analysis_channel_id.clone(),
            free_channel: self.free_channel_id.clone(),
            sampling_denominator: self.sampling_denominator,
            retry: RetryPolicy {
                max_attempts: self.delivery_max_attempts,
                backoff_ms: self.delivery_backoff_ms,
            },
        }
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

/// Parse an optional numeric env var, falling back on absence or garbage
fn parse_env<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("⚠️  Ignoring unparseable {}={:?}, using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}
