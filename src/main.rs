use relayflow::config::Config;
use relayflow::feed;
use relayflow::router::{
    start_relay_ingestion, DiscordRestSink, MappingStore, RoutingEngine, SqliteMappingStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Initialize logger on stderr so a piped stdin feed stays clean
    let mut builder = if std::env::var("RUST_LOG").is_ok() {
        env_logger::Builder::from_default_env()
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
    };
    builder.target(env_logger::Target::Stderr).init();

    let config = Config::from_env();

    log::info!("🚀 Starting relayflow...");
    log::info!("📊 Configuration:");
    log::info!("   DB path: {}", config.db_path);
    log::info!("   VIP signals channel: {}", config.vip_signals_channel_id);
    log::info!("   VIP analysis channel: {}", config.vip_analysis_channel_id);
    log::info!("   Free channel: {}", config.free_channel_id);
    log::info!("   Sampling: 1 in {}", config.sampling_denominator);

    let store = Arc::new(SqliteMappingStore::open(&config.db_path)?);

    // The counter lives in the database; after a restart the next signal
    // continues from whatever was persisted
    let resume_from = store.max_signal_number().await?;
    if resume_from > 0 {
        log::info!("🔄 Resuming signal numbering after #{}", resume_from);
    }

    let sink = Arc::new(DiscordRestSink::new(config.discord_token.clone())?);
    let engine = Arc::new(RoutingEngine::new(store, sink, config.routing()));

    let (tx, rx) = mpsc::channel(config.channel_buffer);

    let feed_handle = match config.feed_path.clone() {
        Some(path) => {
            log::info!("📡 Feed source: tailing {}", path);
            tokio::spawn(async move { feed::run_tail_feed(PathBuf::from(path), tx).await })
        }
        None => {
            log::info!("📡 Feed source: stdin");
            tokio::spawn(async move { feed::run_stdin_feed(tx).await })
        }
    };

    log::info!("✅ Relay configured, entering ingestion loop");
    start_relay_ingestion(rx, engine, config.stats_interval()).await;

    match feed_handle.await {
        Ok(Ok(())) => log::info!("✅ Feed finished cleanly"),
        Ok(Err(e)) => log::error!("❌ Feed error: {}", e),
        Err(e) => log::error!("❌ Feed task panicked: {}", e),
    }

    Ok(())
}
