//! Relay ingestion loop
//!
//! Pulls inbound messages off an mpsc channel and routes them through the
//! engine on a fixed pool of shard workers. A message's source key hashes to
//! one shard, so messages for the same key are processed strictly in arrival
//! order while different keys run in parallel across shards. A periodic tick
//! logs throughput counters.

use super::engine::RoutingEngine;
use super::types::{InboundMessage, RouteOutcome};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Shard worker count; same-key messages always land on the same shard
const ROUTING_SHARDS: usize = 16;

/// Queue depth per shard before the feed loop backs off
const SHARD_QUEUE_DEPTH: usize = 64;

fn shard_for(source_key: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    source_key.hash(&mut hasher);
    (hasher.finish() as usize) % ROUTING_SHARDS
}

/// Running counters for the ingestion loop
#[derive(Debug, Default)]
pub struct RelayStats {
    pub received: AtomicU64,
    pub created: AtomicU64,
    pub updated: AtomicU64,
    pub unchanged: AtomicU64,
    pub skipped: AtomicU64,
    pub errors: AtomicU64,
}

impl RelayStats {
    pub fn record(&self, outcome: &RouteOutcome) {
        match outcome {
            RouteOutcome::Created { .. } => self.created.fetch_add(1, Ordering::Relaxed),
            RouteOutcome::Updated { .. } => self.updated.fetch_add(1, Ordering::Relaxed),
            RouteOutcome::Unchanged => self.unchanged.fetch_add(1, Ordering::Relaxed),
            RouteOutcome::Skipped => self.skipped.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn log_summary(&self) {
        log::info!(
            "📊 Relay stats: {} received | {} created | {} updated | {} unchanged | {} skipped | {} errors",
            self.received.load(Ordering::Relaxed),
            self.created.load(Ordering::Relaxed),
            self.updated.load(Ordering::Relaxed),
            self.unchanged.load(Ordering::Relaxed),
            self.skipped.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        );
    }
}

async fn shard_worker(
    shard: usize,
    mut rx: mpsc::Receiver<InboundMessage>,
    engine: Arc<RoutingEngine>,
    stats: Arc<RelayStats>,
) {
    while let Some(message) = rx.recv().await {
        let source_key = message.source_key();
        match engine.route(&message).await {
            Ok(outcome) => stats.record(&outcome),
            Err(e) => {
                stats.errors.fetch_add(1, Ordering::Relaxed);
                log::error!("❌ Routing failed for {}: {}", source_key, e);
            }
        }
    }
    log::debug!("Shard worker {} drained", shard);
}

/// Run the relay loop until the feed channel closes
///
/// Returns after every shard worker has drained its queue, so all counters
/// are final.
///
/// # Arguments
/// * `rx` - Channel of inbound messages from the feed adapter
/// * `engine` - Routing engine shared with the shard workers
/// * `stats_interval` - How often to log the throughput summary
pub async fn start_relay_ingestion(
    mut rx: mpsc::Receiver<InboundMessage>,
    engine: Arc<RoutingEngine>,
    stats_interval: Duration,
) -> Arc<RelayStats> {
    let stats = Arc::new(RelayStats::default());
    let mut ticker = tokio::time::interval(stats_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut shard_txs = Vec::with_capacity(ROUTING_SHARDS);
    let mut workers = Vec::with_capacity(ROUTING_SHARDS);
    for shard in 0..ROUTING_SHARDS {
        let (tx, shard_rx) = mpsc::channel(SHARD_QUEUE_DEPTH);
        workers.push(tokio::spawn(shard_worker(
            shard,
            shard_rx,
            engine.clone(),
            stats.clone(),
        )));
        shard_txs.push(tx);
    }

    log::info!("🚀 Relay ingestion started ({} shards)", ROUTING_SHARDS);

    loop {
        tokio::select! {
            maybe_message = rx.recv() => {
                match maybe_message {
                    Some(message) => {
                        stats.received.fetch_add(1, Ordering::Relaxed);
                        let shard = shard_for(&message.source_key());
                        if shard_txs[shard].send(message).await.is_err() {
                            log::error!("❌ Shard worker {} gone, dropping message", shard);
                            stats.errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    None => {
                        log::info!("📪 Feed channel closed, stopping ingestion");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                stats.log_summary();
            }
        }
    }

    drop(shard_txs);
    for worker in workers {
        let _ = worker.await;
    }

    stats.log_summary();
    stats
}
