//! Routing engine - per-source-message state machine
//!
//! Drives create-or-update delivery for every inbound message:
//!
//! ```text
//! InboundMessage
//!     ↓
//! RoutingEngine::route()
//!     ↓ (no mapping)                      ↓ (mapping exists)
//! classify → allocate signal → plan    compare last body
//!     ↓                                   ↓ changed          ↓ unchanged
//! create per destination              update/retry each      no-op
//!     ↓                                destination
//! persist mapping + tracking          refresh mapping row
//! ```
//!
//! Destinations are independent: one failing never blocks the other, and a
//! failed destination leaves its mapping field NULL so the next edit retries
//! that destination specifically. Work on the same source key is serialized
//! through a keyed async mutex; different keys proceed in parallel. The only
//! global linearization point is the store-owned signal counter.

use super::error::RelayError;
use super::format::format_for;
use super::sink::{create_with_retry, update_with_retry, DeliverySink, RetryPolicy, UpdateStatus};
use super::store::MappingStore;
use super::types::{
    week_start, DeliveryPlan, DestinationRole, InboundMessage, MappingUpdate, MessageMapping,
    PlannedDelivery, RecapRecord, RouteOutcome, SignalAllocation,
};
use crate::classifier::{classify, clean_message_text, extract_signal_info, Category};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Destination channels and routing knobs consumed by the engine
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub vip_signals_channel: String,
    pub vip_analysis_channel: String,
    pub free_channel: String,
    pub sampling_denominator: u64,
    pub retry: RetryPolicy,
}

impl RoutingConfig {
    /// Category-defined primary destination channel
    pub fn primary_channel_for(&self, category: Category) -> &str {
        match category {
            Category::TradingSignal | Category::SignalUpdate | Category::WeeklyRecap => {
                &self.vip_signals_channel
            }
            _ => &self.vip_analysis_channel,
        }
    }
}

/// Routing engine over a mapping store and a delivery sink
pub struct RoutingEngine {
    store: Arc<dyn MappingStore>,
    sink: Arc<dyn DeliverySink>,
    config: RoutingConfig,

    /// Per-source-key locks; same-key work is serialized, keys run in parallel
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,

    /// Timestamp function (for testing with deterministic time)
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl RoutingEngine {
    pub fn new(
        store: Arc<dyn MappingStore>,
        sink: Arc<dyn DeliverySink>,
        config: RoutingConfig,
    ) -> Self {
        Self::new_with_timestamp_fn(store, sink, config, Box::new(|| chrono::Utc::now().timestamp()))
    }

    pub fn new_with_timestamp_fn(
        store: Arc<dyn MappingStore>,
        sink: Arc<dyn DeliverySink>,
        config: RoutingConfig,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            store,
            sink,
            config,
            key_locks: Mutex::new(HashMap::new()),
            now_fn,
        }
    }

    fn key_lock(&self, source_key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap();
        locks
            .entry(source_key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Route one inbound message through the state machine
    pub async fn route(&self, message: &InboundMessage) -> Result<RouteOutcome, RelayError> {
        let source_key = message.source_key();
        let body = clean_message_text(&message.body);

        if body.is_empty() && message.media_refs.is_empty() {
            log::debug!("Skipping empty message {}", source_key);
            return Ok(RouteOutcome::Skipped);
        }

        let lock = self.key_lock(&source_key);
        let result = {
            let _guard = lock.lock().await;
            self.route_locked(message, &source_key, &body).await
        };
        self.release_key_lock(&source_key, lock);
        result
    }

    async fn route_locked(
        &self,
        message: &InboundMessage,
        source_key: &str,
        body: &str,
    ) -> Result<RouteOutcome, RelayError> {
        match self.store.lookup(source_key).await? {
            Some(mapping) => self.route_existing(message, source_key, body, mapping).await,
            None => {
                if message.is_edit {
                    log::warn!(
                        "⚠️  Edit for unmapped source {}, routing as new message",
                        source_key
                    );
                }
                self.route_new(message, source_key, body).await
            }
        }
    }

    /// Drop our lock handle and evict the map entry once nobody waits on it
    fn release_key_lock(&self, source_key: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        let mut locks = self.key_locks.lock().unwrap();
        if let Some(entry) = locks.get(source_key) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(source_key);
            }
        }
    }

    /// Destination set and formatted bodies for a new message
    pub fn build_plan(
        &self,
        source_key: &str,
        category: Category,
        body: &str,
        allocation: Option<&SignalAllocation>,
    ) -> DeliveryPlan {
        let signal_number = allocation.map(|a| a.signal_number);
        let mut deliveries = vec![PlannedDelivery {
            role: DestinationRole::Primary,
            channel_id: self.config.primary_channel_for(category).to_string(),
            body: format_for(category, DestinationRole::Primary, body, signal_number),
        }];

        let dual = category == Category::WeeklyRecap
            || allocation.map_or(false, |a| a.forwarded_to_secondary);
        if dual {
            deliveries.push(PlannedDelivery {
                role: DestinationRole::Secondary,
                channel_id: self.config.free_channel.clone(),
                body: format_for(category, DestinationRole::Secondary, body, signal_number),
            });
        }

        DeliveryPlan {
            source_key: source_key.to_string(),
            category,
            signal_number,
            deliveries,
        }
    }

    async fn route_new(
        &self,
        message: &InboundMessage,
        source_key: &str,
        body: &str,
    ) -> Result<RouteOutcome, RelayError> {
        let now = (self.now_fn)();
        let category = classify(body, !message.media_refs.is_empty());

        let allocation = if category == Category::TradingSignal {
            // A crash between allocation and mapping insert leaves a tracking
            // row behind; replays must reuse it, number and sampling decision
            // both, instead of tripping the unique source-key constraint.
            let allocation = match self.store.signal_for_source(source_key).await? {
                Some(record) => {
                    log::warn!(
                        "⚠️  Signal #{} already allocated for {}, reusing",
                        record.signal_number,
                        source_key
                    );
                    SignalAllocation {
                        signal_number: record.signal_number,
                        forwarded_to_secondary: record.forwarded_to_secondary,
                    }
                }
                None => {
                    self.store
                        .allocate_signal(source_key, self.config.sampling_denominator, now)
                        .await?
                }
            };
            let info = extract_signal_info(body);
            log::info!(
                "📈 Signal #{} ({} {}){}",
                allocation.signal_number,
                info.action.as_deref().unwrap_or("?"),
                info.symbol.as_deref().unwrap_or("?"),
                if allocation.forwarded_to_secondary {
                    " → sampled to free channel"
                } else {
                    ""
                }
            );
            Some(allocation)
        } else {
            None
        };

        let plan = self.build_plan(source_key, category, body, allocation.as_ref());

        // Deliver to each destination independently; a failure leaves that
        // destination's id NULL for retry on the next edit.
        let mut primary_message_id: Option<String> = None;
        let mut secondary_message_id: Option<String> = None;
        for delivery in &plan.deliveries {
            match create_with_retry(
                self.sink.as_ref(),
                &delivery.channel_id,
                &delivery.body,
                &message.media_refs,
                self.config.retry,
            )
            .await
            {
                Ok(id) => match delivery.role {
                    DestinationRole::Primary => primary_message_id = Some(id),
                    DestinationRole::Secondary => secondary_message_id = Some(id),
                },
                Err(e) => {
                    log::error!(
                        "❌ Delivery to channel {} failed for {}: {}",
                        delivery.channel_id,
                        source_key,
                        e
                    );
                }
            }
        }

        let secondary_channel_id = plan
            .deliveries
            .iter()
            .find(|d| d.role == DestinationRole::Secondary)
            .map(|d| d.channel_id.clone());

        let mapping = MessageMapping {
            source_key: source_key.to_string(),
            source_channel_id: message.source_channel_id.clone(),
            category,
            primary_channel_id: self.config.primary_channel_for(category).to_string(),
            primary_message_id: primary_message_id.clone(),
            secondary_channel_id,
            secondary_message_id: secondary_message_id.clone(),
            signal_number: allocation.map(|a| a.signal_number),
            last_body: body.to_string(),
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_mapping(&mapping).await {
            Ok(()) => {}
            Err(RelayError::DuplicateKey(_)) => {
                // Replayed message raced us past the lookup; fold into update
                log::warn!("⚠️  Mapping for {} appeared during routing, updating", source_key);
                self.store
                    .update_mapping(
                        source_key,
                        &MappingUpdate {
                            primary_message_id: primary_message_id.clone(),
                            secondary_message_id: secondary_message_id.clone(),
                            last_body: Some(body.to_string()),
                            updated_at: now,
                        },
                    )
                    .await?;
            }
            Err(e) => return Err(e),
        }

        if allocation.is_some() {
            self.store
                .set_signal_destinations(
                    source_key,
                    primary_message_id.as_deref(),
                    secondary_message_id.as_deref(),
                    now,
                )
                .await?;
        }

        if category == Category::WeeklyRecap {
            let recap = RecapRecord {
                source_key: source_key.to_string(),
                vip_message_id: primary_message_id.clone(),
                secondary_message_id: secondary_message_id.clone(),
                week_start: week_start(message.timestamp),
                created_at: now,
            };
            match self.store.insert_recap(&recap).await {
                Ok(()) => {}
                Err(RelayError::DuplicateKey(_)) => {
                    log::warn!("⚠️  Recap row for {} already present", source_key);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(RouteOutcome::Created {
            category,
            signal_number: allocation.map(|a| a.signal_number),
            primary_message_id,
            secondary_message_id,
        })
    }

    async fn route_existing(
        &self,
        message: &InboundMessage,
        source_key: &str,
        body: &str,
        mapping: MessageMapping,
    ) -> Result<RouteOutcome, RelayError> {
        if body == mapping.last_body {
            log::debug!("No material change for {}, skipping", source_key);
            return Ok(RouteOutcome::Unchanged);
        }

        let now = (self.now_fn)();
        let signal_number = mapping.signal_number;

        let (primary_updated, new_primary_id) = self
            .refresh_destination(
                source_key,
                &mapping.primary_channel_id,
                mapping.primary_message_id.as_deref(),
                &format_for(mapping.category, DestinationRole::Primary, body, signal_number),
                &message.media_refs,
            )
            .await;

        // The secondary is owed only when dual delivery was decided at
        // creation; that decision is frozen in secondary_channel_id.
        let (secondary_updated, new_secondary_id) = match &mapping.secondary_channel_id {
            Some(channel) => {
                self.refresh_destination(
                    source_key,
                    channel,
                    mapping.secondary_message_id.as_deref(),
                    &format_for(mapping.category, DestinationRole::Secondary, body, signal_number),
                    &message.media_refs,
                )
                .await
            }
            None => (false, None),
        };

        self.store
            .update_mapping(
                source_key,
                &MappingUpdate {
                    primary_message_id: new_primary_id.clone(),
                    secondary_message_id: new_secondary_id.clone(),
                    last_body: Some(body.to_string()),
                    updated_at: now,
                },
            )
            .await?;

        if mapping.category == Category::TradingSignal {
            self.store.record_signal_update(source_key, now).await?;
            if new_primary_id.is_some() || new_secondary_id.is_some() {
                self.store
                    .set_signal_destinations(
                        source_key,
                        new_primary_id.as_deref(),
                        new_secondary_id.as_deref(),
                        now,
                    )
                    .await?;
            }
        }

        // Recap tracking mirrors the mapping's destination ids, so a retried
        // delivery backfills the recap row too
        if mapping.category == Category::WeeklyRecap
            && (new_primary_id.is_some() || new_secondary_id.is_some())
        {
            match self
                .store
                .set_recap_destinations(
                    source_key,
                    new_primary_id.as_deref(),
                    new_secondary_id.as_deref(),
                )
                .await
            {
                Ok(()) => {}
                Err(RelayError::NotFound(_)) => {
                    log::warn!("⚠️  No recap row to backfill for {}", source_key);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(RouteOutcome::Updated {
            primary_updated,
            secondary_updated,
        })
    }

    /// Update one destination in place, or create it if it is still owed
    ///
    /// Returns (whether the destination now reflects the body, the newly
    /// created message id if a create happened).
    async fn refresh_destination(
        &self,
        source_key: &str,
        channel_id: &str,
        existing_message_id: Option<&str>,
        formatted_body: &str,
        media: &[String],
    ) -> (bool, Option<String>) {
        match existing_message_id {
            Some(message_id) => {
                match update_with_retry(
                    self.sink.as_ref(),
                    channel_id,
                    message_id,
                    formatted_body,
                    self.config.retry,
                )
                .await
                {
                    Ok(UpdateStatus::Applied) => (true, None),
                    Ok(UpdateStatus::NotFound) => {
                        log::warn!(
                            "⚠️  Message {} gone from channel {}, recreating",
                            message_id,
                            channel_id
                        );
                        self.create_destination(source_key, channel_id, formatted_body, media)
                            .await
                    }
                    Err(e) => {
                        log::error!(
                            "❌ Update in channel {} failed for {}: {}",
                            channel_id,
                            source_key,
                            e
                        );
                        (false, None)
                    }
                }
            }
            // Delivery owed from a failed earlier attempt
            None => {
                self.create_destination(source_key, channel_id, formatted_body, media)
                    .await
            }
        }
    }

    async fn create_destination(
        &self,
        source_key: &str,
        channel_id: &str,
        formatted_body: &str,
        media: &[String],
    ) -> (bool, Option<String>) {
        match create_with_retry(
            self.sink.as_ref(),
            channel_id,
            formatted_body,
            media,
            self.config.retry,
        )
        .await
        {
            Ok(id) => (true, Some(id)),
            Err(e) => {
                log::error!(
                    "❌ Retried delivery to channel {} failed for {}: {}",
                    channel_id,
                    source_key,
                    e
                );
                (false, None)
            }
        }
    }
}
