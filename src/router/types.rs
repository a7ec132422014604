//! Core data structures for the routing engine
//!
//! All tracking rows mirror the SQLite tables in `store.rs`. A source message
//! is identified by its `source_key`, the `{channel}:{id}` pair from the
//! origin system; a later edit is a new [`InboundMessage`] sharing that key.

use crate::classifier::Category;
use chrono::{DateTime, Weekday};
use serde::{Deserialize, Serialize};

/// Message delivered by the inbound collaborator
///
/// Immutable once received. `is_edit` marks messages the source system
/// reports as edits of an earlier message with the same identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub source_message_id: String,
    pub source_channel_id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub media_refs: Vec<String>,
    #[serde(default)]
    pub is_edit: bool,
    pub timestamp: i64,
}

impl InboundMessage {
    /// Unique key for this message identity across the origin system
    pub fn source_key(&self) -> String {
        format!("{}:{}", self.source_channel_id, self.source_message_id)
    }
}

/// Which destination a delivery targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationRole {
    /// VIP destination, always delivered to
    Primary,
    /// Free destination, delivered to for sampled signals and weekly recaps
    Secondary,
}

/// Durable association between a source message and its destination messages
///
/// One row per distinct source key that has been routed at least once.
/// Destination message ids stay NULL when delivery to that destination failed,
/// so a later edit can retry that destination specifically.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageMapping {
    pub source_key: String,
    pub source_channel_id: String,
    pub category: Category,
    pub primary_channel_id: String,
    pub primary_message_id: Option<String>,
    /// Set only when dual delivery was decided at creation time
    pub secondary_channel_id: Option<String>,
    pub secondary_message_id: Option<String>,
    pub signal_number: Option<i64>,
    /// Normalized body last routed, for material-change detection
    pub last_body: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Partial update applied to an existing mapping row
///
/// `None` id fields keep the stored value (COALESCE semantics in SQL).
#[derive(Debug, Clone, Default)]
pub struct MappingUpdate {
    pub primary_message_id: Option<String>,
    pub secondary_message_id: Option<String>,
    pub last_body: Option<String>,
    pub updated_at: i64,
}

/// Tracking row for a numbered trading signal
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRecord {
    pub signal_number: i64,
    pub source_key: String,
    pub primary_message_id: Option<String>,
    pub secondary_message_id: Option<String>,
    /// Sampling decision persisted at allocation, never recomputed
    pub forwarded_to_secondary: bool,
    pub update_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Result of atomically allocating the next signal number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalAllocation {
    pub signal_number: i64,
    pub forwarded_to_secondary: bool,
}

/// Tracking row for a weekly recap message
#[derive(Debug, Clone, PartialEq)]
pub struct RecapRecord {
    pub source_key: String,
    pub vip_message_id: Option<String>,
    pub secondary_message_id: Option<String>,
    /// ISO date of the Monday starting the week the recap covers
    pub week_start: String,
    pub created_at: i64,
}

/// One formatted delivery to one destination channel
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedDelivery {
    pub role: DestinationRole,
    pub channel_id: String,
    pub body: String,
}

/// Destination set and formatted bodies computed for a new message
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryPlan {
    pub source_key: String,
    pub category: Category,
    pub signal_number: Option<i64>,
    pub deliveries: Vec<PlannedDelivery>,
}

/// What routing a message actually did
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// First routing of this source key: destinations created, mapping persisted
    Created {
        category: Category,
        signal_number: Option<i64>,
        primary_message_id: Option<String>,
        secondary_message_id: Option<String>,
    },
    /// Existing mapping refreshed (edit or retried delivery)
    Updated {
        primary_updated: bool,
        secondary_updated: bool,
    },
    /// No material change against the last routed body; nothing touched
    Unchanged,
    /// Empty message with no media; never routed
    Skipped,
}

/// Monday of the ISO week containing `timestamp`, as `YYYY-MM-DD`
pub fn week_start(timestamp: i64) -> String {
    let date = DateTime::from_timestamp(timestamp, 0)
        .unwrap_or_default()
        .date_naive();
    date.week(Weekday::Mon)
        .first_day()
        .format("%Y-%m-%d")
        .to_string()
}
