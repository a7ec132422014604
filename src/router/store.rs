//! Durable mapping store backed by SQLite
//!
//! Three tables keyed for the hot path (lookup by source key on every edit):
//! - `message_mappings` - one row per routed source message
//! - `signal_tracking`  - one row per numbered trading signal
//! - `weekly_recap_tracking` - one row per weekly recap
//!
//! The store is the single source of truth for "has this been routed and
//! where". The signal counter lives here too: `allocate_signal` reads the
//! current maximum and inserts the tracking row inside one transaction under
//! the connection lock, so the next number is linearized across all callers
//! and survives restarts (max + 1, never reset, never reused).

use super::error::RelayError;
use super::sampler::should_sample_to_secondary;
use super::types::{
    MappingUpdate, MessageMapping, RecapRecord, SignalAllocation, SignalRecord,
};
use crate::classifier::Category;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

/// Schema applied idempotently at open (WAL mode set separately)
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS message_mappings (
    source_key           TEXT PRIMARY KEY,
    source_channel_id    TEXT NOT NULL,
    category             TEXT NOT NULL,
    primary_channel_id   TEXT NOT NULL,
    primary_message_id   TEXT,
    secondary_channel_id TEXT,
    secondary_message_id TEXT,
    signal_number        INTEGER,
    last_body            TEXT NOT NULL,
    created_at           INTEGER NOT NULL,
    updated_at           INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS signal_tracking (
    signal_number          INTEGER PRIMARY KEY,
    source_key             TEXT NOT NULL UNIQUE,
    primary_message_id     TEXT,
    secondary_message_id   TEXT,
    forwarded_to_secondary INTEGER NOT NULL DEFAULT 0,
    update_count           INTEGER NOT NULL DEFAULT 0,
    created_at             INTEGER NOT NULL,
    updated_at             INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_signal_tracking_source
    ON signal_tracking (source_key);

CREATE TABLE IF NOT EXISTS weekly_recap_tracking (
    source_key           TEXT PRIMARY KEY,
    vip_message_id       TEXT,
    secondary_message_id TEXT,
    week_start           TEXT NOT NULL,
    created_at           INTEGER NOT NULL
);
"#;

/// Persistence contract consumed by the routing engine
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Indexed lookup by source key; hot path for every inbound edit
    async fn lookup(&self, source_key: &str) -> Result<Option<MessageMapping>, RelayError>;

    /// Insert a new mapping row; `DuplicateKey` if the key was already routed
    async fn insert_mapping(&self, mapping: &MessageMapping) -> Result<(), RelayError>;

    /// Apply a partial update; `NotFound` if no mapping exists for the key
    async fn update_mapping(
        &self,
        source_key: &str,
        update: &MappingUpdate,
    ) -> Result<(), RelayError>;

    /// Atomically allocate the next signal number and persist the sampling
    /// decision for it in one transaction
    async fn allocate_signal(
        &self,
        source_key: &str,
        sampling_denominator: u64,
        now: i64,
    ) -> Result<SignalAllocation, RelayError>;

    /// Tracking row for a signal by its source key
    async fn signal_for_source(
        &self,
        source_key: &str,
    ) -> Result<Option<SignalRecord>, RelayError>;

    /// Record destination ids once delivery succeeded (NULLs keep prior values)
    async fn set_signal_destinations(
        &self,
        source_key: &str,
        primary_message_id: Option<&str>,
        secondary_message_id: Option<&str>,
        now: i64,
    ) -> Result<(), RelayError>;

    /// Bump `update_count` when an edit touches a numbered signal
    async fn record_signal_update(&self, source_key: &str, now: i64) -> Result<(), RelayError>;

    /// Insert the tracking row for a weekly recap
    async fn insert_recap(&self, recap: &RecapRecord) -> Result<(), RelayError>;

    /// Recap tracking row by source key
    async fn recap_for_source(&self, source_key: &str) -> Result<Option<RecapRecord>, RelayError>;

    /// Backfill recap destination ids after a retried delivery (NULLs keep
    /// prior values); `NotFound` if no recap row exists for the key
    async fn set_recap_destinations(
        &self,
        source_key: &str,
        vip_message_id: Option<&str>,
        secondary_message_id: Option<&str>,
    ) -> Result<(), RelayError>;

    /// Highest signal number ever assigned (0 if none)
    async fn max_signal_number(&self) -> Result<i64, RelayError>;
}

/// SQLite implementation of [`MappingStore`]
pub struct SqliteMappingStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMappingStore {
    /// Open (or create) the database, enable WAL, and apply the schema
    pub fn open(db_path: &str) -> Result<Self, RelayError> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        log::info!("📊 Mapping store opened: {}", db_path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn parse_category(raw: &str) -> Result<Category, RelayError> {
        Category::parse(raw)
            .ok_or_else(|| RelayError::InvalidMessage(format!("unknown stored category: {}", raw)))
    }
}

#[async_trait]
impl MappingStore for SqliteMappingStore {
    async fn lookup(&self, source_key: &str) -> Result<Option<MessageMapping>, RelayError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT source_key, source_channel_id, category, primary_channel_id,
                        primary_message_id, secondary_channel_id, secondary_message_id,
                        signal_number, last_body, created_at, updated_at
                 FROM message_mappings WHERE source_key = ?1",
                [source_key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Option<i64>>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, i64>(9)?,
                        row.get::<_, i64>(10)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((
                source_key,
                source_channel_id,
                category,
                primary_channel_id,
                primary_message_id,
                secondary_channel_id,
                secondary_message_id,
                signal_number,
                last_body,
                created_at,
                updated_at,
            )) => Ok(Some(MessageMapping {
                source_key,
                source_channel_id,
                category: Self::parse_category(&category)?,
                primary_channel_id,
                primary_message_id,
                secondary_channel_id,
                secondary_message_id,
                signal_number,
                last_body,
                created_at,
                updated_at,
            })),
        }
    }

    async fn insert_mapping(&self, mapping: &MessageMapping) -> Result<(), RelayError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let exists = tx
            .prepare("SELECT 1 FROM message_mappings WHERE source_key = ?1")?
            .exists([&mapping.source_key])?;
        if exists {
            return Err(RelayError::DuplicateKey(mapping.source_key.clone()));
        }

        tx.execute(
            "INSERT INTO message_mappings (
                source_key, source_channel_id, category, primary_channel_id,
                primary_message_id, secondary_channel_id, secondary_message_id,
                signal_number, last_body, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                mapping.source_key,
                mapping.source_channel_id,
                mapping.category.as_str(),
                mapping.primary_channel_id,
                mapping.primary_message_id,
                mapping.secondary_channel_id,
                mapping.secondary_message_id,
                mapping.signal_number,
                mapping.last_body,
                mapping.created_at,
                mapping.updated_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn update_mapping(
        &self,
        source_key: &str,
        update: &MappingUpdate,
    ) -> Result<(), RelayError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE message_mappings SET
                primary_message_id   = COALESCE(?2, primary_message_id),
                secondary_message_id = COALESCE(?3, secondary_message_id),
                last_body            = COALESCE(?4, last_body),
                updated_at           = ?5
             WHERE source_key = ?1",
            rusqlite::params![
                source_key,
                update.primary_message_id,
                update.secondary_message_id,
                update.last_body,
                update.updated_at,
            ],
        )?;
        if changed == 0 {
            return Err(RelayError::NotFound(source_key.to_string()));
        }
        Ok(())
    }

    async fn allocate_signal(
        &self,
        source_key: &str,
        sampling_denominator: u64,
        now: i64,
    ) -> Result<SignalAllocation, RelayError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        // Never read-modify-write the max via two separate queries: the SELECT
        // and INSERT stay inside this one transaction under the connection lock.
        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(signal_number), 0) + 1 FROM signal_tracking",
            [],
            |row| row.get(0),
        )?;
        let forwarded = should_sample_to_secondary(next, sampling_denominator);

        tx.execute(
            "INSERT INTO signal_tracking (
                signal_number, source_key, forwarded_to_secondary,
                update_count, created_at, updated_at
             ) VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            rusqlite::params![next, source_key, forwarded as i64, now],
        )?;
        tx.commit()?;

        Ok(SignalAllocation {
            signal_number: next,
            forwarded_to_secondary: forwarded,
        })
    }

    async fn signal_for_source(
        &self,
        source_key: &str,
    ) -> Result<Option<SignalRecord>, RelayError> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT signal_number, source_key, primary_message_id, secondary_message_id,
                        forwarded_to_secondary, update_count, created_at, updated_at
                 FROM signal_tracking WHERE source_key = ?1",
                [source_key],
                |row| {
                    Ok(SignalRecord {
                        signal_number: row.get(0)?,
                        source_key: row.get(1)?,
                        primary_message_id: row.get(2)?,
                        secondary_message_id: row.get(3)?,
                        forwarded_to_secondary: row.get::<_, i64>(4)? != 0,
                        update_count: row.get(5)?,
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    async fn set_signal_destinations(
        &self,
        source_key: &str,
        primary_message_id: Option<&str>,
        secondary_message_id: Option<&str>,
        now: i64,
    ) -> Result<(), RelayError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE signal_tracking SET
                primary_message_id   = COALESCE(?2, primary_message_id),
                secondary_message_id = COALESCE(?3, secondary_message_id),
                updated_at           = ?4
             WHERE source_key = ?1",
            rusqlite::params![source_key, primary_message_id, secondary_message_id, now],
        )?;
        if changed == 0 {
            return Err(RelayError::NotFound(source_key.to_string()));
        }
        Ok(())
    }

    async fn record_signal_update(&self, source_key: &str, now: i64) -> Result<(), RelayError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE signal_tracking SET
                update_count = update_count + 1,
                updated_at   = ?2
             WHERE source_key = ?1",
            rusqlite::params![source_key, now],
        )?;
        if changed == 0 {
            return Err(RelayError::NotFound(source_key.to_string()));
        }
        Ok(())
    }

    async fn insert_recap(&self, recap: &RecapRecord) -> Result<(), RelayError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let exists = tx
            .prepare("SELECT 1 FROM weekly_recap_tracking WHERE source_key = ?1")?
            .exists([&recap.source_key])?;
        if exists {
            return Err(RelayError::DuplicateKey(recap.source_key.clone()));
        }

        tx.execute(
            "INSERT INTO weekly_recap_tracking (
                source_key, vip_message_id, secondary_message_id, week_start, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                recap.source_key,
                recap.vip_message_id,
                recap.secondary_message_id,
                recap.week_start,
                recap.created_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn recap_for_source(&self, source_key: &str) -> Result<Option<RecapRecord>, RelayError> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT source_key, vip_message_id, secondary_message_id, week_start, created_at
                 FROM weekly_recap_tracking WHERE source_key = ?1",
                [source_key],
                |row| {
                    Ok(RecapRecord {
                        source_key: row.get(0)?,
                        vip_message_id: row.get(1)?,
                        secondary_message_id: row.get(2)?,
                        week_start: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    async fn set_recap_destinations(
        &self,
        source_key: &str,
        vip_message_id: Option<&str>,
        secondary_message_id: Option<&str>,
    ) -> Result<(), RelayError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE weekly_recap_tracking SET
                vip_message_id       = COALESCE(?2, vip_message_id),
                secondary_message_id = COALESCE(?3, secondary_message_id)
             WHERE source_key = ?1",
            rusqlite::params![source_key, vip_message_id, secondary_message_id],
        )?;
        if changed == 0 {
            return Err(RelayError::NotFound(source_key.to_string()));
        }
        Ok(())
    }

    async fn max_signal_number(&self) -> Result<i64, RelayError> {
        let conn = self.conn.lock().unwrap();
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(signal_number), 0) FROM signal_tracking",
            [],
            |row| row.get(0),
        )?;
        Ok(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (NamedTempFile, SqliteMappingStore) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let store = SqliteMappingStore::open(db_path).unwrap();
        (temp_file, store)
    }

    fn make_mapping(source_key: &str, now: i64) -> MessageMapping {
        MessageMapping {
            source_key: source_key.to_string(),
            source_channel_id: "src_chan".to_string(),
            category: Category::TradingSignal,
            primary_channel_id: "vip_chan".to_string(),
            primary_message_id: Some("d1".to_string()),
            secondary_channel_id: None,
            secondary_message_id: None,
            signal_number: Some(1),
            last_body: "BUY TP 1 SL 2".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup_roundtrip() {
        let (_temp, store) = create_test_store();
        let mapping = make_mapping("chan:1", 1_700_000_000);

        store.insert_mapping(&mapping).await.unwrap();

        let found = store.lookup("chan:1").await.unwrap().unwrap();
        assert_eq!(found, mapping);
        assert!(store.lookup("chan:2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_duplicate_key_rejected() {
        let (_temp, store) = create_test_store();
        let mapping = make_mapping("chan:1", 1_700_000_000);

        store.insert_mapping(&mapping).await.unwrap();
        let err = store.insert_mapping(&mapping).await.unwrap_err();
        assert!(matches!(err, RelayError::DuplicateKey(ref k) if k == "chan:1"));
    }

    #[tokio::test]
    async fn test_update_unknown_key_is_not_found() {
        let (_temp, store) = create_test_store();
        let update = MappingUpdate {
            last_body: Some("edited".to_string()),
            updated_at: 1,
            ..Default::default()
        };
        let err = store.update_mapping("missing:9", &update).await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound(ref k) if k == "missing:9"));
    }

    #[tokio::test]
    async fn test_update_coalesce_keeps_existing_ids() {
        let (_temp, store) = create_test_store();
        let now = 1_700_000_000;
        let mapping = make_mapping("chan:1", now);
        store.insert_mapping(&mapping).await.unwrap();

        // Only the body changes; the stored primary id must survive
        let update = MappingUpdate {
            primary_message_id: None,
            secondary_message_id: Some("d2".to_string()),
            last_body: Some("edited body".to_string()),
            updated_at: now + 10,
        };
        store.update_mapping("chan:1", &update).await.unwrap();

        let found = store.lookup("chan:1").await.unwrap().unwrap();
        assert_eq!(found.primary_message_id.as_deref(), Some("d1"));
        assert_eq!(found.secondary_message_id.as_deref(), Some("d2"));
        assert_eq!(found.last_body, "edited body");
        assert_eq!(found.updated_at, now + 10);
        assert_eq!(found.created_at, now);
    }

    #[tokio::test]
    async fn test_signal_numbers_monotonic_and_gapless() {
        let (_temp, store) = create_test_store();
        let now = 1_700_000_000;

        for expected in 1..=15 {
            let allocation = store
                .allocate_signal(&format!("chan:{}", expected), 10, now)
                .await
                .unwrap();
            assert_eq!(allocation.signal_number, expected);
            assert_eq!(allocation.forwarded_to_secondary, expected % 10 == 0);
        }
        assert_eq!(store.max_signal_number().await.unwrap(), 15);
    }

    #[tokio::test]
    async fn test_counter_rehydrates_after_restart() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap().to_string();
        let now = 1_700_000_000;

        {
            let store = SqliteMappingStore::open(&db_path).unwrap();
            for i in 1..=7 {
                store
                    .allocate_signal(&format!("chan:{}", i), 10, now)
                    .await
                    .unwrap();
            }
        }

        // Reopen: next number must be exactly one greater than the old max
        let store = SqliteMappingStore::open(&db_path).unwrap();
        assert_eq!(store.max_signal_number().await.unwrap(), 7);
        let allocation = store.allocate_signal("chan:next", 10, now).await.unwrap();
        assert_eq!(allocation.signal_number, 8);
    }

    #[tokio::test]
    async fn test_sampling_decision_persisted_at_allocation() {
        let (_temp, store) = create_test_store();
        let now = 1_700_000_000;

        for i in 1..=10 {
            store
                .allocate_signal(&format!("chan:{}", i), 10, now)
                .await
                .unwrap();
        }

        let ninth = store.signal_for_source("chan:9").await.unwrap().unwrap();
        assert!(!ninth.forwarded_to_secondary);
        let tenth = store.signal_for_source("chan:10").await.unwrap().unwrap();
        assert!(tenth.forwarded_to_secondary);
        assert_eq!(tenth.update_count, 0);
    }

    #[tokio::test]
    async fn test_signal_update_count_increments() {
        let (_temp, store) = create_test_store();
        let now = 1_700_000_000;
        store.allocate_signal("chan:1", 10, now).await.unwrap();

        store.record_signal_update("chan:1", now + 5).await.unwrap();
        store.record_signal_update("chan:1", now + 9).await.unwrap();

        let record = store.signal_for_source("chan:1").await.unwrap().unwrap();
        assert_eq!(record.update_count, 2);
        assert_eq!(record.updated_at, now + 9);

        let err = store.record_signal_update("missing:1", now).await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_signal_destinations_set_after_delivery() {
        let (_temp, store) = create_test_store();
        let now = 1_700_000_000;
        store.allocate_signal("chan:1", 10, now).await.unwrap();

        store
            .set_signal_destinations("chan:1", Some("p1"), None, now + 1)
            .await
            .unwrap();
        let record = store.signal_for_source("chan:1").await.unwrap().unwrap();
        assert_eq!(record.primary_message_id.as_deref(), Some("p1"));
        assert!(record.secondary_message_id.is_none());

        // A later call filling the secondary keeps the primary
        store
            .set_signal_destinations("chan:1", None, Some("s1"), now + 2)
            .await
            .unwrap();
        let record = store.signal_for_source("chan:1").await.unwrap().unwrap();
        assert_eq!(record.primary_message_id.as_deref(), Some("p1"));
        assert_eq!(record.secondary_message_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_recap_roundtrip_and_duplicate() {
        let (_temp, store) = create_test_store();
        let recap = RecapRecord {
            source_key: "chan:77".to_string(),
            vip_message_id: Some("v1".to_string()),
            secondary_message_id: Some("f1".to_string()),
            week_start: "2023-11-13".to_string(),
            created_at: 1_700_000_000,
        };

        store.insert_recap(&recap).await.unwrap();
        let found = store.recap_for_source("chan:77").await.unwrap().unwrap();
        assert_eq!(found, recap);

        let err = store.insert_recap(&recap).await.unwrap_err();
        assert!(matches!(err, RelayError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn test_recap_destinations_backfilled() {
        let (_temp, store) = create_test_store();
        let recap = RecapRecord {
            source_key: "chan:77".to_string(),
            vip_message_id: Some("v1".to_string()),
            secondary_message_id: None,
            week_start: "2023-11-13".to_string(),
            created_at: 1_700_000_000,
        };
        store.insert_recap(&recap).await.unwrap();

        // Filling the secondary keeps the stored vip id
        store
            .set_recap_destinations("chan:77", None, Some("f1"))
            .await
            .unwrap();
        let found = store.recap_for_source("chan:77").await.unwrap().unwrap();
        assert_eq!(found.vip_message_id.as_deref(), Some("v1"));
        assert_eq!(found.secondary_message_id.as_deref(), Some("f1"));

        let err = store
            .set_recap_destinations("missing:1", None, Some("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }
}
