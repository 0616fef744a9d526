//! Audit records and the store interface.

use crate::error::PersistenceResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What an audit line describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Evaluator decision for a signal, keyed by signal id.
    Surebet,
    /// Heal record, keyed by signal id.
    Heal,
    /// Venue order snapshot, keyed by order id.
    Order,
    /// Venue fill, keyed by fill id.
    Fill,
    /// Account snapshot; a single live record.
    Account,
    /// Balance listing snapshot; a single live record.
    Balances,
    /// Deletes every earlier record carrying the same `order_id`.
    Tombstone,
}

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub kind: AuditKind,
    pub id: i64,
    /// Venue order the record belongs to, when known.
    #[serde(default)]
    pub order_id: Option<i64>,
    pub written_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl AuditRecord {
    pub fn new<T: Serialize>(
        kind: AuditKind,
        id: i64,
        order_id: Option<i64>,
        payload: &T,
    ) -> PersistenceResult<Self> {
        Ok(Self {
            kind,
            id,
            order_id,
            written_at: Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn tombstone(order_id: i64) -> Self {
        Self {
            kind: AuditKind::Tombstone,
            id: order_id,
            order_id: Some(order_id),
            written_at: Utc::now(),
            payload: serde_json::Value::Null,
        }
    }
}

/// Durable sink for audit records.
///
/// Owned by the dispatcher task. Calls block; the dispatcher makes them on
/// the blocking pool, never from the signal path.
pub trait AuditStore: Send {
    /// Append a record. A later record with the same kind and id supersedes it.
    fn save(&mut self, record: AuditRecord) -> PersistenceResult<()>;

    /// Remove every record linked to `order_id`.
    fn delete_by_order_id(&mut self, order_id: i64) -> PersistenceResult<()>;

    /// Latest live record of `kind` with `id`.
    fn find_by_id(&mut self, kind: AuditKind, id: i64) -> PersistenceResult<Option<AuditRecord>>;

    /// Push buffered records to durable storage.
    fn flush(&mut self) -> PersistenceResult<()> {
        Ok(())
    }
}

impl<S: AuditStore + ?Sized> AuditStore for Box<S> {
    fn save(&mut self, record: AuditRecord) -> PersistenceResult<()> {
        (**self).save(record)
    }

    fn delete_by_order_id(&mut self, order_id: i64) -> PersistenceResult<()> {
        (**self).delete_by_order_id(order_id)
    }

    fn find_by_id(&mut self, kind: AuditKind, id: i64) -> PersistenceResult<Option<AuditRecord>> {
        (**self).find_by_id(kind, id)
    }

    fn flush(&mut self) -> PersistenceResult<()> {
        (**self).flush()
    }
}

/// Replay a record sequence into its live view.
pub(crate) fn replay<I>(records: I) -> HashMap<(AuditKind, i64), AuditRecord>
where
    I: IntoIterator<Item = AuditRecord>,
{
    let mut live: HashMap<(AuditKind, i64), AuditRecord> = HashMap::new();
    for record in records {
        if record.kind == AuditKind::Tombstone {
            let dead = record.order_id;
            live.retain(|_, r| r.order_id != dead);
            continue;
        }
        live.insert((record.kind, record.id), record);
    }
    live
}

/// In-memory store for tests and runs with persistence disabled.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<AuditRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every line written so far, tombstones included.
    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }
}

impl AuditStore for MemoryStore {
    fn save(&mut self, record: AuditRecord) -> PersistenceResult<()> {
        self.records.push(record);
        Ok(())
    }

    fn delete_by_order_id(&mut self, order_id: i64) -> PersistenceResult<()> {
        self.records.push(AuditRecord::tombstone(order_id));
        Ok(())
    }

    fn find_by_id(&mut self, kind: AuditKind, id: i64) -> PersistenceResult<Option<AuditRecord>> {
        Ok(replay(self.records.iter().cloned()).remove(&(kind, id)))
    }
}
