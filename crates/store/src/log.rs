//! Durable log port and the in-memory reference implementation.
//!
//! The store appends each message to the stream for its priority and relies on
//! the log for the two operations that must be atomic: deduplicating on an
//! idempotency key at append time, and claiming a message for dispatch.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bus::{MessageId, Priority, StoredMessage, StreamId};

use crate::StoreError;

/// A message as recorded in the log, with the bookkeeping the store needs.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub stream: String,
    pub stream_id: StreamId,
    /// Global append order, used to break timestamp ties.
    pub sequence: u64,
    pub message: StoredMessage,
    /// Epoch ms until which the current claim holds, if claimed.
    pub claimed_until: Option<i64>,
}

impl LogRecord {
    /// `true` if the record is unacked and not held by a live claim.
    pub fn is_claimable(&self, now_ms: i64) -> bool {
        !self.message.acked && self.claimed_until.map_or(true, |until| until <= now_ms)
    }
}

/// Outcome of an append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(StreamId),
    /// The idempotency key was already present; nothing was written.
    Duplicate { stream_id: StreamId, priority: Priority },
}

/// An append-only, priority-segmented message log.
///
/// Implementations must make [`try_claim`](Self::try_claim) a single atomic
/// compare-and-set: two concurrent claims of the same id must not both
/// succeed.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Appends `message` to `stream`, unless `idempotency_key` was seen before.
    async fn append(
        &self,
        stream: &str,
        message: StoredMessage,
        idempotency_key: Option<&str>,
    ) -> Result<AppendOutcome, StoreError>;

    /// Every record currently in the log.
    async fn snapshot(&self) -> Result<Vec<LogRecord>, StoreError>;

    /// Claims `id` until `now_ms + lease_ms` if it is unacked and not held by
    /// a live claim. Returns whether the claim was taken.
    async fn try_claim(&self, id: &MessageId, now_ms: i64, lease_ms: i64)
        -> Result<bool, StoreError>;

    /// Drops any claim on `id`. Returns whether a claim was held.
    async fn release(&self, id: &MessageId) -> Result<bool, StoreError>;

    /// Marks `id` acknowledged. Returns `false` for unknown or already-acked ids.
    async fn mark_acked(&self, id: &MessageId) -> Result<bool, StoreError>;

    /// Removes acknowledged records with `timestamp < cutoff_ms`. Unacked
    /// records are never removed. Returns the number removed.
    async fn remove_acked_before(&self, cutoff_ms: i64) -> Result<usize, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory log
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LogState {
    streams: BTreeMap<String, Vec<MessageId>>,
    records: HashMap<MessageId, LogRecord>,
    keys: HashMap<String, MessageId>,
    key_of: HashMap<MessageId, String>,
    next_sequence: u64,
}

/// Reference [`MessageLog`] held in process memory.
///
/// Suitable for tests and single-process deployments; contents do not survive
/// a restart.
#[derive(Debug, Default)]
pub struct InMemoryLog {
    state: Mutex<LogState>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LogState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Number of records in one stream.
    pub fn stream_len(&self, stream: &str) -> usize {
        self.lock()
            .map(|state| state.streams.get(stream).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageLog for InMemoryLog {
    async fn append(
        &self,
        stream: &str,
        message: StoredMessage,
        idempotency_key: Option<&str>,
    ) -> Result<AppendOutcome, StoreError> {
        let mut state = self.lock()?;

        if let Some(key) = idempotency_key {
            if let Some(existing) = state.keys.get(key).and_then(|id| state.records.get(id)) {
                return Ok(AppendOutcome::Duplicate {
                    stream_id: existing.stream_id.clone(),
                    priority: existing.message.priority,
                });
            }
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let stream_id = StreamId::new(format!("{}-{}", message.timestamp, sequence))
            .ok_or_else(|| StoreError::Backend {
                message: "empty stream id".to_string(),
            })?;
        let id = message.id.clone();

        if let Some(key) = idempotency_key {
            state.keys.insert(key.to_string(), id.clone());
            state.key_of.insert(id.clone(), key.to_string());
        }
        state
            .streams
            .entry(stream.to_string())
            .or_default()
            .push(id.clone());
        state.records.insert(
            id,
            LogRecord {
                stream: stream.to_string(),
                stream_id: stream_id.clone(),
                sequence,
                message,
                claimed_until: None,
            },
        );
        Ok(AppendOutcome::Appended(stream_id))
    }

    async fn snapshot(&self) -> Result<Vec<LogRecord>, StoreError> {
        let state = self.lock()?;
        let records = state
            .streams
            .values()
            .flatten()
            .filter_map(|id| state.records.get(id).cloned())
            .collect();
        Ok(records)
    }

    async fn try_claim(
        &self,
        id: &MessageId,
        now_ms: i64,
        lease_ms: i64,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.records.get_mut(id) {
            Some(record) if record.is_claimable(now_ms) => {
                record.claimed_until = Some(now_ms.saturating_add(lease_ms));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, id: &MessageId) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        Ok(state
            .records
            .get_mut(id)
            .and_then(|record| record.claimed_until.take())
            .is_some())
    }

    async fn mark_acked(&self, id: &MessageId) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.records.get_mut(id) {
            Some(record) if !record.message.acked => {
                record.message.acked = true;
                record.claimed_until = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_acked_before(&self, cutoff_ms: i64) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let doomed: Vec<MessageId> = state
            .records
            .values()
            .filter(|r| r.message.acked && r.message.timestamp < cutoff_ms)
            .map(|r| r.message.id.clone())
            .collect();

        for id in &doomed {
            state.records.remove(id);
            if let Some(key) = state.key_of.remove(id) {
                state.keys.remove(&key);
            }
        }
        for ids in state.streams.values_mut() {
            ids.retain(|id| !doomed.contains(id));
        }
        Ok(doomed.len())
    }
}
