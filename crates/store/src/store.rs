//! The priority message store.
//!
//! ```text
//! persist ──► classify ──► append to <prefix>:p<N>
//!                                   │
//! drain_by_priority ◄── snapshot ◄──┘
//!   wait time → promotion → sort (effective, timestamp) → exclude → claim (CAS) → limit
//!
//! ack ──► acked = true (once)          trim_old ──► drop acked older than max age
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use bus::{
    classify_priority, CandidateMessage, Clock, MessageId, NewMessage, PersistReceipt, Priority,
    StoredMessage,
};
use tracing::{debug, info};

use crate::log::{AppendOutcome, LogRecord, MessageLog};
use crate::{PromotionThresholds, StoreError};

/// Default claim lease: long enough for a dispatch, short enough that a
/// crashed consumer's messages come back.
pub const DEFAULT_CLAIM_TTL_MS: i64 = 5 * 60 * 1000;

/// Default stream key prefix.
pub const DEFAULT_STREAM_PREFIX: &str = "bus:messages";

/// Store tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Streams are named `<stream_prefix>:p0` … `<stream_prefix>:p3`.
    pub stream_prefix: String,
    pub thresholds: PromotionThresholds,
    pub claim_ttl_ms: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            stream_prefix: DEFAULT_STREAM_PREFIX.to_string(),
            thresholds: PromotionThresholds::default(),
            claim_ttl_ms: DEFAULT_CLAIM_TTL_MS,
        }
    }
}

impl StoreConfig {
    /// Stream key for one priority.
    pub fn stream_for(&self, priority: Priority) -> String {
        format!("{}:{}", self.stream_prefix, priority.as_label())
    }
}

/// Options for [`MessageStore::drain_by_priority`].
#[derive(Debug, Clone, Default)]
pub struct DrainOptions {
    /// Maximum number of messages to return. `None` returns every eligible one.
    pub limit: Option<usize>,
    /// Ids the caller already holds from an earlier drain in the same batch.
    pub exclude_ids: HashSet<MessageId>,
}

impl DrainOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn excluding(mut self, ids: impl IntoIterator<Item = MessageId>) -> Self {
        self.exclude_ids.extend(ids);
        self
    }
}

/// Priority-segmented, acknowledgement-tracking message store.
#[derive(Clone)]
pub struct MessageStore {
    log: Arc<dyn MessageLog>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
}

impl MessageStore {
    pub fn new(log: Arc<dyn MessageLog>, clock: Arc<dyn Clock>, config: StoreConfig) -> Self {
        Self { log, clock, config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Classifies and appends a message to its priority's stream.
    ///
    /// A message whose idempotency key has been seen before is not appended
    /// again; the receipt of the original is returned with `duplicate: true`.
    pub async fn persist(&self, message: NewMessage) -> Result<PersistReceipt, StoreError> {
        let priority = classify_priority(&message);
        let stored = StoredMessage {
            id: MessageId::new_random(),
            source: message.source,
            prompt: message.prompt,
            metadata: message.metadata,
            timestamp: self.clock.now_ms(),
            priority,
            acked: false,
        };
        let id = stored.id.clone();
        let stream = self.config.stream_for(priority);

        match self
            .log
            .append(&stream, stored, message.idempotency_key.as_deref())
            .await?
        {
            AppendOutcome::Appended(stream_id) => {
                info!(
                    message_id = %id,
                    priority = %priority,
                    stream_id = %stream_id,
                    "Persisted message"
                );
                Ok(PersistReceipt {
                    stream_id,
                    priority,
                    duplicate: false,
                })
            }
            AppendOutcome::Duplicate {
                stream_id,
                priority,
            } => {
                debug!(stream_id = %stream_id, "Duplicate message ignored");
                Ok(PersistReceipt {
                    stream_id,
                    priority,
                    duplicate: true,
                })
            }
        }
    }

    /// Claims and returns the next messages to dispatch, most urgent first.
    ///
    /// Each returned message has been claimed through the log's atomic
    /// compare-and-set, so concurrent drains never return the same message.
    /// A message lost to a concurrent claim is skipped, not retried.
    pub async fn drain_by_priority(
        &self,
        options: DrainOptions,
    ) -> Result<Vec<CandidateMessage>, StoreError> {
        let now = self.clock.now_ms();
        let limit = options.limit.unwrap_or(usize::MAX);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut ranked: Vec<(CandidateMessage, u64)> = self
            .log
            .snapshot()
            .await?
            .into_iter()
            .filter(|r| r.is_claimable(now) && !options.exclude_ids.contains(&r.message.id))
            .map(|r| (self.annotate(r.message, now), r.sequence))
            .collect();
        ranked.sort_by_key(|(c, sequence)| (c.effective_priority, c.message.timestamp, *sequence));

        let mut drained = Vec::new();
        for (candidate, _) in ranked {
            if drained.len() >= limit {
                break;
            }
            if self
                .log
                .try_claim(&candidate.message.id, now, self.config.claim_ttl_ms)
                .await?
            {
                if let Some(from) = candidate.promoted_from {
                    debug!(
                        message_id = %candidate.message.id,
                        from = %from,
                        to = %candidate.effective_priority,
                        wait_time_ms = candidate.wait_time_ms,
                        "Promoted starving message"
                    );
                }
                drained.push(candidate);
            }
        }
        Ok(drained)
    }

    fn annotate(&self, message: StoredMessage, now: i64) -> CandidateMessage {
        let wait_time_ms = now.saturating_sub(message.timestamp).max(0);
        let (effective_priority, promoted_from) =
            self.config.thresholds.apply(message.priority, wait_time_ms);
        CandidateMessage {
            message,
            wait_time_ms,
            effective_priority,
            promoted_from,
        }
    }

    /// Acknowledges a message. Unknown and already-acked ids are a no-op;
    /// the return value says whether this call changed anything.
    pub async fn ack(&self, id: &MessageId) -> Result<bool, StoreError> {
        let changed = self.log.mark_acked(id).await?;
        if changed {
            debug!(message_id = %id, "Acked message");
        }
        Ok(changed)
    }

    /// Returns a claimed message to the pool so the next drain can pick it up.
    pub async fn release(&self, id: &MessageId) -> Result<bool, StoreError> {
        self.log.release(id).await
    }

    /// Removes acknowledged messages older than `max_age_ms`. Unacknowledged
    /// messages are kept regardless of age.
    pub async fn trim_old(&self, max_age_ms: i64) -> Result<usize, StoreError> {
        let cutoff = self.clock.now_ms().saturating_sub(max_age_ms);
        let removed = self.log.remove_acked_before(cutoff).await?;
        if removed > 0 {
            info!(removed, max_age_ms, "Trimmed acknowledged messages");
        }
        Ok(removed)
    }

    /// Every unacknowledged message in arrival order, claimed or not.
    pub async fn get_unacked(&self) -> Result<Vec<StoredMessage>, StoreError> {
        let mut records: Vec<LogRecord> = self
            .log
            .snapshot()
            .await?
            .into_iter()
            .filter(|r| !r.message.acked)
            .collect();
        records.sort_by_key(|r| (r.message.timestamp, r.sequence));
        Ok(records.into_iter().map(|r| r.message).collect())
    }
}

/// Buckets messages by stored priority, keeping their relative order within
/// each bucket. All four buckets are present, possibly empty.
pub fn index_messages_by_priority(
    messages: &[StoredMessage],
) -> BTreeMap<Priority, Vec<StoredMessage>> {
    let mut index: BTreeMap<Priority, Vec<StoredMessage>> =
        Priority::ALL.into_iter().map(|p| (p, Vec::new())).collect();
    for message in messages {
        index.entry(message.priority).or_default().push(message.clone());
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::InMemoryLog;
    use async_trait::async_trait;
    use bus::ManualClock;
    use serde_json::json;

    const T0: i64 = 1_700_000_000_000;

    struct Fixture {
        log: Arc<InMemoryLog>,
        clock: Arc<ManualClock>,
        store: MessageStore,
    }

    fn fixture() -> Fixture {
        let log = Arc::new(InMemoryLog::new());
        let clock = Arc::new(ManualClock::at(T0));
        let store = MessageStore::new(log.clone(), clock.clone(), StoreConfig::default());
        Fixture { log, clock, store }
    }

    fn ids(candidates: &[CandidateMessage]) -> Vec<MessageId> {
        candidates.iter().map(|c| c.message.id.clone()).collect()
    }

    // ========================================================================
    // persist
    // ========================================================================

    #[tokio::test]
    async fn persist_routes_each_priority_to_its_own_stream() {
        let f = fixture();
        let receipts = [
            f.store.persist(NewMessage::new("telegram", "/stop")).await.unwrap(),
            f.store.persist(NewMessage::new("telegram", "hi")).await.unwrap(),
            f.store.persist(NewMessage::new("heartbeat", "tick")).await.unwrap(),
            f.store.persist(NewMessage::new("github", "ci done")).await.unwrap(),
        ];
        let priorities: Vec<_> = receipts.iter().map(|r| r.priority).collect();
        assert_eq!(priorities, Priority::ALL.to_vec());
        for priority in Priority::ALL {
            assert_eq!(f.log.stream_len(&format!("bus:messages:{}", priority.as_label())), 1);
        }
    }

    #[tokio::test]
    async fn replayed_idempotency_key_is_not_enqueued_twice() {
        let f = fixture();
        let mut message = NewMessage::new("github", "github/workflow_run.completed");
        message.idempotency_key = Some("github:d-1:workflow_run:7".to_string());

        let first = f.store.persist(message.clone()).await.unwrap();
        let second = f.store.persist(message).await.unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.stream_id, second.stream_id);
        assert_eq!(f.store.get_unacked().await.unwrap().len(), 1);
    }

    struct BrokenLog;

    #[async_trait]
    impl MessageLog for BrokenLog {
        async fn append(
            &self,
            _: &str,
            _: StoredMessage,
            _: Option<&str>,
        ) -> Result<AppendOutcome, StoreError> {
            Err(StoreError::Backend {
                message: "disk full".to_string(),
            })
        }
        async fn snapshot(&self) -> Result<Vec<LogRecord>, StoreError> {
            Err(StoreError::Backend {
                message: "connection reset".to_string(),
            })
        }
        async fn try_claim(&self, _: &MessageId, _: i64, _: i64) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn release(&self, _: &MessageId) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn mark_acked(&self, _: &MessageId) -> Result<bool, StoreError> {
            Err(StoreError::Poisoned)
        }
        async fn remove_acked_before(&self, _: i64) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn storage_failures_propagate_unchanged() {
        let store = MessageStore::new(
            Arc::new(BrokenLog),
            Arc::new(ManualClock::at(T0)),
            StoreConfig::default(),
        );
        let err = store.persist(NewMessage::new("x", "y")).await.unwrap_err();
        assert_eq!(err.to_string(), "message log failure: disk full");
        assert!(store.drain_by_priority(DrainOptions::default()).await.is_err());
        assert!(matches!(
            store.ack(&MessageId::new("m").unwrap()).await,
            Err(StoreError::Poisoned)
        ));
    }

    // ========================================================================
    // drain_by_priority
    // ========================================================================

    #[tokio::test]
    async fn drain_orders_by_priority_then_arrival() {
        let f = fixture();
        f.store.persist(NewMessage::new("github", "background 1")).await.unwrap();
        f.clock.advance(1);
        f.store.persist(NewMessage::new("heartbeat", "tick")).await.unwrap();
        f.clock.advance(1);
        f.store.persist(NewMessage::new("github", "background 2")).await.unwrap();
        f.clock.advance(1);
        f.store.persist(NewMessage::new("telegram", "/stop")).await.unwrap();

        let drained = f.store.drain_by_priority(DrainOptions::default()).await.unwrap();
        let prompts: Vec<_> = drained.iter().map(|c| c.message.prompt.as_str()).collect();
        assert_eq!(prompts, ["/stop", "tick", "background 1", "background 2"]);
        assert_eq!(drained[2].wait_time_ms, 3);
    }

    #[tokio::test]
    async fn drain_respects_limit() {
        let f = fixture();
        for i in 0..5 {
            f.store.persist(NewMessage::new("github", format!("m{i}"))).await.unwrap();
        }
        let drained = f.store.drain_by_priority(DrainOptions::with_limit(2)).await.unwrap();
        assert_eq!(drained.len(), 2);
        assert!(f.store.drain_by_priority(DrainOptions::with_limit(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn drain_never_returns_acked_messages() {
        let f = fixture();
        let a = f.store.persist(NewMessage::new("github", "a")).await.unwrap();
        f.store.persist(NewMessage::new("github", "b")).await.unwrap();
        let unacked = f.store.get_unacked().await.unwrap();
        let first = unacked.iter().find(|m| m.prompt == "a").unwrap().id.clone();
        f.store.ack(&first).await.unwrap();

        let drained = f.store.drain_by_priority(DrainOptions::default()).await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].message.prompt, "b");
        assert!(drained.iter().all(|c| !c.message.acked));
        assert_eq!(a.priority, Priority::P3);
    }

    #[tokio::test]
    async fn sequential_drains_with_exclusions_never_overlap() {
        let f = fixture();
        for i in 0..6 {
            f.store.persist(NewMessage::new("github", format!("m{i}"))).await.unwrap();
        }
        let first = f.store.drain_by_priority(DrainOptions::with_limit(3)).await.unwrap();
        // Release the claims so only the exclusion list keeps them apart.
        for id in ids(&first) {
            f.store.release(&id).await.unwrap();
        }
        let second = f
            .store
            .drain_by_priority(DrainOptions::with_limit(3).excluding(ids(&first)))
            .await
            .unwrap();

        let first: HashSet<_> = ids(&first).into_iter().collect();
        assert_eq!(second.len(), 3);
        assert!(ids(&second).iter().all(|id| !first.contains(id)));
    }

    #[tokio::test]
    async fn claimed_messages_come_back_after_the_lease() {
        let f = fixture();
        f.store.persist(NewMessage::new("github", "m")).await.unwrap();
        assert_eq!(f.store.drain_by_priority(DrainOptions::default()).await.unwrap().len(), 1);
        assert!(f.store.drain_by_priority(DrainOptions::default()).await.unwrap().is_empty());

        f.clock.advance(DEFAULT_CLAIM_TTL_MS);
        assert_eq!(f.store.drain_by_priority(DrainOptions::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_drains_never_double_dispatch() {
        let f = fixture();
        for i in 0..40 {
            f.store.persist(NewMessage::new("github", format!("m{i}"))).await.unwrap();
        }

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = f.store.clone();
            tasks.push(tokio::spawn(async move {
                store.drain_by_priority(DrainOptions::with_limit(10)).await.unwrap()
            }));
        }

        let mut seen = HashSet::new();
        for task in tasks {
            for candidate in task.await.unwrap() {
                assert!(seen.insert(candidate.message.id), "message dispatched twice");
            }
        }
        assert_eq!(seen.len(), 40);
    }

    #[tokio::test]
    async fn starving_message_is_promoted_without_changing_its_priority() {
        let f = fixture();
        f.store.persist(NewMessage::new("github", "old background")).await.unwrap();
        let threshold = f.store.config().thresholds.p3_ms;
        f.clock.advance(threshold - 1);
        f.store.persist(NewMessage::new("heartbeat", "tick")).await.unwrap();

        // One millisecond short: heartbeat (P2) still wins.
        let drained = f.store.drain_by_priority(DrainOptions::default()).await.unwrap();
        assert_eq!(drained[0].message.prompt, "tick");
        assert_eq!(drained[1].promoted_from, None);
        for id in ids(&drained) {
            f.store.release(&id).await.unwrap();
        }

        // At the threshold: background is promoted to P2 and, being older, goes first.
        f.clock.advance(1);
        let drained = f.store.drain_by_priority(DrainOptions::default()).await.unwrap();
        assert_eq!(drained[0].message.prompt, "old background");
        assert_eq!(drained[0].effective_priority, Priority::P2);
        assert_eq!(drained[0].promoted_from, Some(Priority::P3));
        assert_eq!(drained[0].message.priority, Priority::P3);
    }

    // ========================================================================
    // ack / trim / views
    // ========================================================================

    #[tokio::test]
    async fn ack_is_idempotent_and_isolated() {
        let f = fixture();
        f.store.persist(NewMessage::new("github", "a")).await.unwrap();
        f.store.persist(NewMessage::new("github", "b")).await.unwrap();
        let a = f.store.get_unacked().await.unwrap()[0].id.clone();

        assert!(f.store.ack(&a).await.unwrap());
        assert!(!f.store.ack(&a).await.unwrap());
        assert!(!f.store.ack(&MessageId::new("no-such-id").unwrap()).await.unwrap());

        let unacked = f.store.get_unacked().await.unwrap();
        assert_eq!(unacked.len(), 1);
        assert_eq!(unacked[0].prompt, "b");
    }

    #[tokio::test]
    async fn trim_removes_only_old_acked_messages() {
        let f = fixture();
        f.store.persist(NewMessage::new("github", "old acked")).await.unwrap();
        f.store.persist(NewMessage::new("github", "old unacked")).await.unwrap();
        let old = f.store.get_unacked().await.unwrap()[0].id.clone();
        f.store.ack(&old).await.unwrap();

        f.clock.advance(1_000);
        f.store.persist(NewMessage::new("github", "new")).await.unwrap();
        let new = f
            .store
            .get_unacked()
            .await
            .unwrap()
            .into_iter()
            .find(|m| m.prompt == "new")
            .unwrap()
            .id;
        f.store.ack(&new).await.unwrap();

        // Age exactly 1000 is not older than 1000.
        assert_eq!(f.store.trim_old(1_000).await.unwrap(), 0);
        assert_eq!(f.store.trim_old(999).await.unwrap(), 1);

        let remaining = f.log.snapshot().await.unwrap();
        let prompts: Vec<_> = remaining.iter().map(|r| r.message.prompt.as_str()).collect();
        assert_eq!(prompts, ["old unacked", "new"]);

        f.clock.advance(i64::from(u32::MAX));
        assert_eq!(f.store.trim_old(0).await.unwrap(), 1);
        assert_eq!(f.store.get_unacked().await.unwrap()[0].prompt, "old unacked");
    }

    #[test]
    fn index_is_stable_within_buckets() {
        let make = |prompt: &str, priority: Priority| StoredMessage {
            id: MessageId::new(prompt).unwrap(),
            source: "test".to_string(),
            prompt: prompt.to_string(),
            metadata: json!({}).as_object().cloned().unwrap(),
            timestamp: T0,
            priority,
            acked: false,
        };
        let messages = vec![
            make("c", Priority::P3),
            make("a", Priority::P1),
            make("b", Priority::P3),
            make("d", Priority::P1),
        ];
        let index = index_messages_by_priority(&messages);
        let prompts = |p: Priority| -> Vec<String> {
            index[&p].iter().map(|m| m.prompt.clone()).collect()
        };
        assert_eq!(prompts(Priority::P1), ["a", "d"]);
        assert_eq!(prompts(Priority::P3), ["c", "b"]);
        assert!(index[&Priority::P0].is_empty());
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn stream_keys_follow_prefix() {
        let config = StoreConfig {
            stream_prefix: "joelclaw:bus".to_string(),
            ..StoreConfig::default()
        };
        assert_eq!(config.stream_for(Priority::P2), "joelclaw:bus:p2");
    }
}
