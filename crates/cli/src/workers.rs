//! Background workers: drain, local agent loops, heartbeat, trim.
//!
//! Each worker is a loop on a `tokio::time::interval` that exits when its
//! cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use agent_loop::LocalDispatcher;
use bus::{Clock, EventSink, NewMessage, NormalizedEvent, StoredMessage};
use serde_json::{Map, Value};
use store::{DrainOptions, MessageStore, StoreError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Event name for drained messages that did not come from an event.
pub const MESSAGE_RECEIVED: &str = "system/message.received";

/// Interval between trims of acknowledged messages.
pub const TRIM_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Where drained messages go.
#[derive(Clone)]
pub struct Outlet {
    pub intake: Arc<dyn EventSink>,
    /// When present, `agent/loop.*` events are queued on this dispatcher
    /// instead of going to the intake. [`run_local_loops`] executes them.
    pub local: Option<Arc<LocalDispatcher>>,
}

impl Outlet {
    async fn deliver(&self, event: NormalizedEvent) -> Result<(), String> {
        match &self.local {
            Some(local) if event.name.starts_with("agent/loop.") => {
                local.dispatch(event);
                Ok(())
            }
            _ => self.intake.send(event).await.map_err(|e| e.to_string()),
        }
    }
}

/// Rebuilds the event a drained message stands for.
///
/// Messages persisted from events carry the original name, body, and id in
/// their metadata. Anything else becomes `system/message.received`.
pub fn message_event(message: &StoredMessage) -> NormalizedEvent {
    let name = message
        .metadata
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or(MESSAGE_RECEIVED);
    let data = match message.metadata.get("data") {
        Some(Value::Object(data)) => data.clone(),
        _ => {
            let mut data = Map::new();
            data.insert("source".to_string(), Value::from(message.source.as_str()));
            data.insert("prompt".to_string(), Value::from(message.prompt.as_str()));
            data.insert("priority".to_string(), Value::from(message.priority.as_label()));
            data
        }
    };
    let id = message
        .metadata
        .get("eventId")
        .and_then(Value::as_str)
        .map_or_else(|| format!("bus:{}", message.id), str::to_string);
    NormalizedEvent::new(name, data, id)
}

/// Outcome of one drain pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub released: usize,
}

/// Drains up to `limit` messages and hands each to `outlet`. Delivered
/// messages are acked; failed ones are released for the next pass.
pub async fn drain_once(
    store: &MessageStore,
    outlet: &Outlet,
    limit: usize,
) -> Result<DrainReport, StoreError> {
    let mut report = DrainReport::default();
    for candidate in store.drain_by_priority(DrainOptions::with_limit(limit)).await? {
        let id = candidate.message.id.clone();
        let event = message_event(&candidate.message);
        match outlet.deliver(event).await {
            Ok(()) => {
                store.ack(&id).await?;
                report.delivered += 1;
            }
            Err(e) => {
                warn!(message_id = %id, error = %e, "Dispatch failed; releasing message");
                store.release(&id).await?;
                report.released += 1;
            }
        }
    }
    Ok(report)
}

pub async fn run_drain(
    store: MessageStore,
    outlet: Outlet,
    interval: Duration,
    limit: usize,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => match drain_once(&store, &outlet, limit).await {
                Ok(report) if report.delivered + report.released > 0 => {
                    debug!(
                        delivered = report.delivered,
                        released = report.released,
                        "Drain pass"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Drain pass failed"),
            },
            _ = shutdown.cancelled() => break,
        }
    }
    info!("Drain worker stopped");
}

/// Runs queued agent-loop events whenever the drain hands some over.
///
/// Stage commands can take minutes, so they run here rather than inside the
/// drain pass.
pub async fn run_local_loops(local: Arc<LocalDispatcher>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = local.wait_for_work() => {}
            _ = shutdown.cancelled() => break,
        }
        tokio::select! {
            result = local.run_until_quiescent() => {
                if let Err(e) = result {
                    error!(error = %e, "Local agent loop run failed");
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
    info!("Local agent loop worker stopped");
}

/// Persists one heartbeat. The key buckets by interval so a restart inside
/// the same interval does not double-beat.
pub async fn heartbeat_once(
    store: &MessageStore,
    clock: &dyn Clock,
    interval: Duration,
) -> Result<(), StoreError> {
    let interval_ms = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX).max(1);
    let bucket = clock.now_ms() / interval_ms;
    let mut message = NewMessage::new("heartbeat", "heartbeat");
    message
        .metadata
        .insert("kind".to_string(), Value::from("heartbeat"));
    message.idempotency_key = Some(format!("heartbeat:{bucket}"));
    store.persist(message).await?;
    Ok(())
}

pub async fn run_heartbeat(
    store: MessageStore,
    clock: Arc<dyn Clock>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = heartbeat_once(&store, clock.as_ref(), interval).await {
                    error!(error = %e, "Heartbeat failed");
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

pub async fn run_trim(store: MessageStore, max_age_ms: i64, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(TRIM_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = store.trim_old(max_age_ms).await {
                    error!(error = %e, "Trim failed");
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}
