//! Port traits implemented by infrastructure crates.
//!
//! This crate defines *what* is needed (emit an event, read the clock);
//! infrastructure crates define *how*.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{NormalizedEvent, SinkError, Timestamp};

// ---------------------------------------------------------------------------
// Event emission
// ---------------------------------------------------------------------------

/// Destination for emitted events: the event-intake relay in production, a
/// local dispatcher or a recorder in tests.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Hands one event to the destination.
    async fn send(&self, event: NormalizedEvent) -> Result<(), SinkError>;
}

/// Sink that keeps every event it receives, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<NormalizedEvent>>,
}

impl RecordingSink {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event received so far.
    pub fn events(&self) -> Vec<NormalizedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Returns the received events with the given name.
    pub fn named(&self, name: &str) -> Vec<NormalizedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.name == name)
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send(&self, event: NormalizedEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .map_err(|_| SinkError::Closed)?
            .push(event);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Source of the current time, injected so wait-time and age computations are
/// testable.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;

    /// Current time in epoch milliseconds.
    fn now_ms(&self) -> i64 {
        self.now().as_epoch_ms()
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at `now_ms`.
    pub fn at(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    /// Moves the clock forward by `ms`.
    pub fn advance(&self, ms: i64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Sets the clock to `now_ms`.
    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_epoch_ms(self.now_ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[tokio::test]
    async fn recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        sink.send(NormalizedEvent::new("a", Map::new(), "1"))
            .await
            .unwrap();
        sink.send(NormalizedEvent::new("b", Map::new(), "2"))
            .await
            .unwrap();

        let names: Vec<_> = sink.events().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(sink.named("b").len(), 1);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at(1_000);
        clock.advance(250);
        assert_eq!(clock.now_ms(), 1_250);
        clock.set(5);
        assert_eq!(clock.now_ms(), 5);
    }
}
