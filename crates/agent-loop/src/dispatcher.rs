//! In-process dispatcher for single-node runs and tests.
//!
//! Events go into one FIFO queue. Each event is offered to every stage
//! function whose triggers match; events those functions emit are appended
//! to the same queue. Because a stage only emits after it finishes, the
//! stages of one loop run strictly in causal order.
//!
//! A loop is forgotten once its retro has run, and only the most recent
//! [`HISTORY_LIMIT`] events are kept, so a long-running dispatcher holds
//! state only for loops in flight.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bus::{EventSink, LoopId, LoopStage, LoopState, NormalizedEvent, SinkError, StageOutcome};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::{Invocation, LoopContext, LoopError, LoopFunction, StageRunner};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Number of processed events [`LocalDispatcher::history`] retains.
pub const HISTORY_LIMIT: usize = 256;

/// FIFO of events waiting to be dispatched. This is the sink every local
/// stage function emits into.
#[derive(Debug, Default)]
pub struct LocalQueue {
    pending: Mutex<VecDeque<NormalizedEvent>>,
    wake: Notify,
}

impl LocalQueue {
    fn push(&self, event: NormalizedEvent) {
        lock(&self.pending).push_back(event);
        self.wake.notify_one();
    }

    fn pop(&self) -> Option<NormalizedEvent> {
        lock(&self.pending).pop_front()
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventSink for LocalQueue {
    async fn send(&self, event: NormalizedEvent) -> Result<(), SinkError> {
        self.push(event);
        Ok(())
    }
}

/// Runs the seven stage functions against a local queue.
pub struct LocalDispatcher {
    queue: Arc<LocalQueue>,
    functions: Vec<LoopFunction>,
    states: Mutex<HashMap<LoopId, LoopState>>,
    history: Mutex<VecDeque<NormalizedEvent>>,
    retired: AtomicUsize,
}

impl LocalDispatcher {
    pub fn new(runner: Arc<dyn StageRunner>) -> Self {
        let queue = Arc::new(LocalQueue::default());
        let functions = LoopFunction::all(runner, queue.clone());
        Self {
            queue,
            functions,
            states: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
            retired: AtomicUsize::new(0),
        }
    }

    /// Sink that feeds this dispatcher, e.g. for emitting `agent/loop.started`.
    pub fn sink(&self) -> Arc<dyn EventSink> {
        self.queue.clone()
    }

    /// Queues `event` for the next [`run_until_quiescent`](Self::run_until_quiescent).
    pub fn dispatch(&self, event: NormalizedEvent) {
        self.queue.push(event);
    }

    /// Resolves once an event has been queued since the last wake-up.
    pub async fn wait_for_work(&self) {
        self.queue.wake.notified().await;
    }

    /// Where an in-flight loop is. `None` for loops never seen and for loops
    /// whose retro has run.
    pub fn loop_state(&self, loop_id: &LoopId) -> Option<LoopState> {
        lock(&self.states).get(loop_id).copied()
    }

    /// Loops started but not yet retrospected.
    pub fn active_loops(&self) -> usize {
        lock(&self.states).len()
    }

    /// Loops that reached retro since this dispatcher was created.
    pub fn retired_loops(&self) -> usize {
        self.retired.load(Ordering::Relaxed)
    }

    /// The most recent processed events, oldest first.
    pub fn history(&self) -> Vec<NormalizedEvent> {
        lock(&self.history).iter().cloned().collect()
    }

    /// Processes queued events, including everything they cause, until the
    /// queue is empty. Returns how many events were processed.
    ///
    /// A trigger with no loop id is logged and dropped. A sink failure stops
    /// the run and is returned.
    pub async fn run_until_quiescent(&self) -> Result<usize, LoopError> {
        let mut processed = 0;
        while let Some(event) = self.queue.pop() {
            processed += 1;
            self.process(event).await?;
        }
        debug!(processed, "Local dispatcher idle");
        Ok(processed)
    }

    async fn process(&self, event: NormalizedEvent) -> Result<(), LoopError> {
        {
            let mut history = lock(&self.history);
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        for function in self.functions.iter().filter(|f| f.accepts(&event)) {
            match function.invoke(&event).await {
                Ok(invocation) => self.record(function.stage(), &event, &invocation),
                Err(LoopError::MissingLoopId { event: name }) => {
                    warn!(
                        event = %name,
                        stage = %function.stage(),
                        "Dropping trigger without loopId"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn record(&self, stage: LoopStage, event: &NormalizedEvent, invocation: &Invocation) {
        let outcome = match invocation {
            Invocation::Succeeded { .. } => StageOutcome::Succeeded,
            Invocation::Failed(_) => StageOutcome::Failed,
            Invocation::Ignored => return,
        };
        let Some(ctx) = LoopContext::from_data(&event.data) else {
            return;
        };

        let mut states = lock(&self.states);
        let current = match stage {
            // Retro runs after the loop halted; a loop first seen at retro
            // halted somewhere this dispatcher did not observe.
            LoopStage::Retro => states.get(&ctx.loop_id).copied().unwrap_or(LoopState::Failed),
            _ => LoopState::Running(stage),
        };
        match current.advance(outcome) {
            Ok(LoopState::Retro) => {
                states.remove(&ctx.loop_id);
                self.retired.fetch_add(1, Ordering::Relaxed);
                info!(loop_id = %ctx.loop_id, "Loop retired");
            }
            Ok(next) => {
                states.insert(ctx.loop_id, next);
            }
            Err(e) => {
                warn!(loop_id = %ctx.loop_id, error = %e, "Ignoring out-of-order stage result");
            }
        }
    }
}
