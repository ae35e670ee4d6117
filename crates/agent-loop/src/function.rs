//! Stage functions: one per [`LoopStage`], each wrapped in the uniform
//! failure handler.

use std::sync::Arc;

use bus::{EventSink, LoopFunctionFailure, LoopStage, NormalizedEvent, LOOP_FUNCTION_FAILED};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{create_loop_on_failure, LoopContext, LoopError, LoopOnFailure, StageRunner};

/// What one invocation of a stage function did.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// The stage ran and emitted its success event (`None` for `retro`).
    Succeeded { emitted: Option<NormalizedEvent> },
    /// The stage failed and the failure handler reported it.
    Failed(LoopFunctionFailure),
    /// The event is not one this function acts on.
    Ignored,
}

/// A stage function as the dispatcher sees it.
#[derive(Clone)]
pub struct LoopFunction {
    stage: LoopStage,
    runner: Arc<dyn StageRunner>,
    sink: Arc<dyn EventSink>,
    on_failure: LoopOnFailure,
}

impl LoopFunction {
    /// The only way to build a stage function. The failure handler is always
    /// attached, under the stage's own name.
    pub fn new(stage: LoopStage, runner: Arc<dyn StageRunner>, sink: Arc<dyn EventSink>) -> Self {
        let on_failure = create_loop_on_failure(stage.name(), sink.clone());
        Self {
            stage,
            runner,
            sink,
            on_failure,
        }
    }

    /// All seven stage functions sharing one runner and one sink.
    pub fn all(runner: Arc<dyn StageRunner>, sink: Arc<dyn EventSink>) -> Vec<LoopFunction> {
        LoopStage::ALL
            .into_iter()
            .map(|stage| LoopFunction::new(stage, runner.clone(), sink.clone()))
            .collect()
    }

    pub fn stage(&self) -> LoopStage {
        self.stage
    }

    pub fn on_failure(&self) -> &LoopOnFailure {
        &self.on_failure
    }

    /// `true` if this function runs on `event`.
    ///
    /// `retro` skips failure reports about itself, otherwise a failing retro
    /// would trigger another retro.
    pub fn accepts(&self, event: &NormalizedEvent) -> bool {
        if !self.stage.triggers().iter().any(|t| *t == event.name) {
            return false;
        }
        !(self.stage == LoopStage::Retro
            && event.name == LOOP_FUNCTION_FAILED
            && event.data_str("functionName") == Some(LoopStage::Retro.name()))
    }

    /// Runs the stage for `event`.
    ///
    /// A stage error never escapes as `Err`: it is routed through the failure
    /// handler and reported as [`Invocation::Failed`]. `Err` is reserved for
    /// triggers without a loop id and for sink failures, which belong to the
    /// dispatcher.
    pub async fn invoke(&self, event: &NormalizedEvent) -> Result<Invocation, LoopError> {
        if !self.accepts(event) {
            return Ok(Invocation::Ignored);
        }
        let ctx = LoopContext::from_data(&event.data).ok_or_else(|| LoopError::MissingLoopId {
            event: event.name.clone(),
        })?;

        debug!(
            stage = %self.stage,
            loop_id = %ctx.loop_id,
            trigger = %event.name,
            "Running stage"
        );
        let output = match self.runner.run(self.stage, &event.data).await {
            Ok(output) => output,
            Err(err) => {
                let failure = self.on_failure.handle_trigger(&err, event).await?;
                return Ok(Invocation::Failed(failure));
            }
        };

        let Some(next) = self.stage.success_event() else {
            info!(stage = %self.stage, loop_id = %ctx.loop_id, "Loop finished");
            return Ok(Invocation::Succeeded { emitted: None });
        };

        // Keyed by the trigger so a re-run of the stage emits a new event.
        let key = format!("{}:{}", event.idempotency_key, self.stage);
        let emitted = NormalizedEvent::new(next, ctx.stamp(output), key);
        self.sink.send(emitted.clone()).await?;
        info!(
            stage = %self.stage,
            loop_id = %ctx.loop_id,
            next = %emitted.name,
            "Stage succeeded"
        );
        Ok(Invocation::Succeeded {
            emitted: Some(emitted),
        })
    }
}

/// Reads the stage that failed from an `agent/loop.function.failed` event.
pub fn failed_stage(event: &NormalizedEvent) -> Option<LoopStage> {
    if event.name != LOOP_FUNCTION_FAILED {
        return None;
    }
    let stage = event.data_str("functionName").and_then(LoopStage::from_name);
    if stage.is_none() {
        warn!(data = %serde_json::Value::Object(event.data.clone()), "Failure event names no known stage");
    }
    stage
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bus::{RecordingSink, StageError, LOOP_COMPLETED, LOOP_STARTED};
    use serde_json::{json, Map};

    /// Echoes `{"<stage>": "done"}`, or fails at the configured stage.
    struct Scripted {
        fail_at: Option<LoopStage>,
    }

    #[async_trait]
    impl StageRunner for Scripted {
        async fn run(
            &self,
            stage: LoopStage,
            _input: &Map<String, Value>,
        ) -> Result<Map<String, Value>, StageError> {
            if self.fail_at == Some(stage) {
                return Err(StageError::new(format!("{stage} broke")));
            }
            let mut out = Map::new();
            out.insert(stage.name().to_string(), Value::from("done"));
            Ok(out)
        }
    }

    fn event(name: &str, data: Value) -> NormalizedEvent {
        NormalizedEvent::new(name, data.as_object().cloned().unwrap(), "k")
    }

    #[tokio::test]
    async fn success_emits_next_trigger_with_loop_identity() {
        let sink = Arc::new(RecordingSink::new());
        let plan =
            LoopFunction::new(LoopStage::Plan, Arc::new(Scripted { fail_at: None }), sink.clone());

        let result = plan
            .invoke(&event(LOOP_STARTED, json!({"loopId": "L1", "storyId": "S1"})))
            .await
            .unwrap();

        let Invocation::Succeeded { emitted: Some(next) } = result else {
            panic!("expected success");
        };
        assert_eq!(next.name, "agent/loop.test-writer");
        assert_eq!(
            Value::Object(next.data.clone()),
            json!({"plan": "done", "loopId": "L1", "storyId": "S1"})
        );
        assert_eq!(sink.events(), [next]);
    }

    #[tokio::test]
    async fn rerun_of_a_stage_emits_under_a_new_key() {
        let sink = Arc::new(RecordingSink::new());
        let plan =
            LoopFunction::new(LoopStage::Plan, Arc::new(Scripted { fail_at: None }), sink.clone());
        for id in ["L1:started", "L1:restarted"] {
            let trigger = NormalizedEvent::new(
                LOOP_STARTED,
                json!({"loopId": "L1"}).as_object().cloned().unwrap(),
                id,
            );
            plan.invoke(&trigger).await.unwrap();
        }
        let keys: Vec<_> = sink.events().into_iter().map(|e| e.idempotency_key).collect();
        assert_eq!(keys, ["L1:started:plan", "L1:restarted:plan"]);
    }

    #[tokio::test]
    async fn complete_emits_loop_completed() {
        let sink = Arc::new(RecordingSink::new());
        let complete = LoopFunction::new(
            LoopStage::Complete,
            Arc::new(Scripted { fail_at: None }),
            sink.clone(),
        );
        complete
            .invoke(&event("agent/loop.complete", json!({"loopId": "L1"})))
            .await
            .unwrap();
        assert_eq!(sink.named(LOOP_COMPLETED).len(), 1);
    }

    #[tokio::test]
    async fn every_stage_failure_goes_through_the_handler() {
        for stage in LoopStage::ALL {
            let sink = Arc::new(RecordingSink::new());
            let function =
                LoopFunction::new(stage, Arc::new(Scripted { fail_at: Some(stage) }), sink.clone());
            assert_eq!(function.on_failure().function_name(), stage.name());

            let trigger = match stage {
                LoopStage::Retro => event(LOOP_COMPLETED, json!({"loopId": "L1"})),
                _ => event(&stage.trigger_event(), json!({"loopId": "L1"})),
            };
            let result = function.invoke(&trigger).await.unwrap();

            let Invocation::Failed(failure) = result else {
                panic!("{stage}: expected failure");
            };
            assert_eq!(failure.function_name, stage.name());
            assert_eq!(failure.error, format!("{stage} broke"));
            let events = sink.events();
            assert_eq!(events.len(), 1, "{stage}");
            assert_eq!(events[0].name, LOOP_FUNCTION_FAILED);
            assert_eq!(failed_stage(&events[0]), Some(stage));
        }
    }

    #[tokio::test]
    async fn retro_ignores_its_own_failures() {
        let retro = LoopFunction::new(
            LoopStage::Retro,
            Arc::new(Scripted { fail_at: None }),
            Arc::new(RecordingSink::new()),
        );
        let own = event(LOOP_FUNCTION_FAILED, json!({"loopId": "L1", "functionName": "retro"}));
        let other = event(LOOP_FUNCTION_FAILED, json!({"loopId": "L1", "functionName": "judge"}));
        assert!(!retro.accepts(&own));
        assert!(retro.accepts(&other));
        assert_eq!(retro.invoke(&own).await.unwrap(), Invocation::Ignored);
    }

    #[tokio::test]
    async fn trigger_without_loop_id_is_rejected() {
        let plan = LoopFunction::new(
            LoopStage::Plan,
            Arc::new(Scripted { fail_at: None }),
            Arc::new(RecordingSink::new()),
        );
        let err = plan.invoke(&event(LOOP_STARTED, json!({}))).await.unwrap_err();
        assert!(matches!(err, LoopError::MissingLoopId { .. }));
    }
}
