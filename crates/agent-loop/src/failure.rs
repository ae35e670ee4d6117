//! The uniform stage failure handler.
//!
//! Every stage function gets the same handler, built by
//! [`create_loop_on_failure`]. On an unrecovered stage error it:
//!
//! 1. logs one `error` line naming the stage and the loop,
//! 2. emits exactly one `agent/loop.function.failed` event,
//! 3. returns. It never retries the stage.

use std::sync::Arc;

use bus::{
    EventSink, LoopFunctionFailure, NormalizedEvent, StageError, Timestamp, LOOP_FUNCTION_FAILED,
};
use serde_json::{Map, Value};
use tracing::error;

use crate::{LoopContext, LoopError};

/// Failure handler bound to one stage function.
#[derive(Clone)]
pub struct LoopOnFailure {
    function_name: String,
    sink: Arc<dyn EventSink>,
}

/// Creates the failure handler for `function_name`.
pub fn create_loop_on_failure(
    function_name: impl Into<String>,
    sink: Arc<dyn EventSink>,
) -> LoopOnFailure {
    LoopOnFailure {
        function_name: function_name.into(),
        sink,
    }
}

impl LoopOnFailure {
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Reports `err` raised while handling a trigger whose data was
    /// `trigger_data`.
    ///
    /// The returned record is exactly what was sent. If the sink rejects the
    /// event the error goes back to the caller; nothing is retried here.
    /// Without the trigger's id the event key falls back to the failure
    /// timestamp; prefer [`handle_trigger`](Self::handle_trigger).
    pub async fn handle(
        &self,
        err: &StageError,
        trigger_data: &Map<String, Value>,
    ) -> Result<LoopFunctionFailure, LoopError> {
        self.report(err, trigger_data, None).await
    }

    /// Like [`handle`](Self::handle), keyed by the trigger event's id so
    /// each failed run of a stage is reported once and distinct runs are
    /// all reported.
    pub async fn handle_trigger(
        &self,
        err: &StageError,
        trigger: &NormalizedEvent,
    ) -> Result<LoopFunctionFailure, LoopError> {
        self.report(err, &trigger.data, Some(&trigger.idempotency_key)).await
    }

    async fn report(
        &self,
        err: &StageError,
        trigger_data: &Map<String, Value>,
        trigger_id: Option<&str>,
    ) -> Result<LoopFunctionFailure, LoopError> {
        let Some(ctx) = LoopContext::from_data(trigger_data) else {
            error!(
                function = %self.function_name,
                error = %err,
                "Agent loop stage failed without a loopId"
            );
            return Err(LoopError::MissingLoopId {
                event: self.function_name.clone(),
            });
        };

        error!(
            function = %self.function_name,
            loop_id = %ctx.loop_id,
            story_id = ctx.story_id.as_ref().map(|s| s.as_str()),
            error = %err,
            "Agent loop stage failed"
        );

        let failure = LoopFunctionFailure {
            loop_id: ctx.loop_id,
            function_name: self.function_name.clone(),
            story_id: ctx.story_id,
            error: err.to_string(),
            timestamp: Timestamp::now().to_iso8601(),
        };

        let data = match serde_json::to_value(&failure) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let key = match trigger_id {
            Some(id) => format!("{id}:{}:failed", failure.function_name),
            None => format!(
                "{}:{}:failed:{}",
                failure.loop_id, failure.function_name, failure.timestamp
            ),
        };
        self.sink
            .send(NormalizedEvent::new(LOOP_FUNCTION_FAILED, data, key))
            .await?;

        Ok(failure)
    }
}
