//! Loop identity carried on every stage trigger.

use bus::{LoopId, StoryId};
use serde_json::{Map, Value};

/// Wire key for the loop id in event data.
pub const LOOP_ID_KEY: &str = "loopId";

/// Wire key for the optional story id in event data.
pub const STORY_ID_KEY: &str = "storyId";

/// The `{loopId, storyId?}` part of a trigger event's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopContext {
    pub loop_id: LoopId,
    pub story_id: Option<StoryId>,
}

impl LoopContext {
    /// Reads the loop identity from event data. `None` when `loopId` is
    /// missing, empty, or not a string.
    pub fn from_data(data: &Map<String, Value>) -> Option<Self> {
        let loop_id = data.get(LOOP_ID_KEY).and_then(Value::as_str).and_then(LoopId::new)?;
        let story_id = data.get(STORY_ID_KEY).and_then(Value::as_str).and_then(StoryId::new);
        Some(Self { loop_id, story_id })
    }

    /// Builds the data for a downstream event: the stage output with the loop
    /// identity written over it, so a stage cannot re-home its loop.
    pub fn stamp(&self, mut output: Map<String, Value>) -> Map<String, Value> {
        output.insert(LOOP_ID_KEY.to_string(), Value::from(self.loop_id.as_str()));
        match &self.story_id {
            Some(story) => {
                output.insert(STORY_ID_KEY.to_string(), Value::from(story.as_str()));
            }
            None => {
                output.remove(STORY_ID_KEY);
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn reads_loop_and_optional_story() {
        let ctx = LoopContext::from_data(&data(json!({"loopId": "L1", "storyId": "S1"}))).unwrap();
        assert_eq!(ctx.loop_id.as_str(), "L1");
        assert_eq!(ctx.story_id.unwrap().as_str(), "S1");

        let ctx = LoopContext::from_data(&data(json!({"loopId": "L1"}))).unwrap();
        assert_eq!(ctx.story_id, None);
    }

    #[test]
    fn rejects_missing_or_blank_loop_id() {
        assert_eq!(LoopContext::from_data(&data(json!({"storyId": "S1"}))), None);
        assert_eq!(LoopContext::from_data(&data(json!({"loopId": ""}))), None);
        assert_eq!(LoopContext::from_data(&data(json!({"loopId": 7}))), None);
    }

    #[test]
    fn stamp_keeps_identity_over_stage_output() {
        let ctx = LoopContext::from_data(&data(json!({"loopId": "L1"}))).unwrap();
        let stamped = ctx.stamp(data(json!({"plan": "x", "loopId": "other", "storyId": "S9"})));
        assert_eq!(Value::Object(stamped), json!({"plan": "x", "loopId": "L1"}));
    }
}
