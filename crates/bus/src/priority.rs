//! Message priority classification.
//!
//! Rules are evaluated in order and the first match wins:
//!
//! 1. Prompt starts with `/` (after leading whitespace) → [`Priority::P0`]
//! 2. Source tag is an interactive human channel → [`Priority::P1`]
//! 3. Source tag is `heartbeat` or `cron`, or `metadata.kind` says so → [`Priority::P2`]
//! 4. Anything else → [`Priority::P3`]
//!
//! The source tag is the part of `source` before the first `:`, compared
//! case-insensitively, so `telegram:7718912466` is tagged `telegram`.

use serde_json::{Map, Value};

use crate::{NewMessage, Priority};

/// Source tags of channels where a human is waiting on the other end.
pub const INTERACTIVE_SOURCES: &[&str] =
    &["telegram", "imessage", "slack", "discord", "voice", "web"];

/// Source tags of scheduled signals.
pub const SCHEDULED_SOURCES: &[&str] = &["heartbeat", "cron"];

/// Classifies a message about to be persisted.
pub fn classify_priority(candidate: &NewMessage) -> Priority {
    classify(&candidate.source, &candidate.prompt, &candidate.metadata)
}

/// Classifies from the raw parts of a message. Pure and total.
pub fn classify(source: &str, prompt: &str, metadata: &Map<String, Value>) -> Priority {
    if prompt.trim_start().starts_with('/') {
        return Priority::P0;
    }

    let tag = source_tag(source);
    if INTERACTIVE_SOURCES.iter().any(|s| tag.eq_ignore_ascii_case(s)) {
        return Priority::P1;
    }

    let kind = metadata.get("kind").and_then(Value::as_str).unwrap_or("");
    if SCHEDULED_SOURCES
        .iter()
        .any(|s| tag.eq_ignore_ascii_case(s) || kind.eq_ignore_ascii_case(s))
    {
        return Priority::P2;
    }

    Priority::P3
}

fn source_tag(source: &str) -> &str {
    source.split(':').next().unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn message(source: &str, prompt: &str) -> NewMessage {
        NewMessage::new(source, prompt)
    }

    #[test]
    fn slash_prompt_is_p0_whatever_the_source() {
        assert_eq!(classify_priority(&message("heartbeat", "/stop")), Priority::P0);
        assert_eq!(classify_priority(&message("telegram", "  /status")), Priority::P0);
        assert_eq!(classify_priority(&message("github", "/deploy now")), Priority::P0);
    }

    #[test]
    fn interactive_channels_are_p1() {
        assert_eq!(classify_priority(&message("telegram", "hi")), Priority::P1);
        assert_eq!(classify_priority(&message("telegram:7718912466", "hi")), Priority::P1);
        assert_eq!(classify_priority(&message("Slack", "hi")), Priority::P1);
    }

    #[test]
    fn heartbeat_and_cron_are_p2() {
        assert_eq!(classify_priority(&message("heartbeat", "tick")), Priority::P2);
        assert_eq!(classify_priority(&message("cron:nightly", "run")), Priority::P2);

        let mut tagged = message("system", "tick");
        tagged.metadata = json!({"kind": "heartbeat"}).as_object().cloned().unwrap();
        assert_eq!(classify_priority(&tagged), Priority::P2);
    }

    #[test]
    fn everything_else_is_p3() {
        assert_eq!(classify_priority(&message("github", "workflow done")), Priority::P3);
        assert_eq!(classify_priority(&message("", "")), Priority::P3);
        assert_eq!(classify_priority(&message("telegramish", "hi")), Priority::P3);
    }

    #[test]
    fn slash_inside_prompt_does_not_count() {
        assert_eq!(classify_priority(&message("github", "see a/b")), Priority::P3);
    }

    proptest! {
        /// Property: classification is total and deterministic.
        #[test]
        fn prop_classification_is_deterministic(source: String, prompt: String) {
            let a = classify_priority(&message(&source, &prompt));
            let b = classify_priority(&message(&source, &prompt));
            prop_assert_eq!(a, b);
        }

        /// Property: any slash-prefixed prompt is P0.
        #[test]
        fn prop_slash_prefix_is_p0(source: String, rest: String) {
            let prompt = format!("/{rest}");
            prop_assert_eq!(classify_priority(&message(&source, &prompt)), Priority::P0);
        }

        /// Property: without a slash or a known tag the result is P3.
        #[test]
        fn prop_unknown_sources_are_p3(source in "[x-z]{1,12}", prompt in "[a-z ]{0,24}") {
            prop_assert_eq!(classify_priority(&message(&source, &prompt)), Priority::P3);
        }
    }
}
