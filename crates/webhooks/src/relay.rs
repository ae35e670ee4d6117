//! Outbound relay to the local event-intake API.
//!
//! Events are POSTed as a JSON array to `<base_url>/e/<event_key>`. The event
//! key is a credential, so the full URL is never logged and transport errors
//! are stripped of it before they are surfaced.

use std::time::Duration;

use async_trait::async_trait;
use bus::{EventSink, NormalizedEvent, SinkError};
use tracing::{debug, warn};

/// Default per-request timeout for the intake API.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the event-intake API.
#[derive(Debug, Clone)]
pub struct EventIntakeClient {
    http: reqwest::Client,
    base_url: String,
    event_key: String,
}

impl EventIntakeClient {
    /// Creates a client for the intake at `base_url`, authenticating with
    /// `event_key`.
    pub fn new(
        base_url: impl Into<String>,
        event_key: impl Into<String>,
    ) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| SinkError::Delivery {
                message: e.without_url().to_string(),
            })?;
        Ok(Self::with_client(http, base_url, event_key))
    }

    /// Creates a client around an existing `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        event_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            event_key: event_key.into(),
        }
    }

    /// Full intake URL, credential included.
    pub(crate) fn intake_url(&self) -> String {
        format!("{}/e/{}", self.base_url.trim_end_matches('/'), self.event_key)
    }

    /// Sends a batch of events in one request. An empty batch sends nothing.
    pub async fn send_batch(&self, events: &[NormalizedEvent]) -> Result<(), SinkError> {
        if events.is_empty() {
            return Ok(());
        }

        let response = self
            .http
            .post(self.intake_url())
            .json(events)
            .send()
            .await
            .map_err(|e| SinkError::Delivery {
                message: e.without_url().to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), count = events.len(), "Event intake rejected batch");
            return Err(SinkError::Delivery {
                message: format!("event intake returned HTTP {}", status.as_u16()),
            });
        }

        debug!(count = events.len(), "Relayed events to intake");
        Ok(())
    }
}

#[async_trait]
impl EventSink for EventIntakeClient {
    async fn send(&self, event: NormalizedEvent) -> Result<(), SinkError> {
        self.send_batch(std::slice::from_ref(&event)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use serde_json::{json, Map, Value};
    use tokio::net::TcpListener;

    use super::*;

    /// Requests seen by the fake intake: event key and raw body.
    type Received = Arc<Mutex<Vec<(String, String)>>>;

    #[derive(Clone)]
    struct FakeIntake {
        received: Received,
        status: StatusCode,
    }

    async fn accept_events(
        State(intake): State<FakeIntake>,
        Path(key): Path<String>,
        body: String,
    ) -> StatusCode {
        intake.received.lock().unwrap().push((key, body));
        intake.status
    }

    /// Serves a fake intake answering every `POST /e/{key}` with `status`.
    async fn fake_intake(status: StatusCode) -> (String, Received) {
        let received = Received::default();
        let router = Router::new()
            .route("/e/{key}", post(accept_events))
            .with_state(FakeIntake {
                received: received.clone(),
                status,
            });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        (format!("http://{addr}"), received)
    }

    fn local_client(base_url: String, key: &str) -> EventIntakeClient {
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        EventIntakeClient::with_client(http, base_url, key)
    }

    fn event() -> NormalizedEvent {
        let data: Map<String, Value> = json!({"slug": "x"}).as_object().cloned().unwrap();
        NormalizedEvent::new("content/updated", data, "evt-1")
    }

    #[test]
    fn intake_url_carries_key_in_path() {
        let client = EventIntakeClient::new("http://localhost:8288/", "k3y").unwrap();
        assert_eq!(client.intake_url(), "http://localhost:8288/e/k3y");
    }

    #[tokio::test]
    async fn posts_events_as_json_array() {
        let (base_url, received) = fake_intake(StatusCode::OK).await;

        let client = local_client(base_url, "k3y");
        client.send(event()).await.unwrap();

        let received = received.lock().unwrap().clone();
        assert_eq!(received.len(), 1);
        let (key, body) = &received[0];
        assert_eq!(key, "k3y");
        let sent: Value = serde_json::from_str(body).unwrap();
        assert_eq!(
            sent,
            json!([{"name": "content/updated", "data": {"slug": "x"}, "id": "evt-1"}])
        );
    }

    #[tokio::test]
    async fn non_success_status_is_a_delivery_error_without_the_key() {
        let (base_url, received) = fake_intake(StatusCode::INTERNAL_SERVER_ERROR).await;

        let client = local_client(base_url, "s3cret-key");
        let err = client.send(event()).await.unwrap_err();

        assert_eq!(received.lock().unwrap().len(), 1);
        let message = err.to_string();
        assert!(message.contains("HTTP 500"), "{message}");
        assert!(!message.contains("s3cret-key"));
    }

    #[tokio::test]
    async fn empty_batch_sends_nothing() {
        let (base_url, received) = fake_intake(StatusCode::OK).await;

        let client = local_client(base_url, "k");
        client.send_batch(&[]).await.unwrap();

        assert!(received.lock().unwrap().is_empty());
    }
}
