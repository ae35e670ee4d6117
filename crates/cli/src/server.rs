//! HTTP ingress.
//!
//! # Endpoints
//!
//! - `POST /webhooks/{provider}`: verify, normalize, then persist or relay.
//!   `202 {"events": n}` on success, `401` on a bad signature, `404` for an
//!   unknown provider. Nothing is persisted or relayed for a rejected
//!   delivery.
//! - `GET /health`: `200 OK` while the process is up.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bus::{EventSink, NewMessage, SinkError};
use serde_json::{json, Value};
use store::{MessageStore, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};
use webhooks::{ProviderRegistry, Route, WebhookError, WebhookHeaders};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub store: MessageStore,
    /// Destination for [`Route::Relay`] providers.
    pub relay: Arc<dyn EventSink>,
}

/// Why a delivery was not accepted.
#[derive(Debug, Error)]
pub enum IngressError {
    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Relay(#[from] SinkError),
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngressError::Webhook(WebhookError::UnknownProvider(_)) => StatusCode::NOT_FOUND,
            IngressError::Webhook(WebhookError::InvalidSignature { .. }) => {
                StatusCode::UNAUTHORIZED
            }
            IngressError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IngressError::Relay(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/{provider}", post(webhook_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

async fn webhook_handler(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), IngressError> {
    let provider = state.registry.get(&provider_id).inspect_err(|_| {
        debug!(provider = %provider_id, "Delivery for unknown provider");
    })?;
    let headers = to_webhook_headers(&headers);
    let events = provider.handle(&body, &headers)?;

    let count = events.len();
    match provider.route() {
        Route::Persist => {
            for event in &events {
                let message = NewMessage::from_event(provider.id(), event);
                let receipt = state.store.persist(message).await?;
                if receipt.duplicate {
                    debug!(
                        provider = provider.id(),
                        event = %event.name,
                        "Redelivered event ignored"
                    );
                }
            }
        }
        Route::Relay => {
            for event in events {
                let name = event.name.clone();
                state.relay.send(event).await.inspect_err(|e| {
                    warn!(provider = provider.id(), event = %name, error = %e, "Relay failed");
                })?;
            }
        }
    }

    info!(provider = provider.id(), events = count, "Webhook accepted");
    Ok((StatusCode::ACCEPTED, Json(json!({"events": count}))))
}

fn to_webhook_headers(headers: &HeaderMap) -> WebhookHeaders {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect()
}
