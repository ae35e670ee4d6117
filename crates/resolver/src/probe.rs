//! The probe client port and its HTTP implementation.

use std::error::Error as _;
use std::io;

use async_trait::async_trait;

use crate::ProbeError;

/// Issues one health request and reports the status code.
///
/// Implementations need not enforce a timeout; [`resolve_endpoint`] bounds
/// every call.
///
/// [`resolve_endpoint`]: crate::resolve_endpoint
#[async_trait]
pub trait ProbeClient: Send + Sync {
    async fn probe(&self, url: &str) -> Result<u16, ProbeError>;
}

/// [`ProbeClient`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestProbeClient {
    http: reqwest::Client,
}

impl ReqwestProbeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ProbeClient for ReqwestProbeClient {
    async fn probe(&self, url: &str) -> Result<u16, ProbeError> {
        let response = self.http.get(url).send().await.map_err(classify_reqwest_error)?;
        Ok(response.status().as_u16())
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> ProbeError {
    if error.is_timeout() {
        return ProbeError::Other {
            message: "client timeout".to_string(),
        };
    }
    if error.is_connect() {
        return ProbeError::Connect {
            message: innermost_cause(&error),
        };
    }
    ProbeError::Other {
        message: error.without_url().to_string(),
    }
}

/// Walks the source chain to the transport error that actually happened.
fn innermost_cause(error: &reqwest::Error) -> String {
    let mut current: &(dyn std::error::Error + 'static) = error;
    while let Some(source) = current.source() {
        current = source;
    }
    match current.downcast_ref::<io::Error>().map(io::Error::kind) {
        Some(io::ErrorKind::ConnectionRefused) => "connection refused".to_string(),
        Some(io::ErrorKind::TimedOut) => "connect timed out".to_string(),
        _ => current.to_string(),
    }
}
