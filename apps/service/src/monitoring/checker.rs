use std::time::{Duration, Instant};
use thiserror::Error;

/// Terminal response of a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchResponse {
    pub status_code: u16,
    pub latency: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Network transport used by the probe
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url`, giving up after `timeout`
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse, TransportError>;
}

/// HTTP/HTTPS transport
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("uptime-service/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        Ok(Self { client })
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else {
        TransportError::Malformed(error.to_string())
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse, TransportError> {
        let start = Instant::now();

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        Ok(FetchResponse { status_code: response.status().as_u16(), latency: start.elapsed() })
    }
}
