use std::sync::Arc;
use std::time::{Duration, Instant};

use super::checker::{HttpTransport, Transport, TransportError};
use super::types::ProbeResult;

/// Executes one check against a target and classifies the outcome.
///
/// Never fails: every failure mode becomes a `down` result so one bad target
/// cannot abort the rest of a tick.
#[derive(Clone)]
pub struct Probe {
    transport: Arc<dyn Transport>,
}

impl Probe {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Probe backed by the real HTTP transport
    pub fn http() -> Result<Self, TransportError> {
        Ok(Self::new(Arc::new(HttpTransport::new()?)))
    }

    pub async fn execute(&self, url: &str, timeout: Duration) -> ProbeResult {
        let start = Instant::now();

        if timeout.is_zero() {
            return ProbeResult::down(start.elapsed(), None, "invalid timeout: must be positive");
        }
        if let Err(e) = url::Url::parse(url) {
            return ProbeResult::down(start.elapsed(), None, format!("invalid URL: {e}"));
        }

        // The transport gets the same budget; this outer bound catches one that ignores it.
        let fetched = tokio::time::timeout(timeout, self.transport.fetch(url, timeout)).await;
        let latency = start.elapsed();

        match fetched {
            Err(_) => ProbeResult::down(latency, None, TransportError::Timeout(timeout).to_string()),
            Ok(Err(e)) => ProbeResult::down(latency, None, e.to_string()),
            Ok(Ok(response)) if (200..=299).contains(&response.status_code) => {
                ProbeResult::up(latency, response.status_code)
            }
            Ok(Ok(response)) => ProbeResult::down(
                latency,
                Some(response.status_code),
                format!("Unexpected status code: {}", response.status_code),
            ),
        }
    }
}
