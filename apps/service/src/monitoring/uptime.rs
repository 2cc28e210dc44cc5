//! Rolling availability over recent check logs.
//!
//! The percentage is always derived from the stored window and never from a
//! previously computed value, so it survives restarts unchanged.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::types::CheckOutcome;
use crate::config::UptimeConfig;
use crate::database::{CheckLog, LogRepository, StoreError};

/// Bounds of the uptime window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UptimeWindow {
    pub span: Duration,
    pub max_entries: usize,
}

impl Default for UptimeWindow {
    fn default() -> Self {
        Self { span: Duration::hours(24), max_entries: 1440 }
    }
}

impl From<&UptimeConfig> for UptimeWindow {
    fn from(config: &UptimeConfig) -> Self {
        Self { span: config.window(), max_entries: config.max_entries }
    }
}

/// `100 * up / total` rounded to two decimals; 0 for an empty window
pub fn uptime_percentage(logs: &[CheckLog]) -> f64 {
    if logs.is_empty() {
        return 0.0;
    }
    let up = logs.iter().filter(|log| log.outcome == CheckOutcome::Up).count();
    let ratio = 100.0 * up as f64 / logs.len() as f64;
    (ratio * 100.0).round() / 100.0
}

pub struct UptimeCalculator {
    logs: Arc<dyn LogRepository>,
    window: UptimeWindow,
}

impl UptimeCalculator {
    pub fn new(logs: Arc<dyn LogRepository>, window: UptimeWindow) -> Self {
        Self { logs, window }
    }

    /// Availability of `monitor_uuid` over the window ending at `now`
    pub async fn compute(&self, monitor_uuid: Uuid, now: DateTime<Utc>) -> Result<f64, StoreError> {
        let since = now - self.window.span;
        let logs = self.logs.query_window(monitor_uuid, since, self.window.max_entries).await?;
        Ok(uptime_percentage(&logs))
    }
}
