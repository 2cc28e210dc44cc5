use chrono::SecondsFormat;

use crate::database::{CheckLog, Monitor};
use crate::monitoring::types::CheckOutcome;

/// Rendered alert text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub subject: String,
    pub body: String,
}

impl AlertMessage {
    /// Alert for the check that just produced `log`
    pub fn for_check(monitor: &Monitor, log: &CheckLog) -> Self {
        let label = match log.outcome {
            CheckOutcome::Up => "UP",
            CheckOutcome::Down => "DOWN",
        };

        let mut body = format!(
            "Monitor: {}\nURL: {}\nStatus: {}\nChecked at: {}\nLatency: {}ms",
            monitor.name,
            monitor.url,
            label,
            log.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            log.latency_ms,
        );
        if let Some(code) = log.response_code {
            body.push_str(&format!("\nResponse code: {code}"));
        }
        if let Some(message) = log.message.as_deref().filter(|m| !m.is_empty()) {
            body.push_str(&format!("\nDetails: {message}"));
        }

        Self { subject: format!("[{label}] {}", monitor.name), body }
    }
}
