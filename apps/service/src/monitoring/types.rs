use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Stored status of a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    /// No check has completed yet
    Pending,
    Up,
    Down,
}

/// Classification of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Up,
    Down,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Pending => "pending",
            MonitorStatus::Up => "up",
            MonitorStatus::Down => "down",
        }
    }
}

impl CheckOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckOutcome::Up => "up",
            CheckOutcome::Down => "down",
        }
    }
}

impl From<CheckOutcome> for MonitorStatus {
    fn from(outcome: CheckOutcome) -> Self {
        match outcome {
            CheckOutcome::Up => MonitorStatus::Up,
            CheckOutcome::Down => MonitorStatus::Down,
        }
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status value: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for MonitorStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MonitorStatus::Pending),
            "up" => Ok(MonitorStatus::Up),
            "down" => Ok(MonitorStatus::Down),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl FromStr for CheckOutcome {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(CheckOutcome::Up),
            "down" => Ok(CheckOutcome::Down),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Result of one probe against a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub outcome: CheckOutcome,

    /// Dispatch to terminal outcome, failed attempts included
    pub latency: Duration,

    /// Set whenever a response was received, whatever its status
    pub response_code: Option<u16>,

    /// "OK" on success, otherwise the reason the target counts as down
    pub message: String,
}

impl ProbeResult {
    /// Mark the check as successful
    pub fn up(latency: Duration, response_code: u16) -> Self {
        Self {
            outcome: CheckOutcome::Up,
            latency,
            response_code: Some(response_code),
            message: "OK".to_string(),
        }
    }

    /// Mark the check as failed
    pub fn down(latency: Duration, response_code: Option<u16>, message: impl Into<String>) -> Self {
        Self { outcome: CheckOutcome::Down, latency, response_code, message: message.into() }
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency.as_millis() as u64
    }
}
