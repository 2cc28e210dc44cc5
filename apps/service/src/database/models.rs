use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::monitoring::types::{CheckOutcome, MonitorStatus, ProbeResult};

/// Monitor model - a polled target owned by one user
#[derive(Debug, Clone, PartialEq)]
pub struct Monitor {
    pub uuid: Uuid,
    pub name: String,
    pub url: String,
    /// Where alerts for this monitor are delivered
    pub owner_email: Option<String>,
    pub interval_secs: u64,
    pub timeout_ms: u64,
    pub paused: bool,
    pub status: MonitorStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// True only while down and the current episode has been notified
    pub alert_sent: bool,
    /// Rolling availability, 0-100
    pub uptime: f64,
    pub created_at: DateTime<Utc>,
}

impl Monitor {
    /// Create a new monitor
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            url: url.into(),
            owner_email: None,
            interval_secs: 60,
            timeout_ms: 5_000,
            paused: false,
            status: MonitorStatus::Pending,
            last_checked_at: None,
            alert_sent: false,
            uptime: 0.0,
            created_at: Utc::now(),
        }
    }

    pub fn with_owner(mut self, email: impl Into<String>) -> Self {
        self.owner_email = Some(email.into());
        self
    }

    /// Probe timeout, falling back to `default` when none is configured
    pub fn timeout_or(&self, default: Duration) -> Duration {
        if self.timeout_ms == 0 { default } else { Duration::from_millis(self.timeout_ms) }
    }

    /// Whether the monitor's own interval has elapsed at `now`.
    ///
    /// `slack` absorbs timer jitter so a monitor whose interval equals the tick
    /// interval is due on every tick.
    pub fn is_due(&self, now: DateTime<Utc>, slack: Duration) -> bool {
        let Some(last) = self.last_checked_at else {
            return true;
        };
        let interval = Duration::from_secs(self.interval_secs).saturating_sub(slack);
        match (now - last).to_std() {
            Ok(elapsed) => elapsed >= interval,
            // Clock went backwards; check rather than stall.
            Err(_) => true,
        }
    }
}

/// Fields the check cycle writes back after every completed cycle
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorUpdate {
    pub status: MonitorStatus,
    pub last_checked_at: DateTime<Utc>,
    pub alert_sent: bool,
    pub uptime: f64,
}

/// Operator-owned fields to change; `None` leaves the stored value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorEdit {
    pub name: Option<String>,
    pub url: Option<String>,
    pub owner_email: Option<String>,
    pub interval_secs: Option<u64>,
    pub timeout_ms: Option<u64>,
}

impl MonitorEdit {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// CheckLog model - immutable record of one executed probe
#[derive(Debug, Clone, PartialEq)]
pub struct CheckLog {
    pub id: Option<i64>,
    pub monitor_uuid: Uuid,
    pub timestamp: DateTime<Utc>,
    pub outcome: CheckOutcome,
    pub latency_ms: u64,
    pub response_code: Option<u16>,
    pub message: Option<String>,
}

impl CheckLog {
    /// Create a new log entry from a probe result
    pub fn from_probe(monitor_uuid: Uuid, timestamp: DateTime<Utc>, probe: &ProbeResult) -> Self {
        Self {
            id: None,
            monitor_uuid,
            timestamp,
            outcome: probe.outcome,
            latency_ms: probe.latency_ms(),
            response_code: probe.response_code,
            message: Some(probe.message.clone()),
        }
    }
}

/// Convert a timestamp to Unix milliseconds
pub fn timestamp_to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert Unix milliseconds to a timestamp
pub fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
