//! Per-monitor alert deduplication.
//!
//! The persisted `alert_sent` flag is a two-state machine: `Quiet` (no
//! notified outage) and `Alerted` (the current down episode has already
//! produced a delivered notification). At most one notification goes out per
//! continuous down episode while the flag is persisted.

use super::types::{CheckOutcome, MonitorStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Quiet,
    Alerted,
}

impl From<bool> for AlertState {
    fn from(alert_sent: bool) -> Self {
        if alert_sent { AlertState::Alerted } else { AlertState::Quiet }
    }
}

impl AlertState {
    pub fn is_alerted(self) -> bool {
        self == AlertState::Alerted
    }
}

/// What a cycle must do about alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    /// Quiet -> Alerted: send the down notification; the flag is set only if delivery succeeds
    Notify,
    /// Alerted -> Alerted: already notified for this episode
    Suppress,
    /// Alerted -> Quiet: the monitor is back up, clear the flag
    Recover,
    /// Quiet -> Quiet
    Idle,
}

/// Decide the transition from the stored state and the new probe outcome.
///
/// A down outcome notifies when the monitor was not already down, or when the
/// flag is missing (e.g. lost across a restart). A possible duplicate is
/// preferred to a silently missed outage.
pub fn decide(previous: MonitorStatus, state: AlertState, outcome: CheckOutcome) -> AlertAction {
    match (outcome, state) {
        (CheckOutcome::Down, AlertState::Alerted) if previous == MonitorStatus::Down => {
            AlertAction::Suppress
        }
        (CheckOutcome::Down, _) => AlertAction::Notify,
        (CheckOutcome::Up, AlertState::Alerted) => AlertAction::Recover,
        (CheckOutcome::Up, AlertState::Quiet) => AlertAction::Idle,
    }
}

/// State after the action ran. `delivered` is only consulted for `Notify`.
pub fn next_state(action: AlertAction, delivered: bool) -> AlertState {
    match action {
        AlertAction::Notify if delivered => AlertState::Alerted,
        AlertAction::Notify => AlertState::Quiet,
        AlertAction::Suppress => AlertState::Alerted,
        AlertAction::Recover | AlertAction::Idle => AlertState::Quiet,
    }
}
