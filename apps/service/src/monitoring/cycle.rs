use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::alert::{self, AlertAction, AlertState};
use super::executor::Probe;
use super::types::{CheckOutcome, MonitorStatus};
use super::uptime::UptimeCalculator;
use crate::database::{CheckLog, LogRepository, Monitor, MonitorRepository, MonitorUpdate, StoreError};
use crate::notifications::{AlertMessage, Notifier};

/// Stage at which a monitor's cycle was abandoned. The monitor record is left
/// untouched in every case.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to load monitor: {0}")]
    Load(#[source] StoreError),

    #[error("failed to append check log: {0}")]
    Append(#[source] StoreError),

    #[error("failed to compute uptime: {0}")]
    Uptime(#[source] StoreError),

    #[error("failed to persist monitor: {0}")]
    Persist(#[source] StoreError),
}

/// Result of a notification attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    NotAttempted,
    Delivered,
    Failed(String),
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

/// What one completed cycle did
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub monitor_uuid: Uuid,
    pub log: CheckLog,
    pub status: MonitorStatus,
    pub action: AlertAction,
    pub delivery: Delivery,
    pub alert_sent: bool,
    pub uptime: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePolicy {
    /// Probe timeout for monitors without their own
    pub default_timeout: Duration,
    /// Send an `[UP]` notification when an alerted monitor recovers
    pub notify_on_recovery: bool,
}

impl Default for CyclePolicy {
    fn default() -> Self {
        Self { default_timeout: Duration::from_secs(5), notify_on_recovery: false }
    }
}

/// Runs probe -> log append -> uptime -> alert decision -> persist for one monitor
pub struct CheckRunner {
    monitors: Arc<dyn MonitorRepository>,
    logs: Arc<dyn LogRepository>,
    probe: Probe,
    uptime: UptimeCalculator,
    notifier: Arc<dyn Notifier>,
    policy: CyclePolicy,
}

impl CheckRunner {
    pub fn new(
        monitors: Arc<dyn MonitorRepository>,
        logs: Arc<dyn LogRepository>,
        probe: Probe,
        uptime: UptimeCalculator,
        notifier: Arc<dyn Notifier>,
        policy: CyclePolicy,
    ) -> Self {
        Self { monitors, logs, probe, uptime, notifier, policy }
    }

    pub fn monitors(&self) -> &Arc<dyn MonitorRepository> {
        &self.monitors
    }

    /// Re-read the monitor and run its cycle.
    ///
    /// Must be called while holding the monitor's in-flight guard so the read
    /// and the final write cannot interleave with another cycle. Returns
    /// `None` when the monitor was deleted or paused after being listed, or
    /// deleted while its cycle ran.
    pub async fn run_by_id(&self, uuid: Uuid, now: DateTime<Utc>) -> Result<Option<CycleReport>, CycleError> {
        match self.monitors.get(uuid).await.map_err(CycleError::Load)? {
            Some(monitor) if !monitor.paused => match self.run(&monitor, now).await {
                Ok(report) => Ok(Some(report)),
                Err(CycleError::Append(StoreError::NotFound(_)) | CycleError::Persist(StoreError::NotFound(_))) => {
                    debug!(monitor = %uuid, "deleted during cycle, result discarded");
                    Ok(None)
                }
                Err(e) => Err(e),
            },
            Some(_) => {
                debug!(monitor = %uuid, "paused since listing, skipping");
                Ok(None)
            }
            None => {
                debug!(monitor = %uuid, "deleted since listing, skipping");
                Ok(None)
            }
        }
    }

    /// Run one cycle against the given snapshot of the monitor
    pub async fn run(&self, monitor: &Monitor, now: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        let timeout = monitor.timeout_or(self.policy.default_timeout);
        let probe = self.probe.execute(&monitor.url, timeout).await;

        let mut log = CheckLog::from_probe(monitor.uuid, now, &probe);
        log.id = Some(self.logs.append(&log).await.map_err(CycleError::Append)?);

        let uptime = self.uptime.compute(monitor.uuid, now).await.map_err(CycleError::Uptime)?;

        let action = alert::decide(monitor.status, AlertState::from(monitor.alert_sent), probe.outcome);
        let delivery = match action {
            AlertAction::Notify => self.deliver(monitor, &log).await,
            AlertAction::Recover if self.policy.notify_on_recovery => self.deliver(monitor, &log).await,
            _ => Delivery::NotAttempted,
        };
        let alert_sent = alert::next_state(action, delivery.is_delivered()).is_alerted();

        let update = MonitorUpdate {
            status: probe.outcome.into(),
            last_checked_at: now,
            alert_sent,
            uptime,
        };
        self.monitors.update(monitor.uuid, &update).await.map_err(CycleError::Persist)?;

        if probe.outcome != CheckOutcome::Up || monitor.status != update.status {
            info!(
                monitor = %monitor.uuid,
                name = %monitor.name,
                outcome = %probe.outcome,
                previous = %monitor.status,
                latency_ms = log.latency_ms,
                uptime,
                message = %probe.message,
                "checked"
            );
        } else {
            debug!(monitor = %monitor.uuid, latency_ms = log.latency_ms, uptime, "checked");
        }

        Ok(CycleReport {
            monitor_uuid: monitor.uuid,
            log,
            status: update.status,
            action,
            delivery,
            alert_sent,
            uptime,
        })
    }

    async fn deliver(&self, monitor: &Monitor, log: &CheckLog) -> Delivery {
        let message = AlertMessage::for_check(monitor, log);
        let recipient = monitor.owner_email.as_deref().unwrap_or_default();

        match self.notifier.send(recipient, &message.subject, &message.body).await {
            Ok(()) => {
                info!(monitor = %monitor.uuid, recipient, subject = %message.subject, "alert delivered");
                Delivery::Delivered
            }
            Err(e) => {
                warn!(monitor = %monitor.uuid, recipient, error = %e, "alert delivery failed, will retry next cycle");
                Delivery::Failed(e.to_string())
            }
        }
    }
}
