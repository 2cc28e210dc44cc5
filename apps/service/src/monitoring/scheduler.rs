use chrono::{DateTime, Utc};
use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cycle::{CheckRunner, CycleError, CycleReport};
use crate::config::SchedulerConfig;

/// Shortest tick the scheduler accepts
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub max_concurrency: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { tick_interval: Duration::from_secs(60), max_concurrency: 32 }
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self { tick_interval: config.tick_interval(), max_concurrency: config.max_concurrency.max(1) }
    }
}

/// Counters for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Unpaused monitors listed at the start of the tick
    pub eligible: usize,
    pub completed: usize,
    pub failed: usize,
    /// Previous cycle for the monitor still running
    pub skipped: usize,
    /// Monitor's own interval has not elapsed
    pub not_due: usize,
    /// Deleted or paused between listing and running
    pub vanished: usize,
    /// Monitors could not be listed at all
    pub listing_failed: bool,
}

/// Marks a monitor as having a cycle in flight; released on drop
struct InFlightGuard {
    set: Arc<DashSet<Uuid>>,
    uuid: Uuid,
}

impl InFlightGuard {
    fn acquire(set: &Arc<DashSet<Uuid>>, uuid: Uuid) -> Option<Self> {
        set.insert(uuid).then(|| Self { set: Arc::clone(set), uuid })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(&self.uuid);
    }
}

enum PipelineEnd {
    Done(Result<Option<CycleReport>, CycleError>),
    Aborted(String),
}

struct TickEngine {
    runner: Arc<CheckRunner>,
    settings: SchedulerSettings,
    in_flight: Arc<DashSet<Uuid>>,
    permits: Arc<Semaphore>,
}

impl TickEngine {
    async fn run_tick(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();

        let monitors = match self.runner.monitors().list_eligible().await {
            Ok(monitors) => monitors,
            Err(e) => {
                error!(error = %e, "failed to list monitors, tick abandoned");
                summary.listing_failed = true;
                return summary;
            }
        };
        summary.eligible = monitors.len();

        let slack = self.settings.tick_interval / 2;
        let mut pipelines = JoinSet::new();

        for monitor in monitors {
            if !monitor.is_due(now, slack) {
                summary.not_due += 1;
                continue;
            }
            let Some(guard) = InFlightGuard::acquire(&self.in_flight, monitor.uuid) else {
                warn!(monitor = %monitor.uuid, name = %monitor.name, "previous cycle still running, skipping");
                summary.skipped += 1;
                continue;
            };

            let runner = Arc::clone(&self.runner);
            let permits = Arc::clone(&self.permits);
            let uuid = monitor.uuid;

            pipelines.spawn(async move {
                let _guard = guard;
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return (uuid, PipelineEnd::Aborted(e.to_string())),
                };
                // Inner task so a panic surfaces as a JoinError while the guard is still held here.
                let end = match tokio::spawn(async move { runner.run_by_id(uuid, now).await }).await {
                    Ok(result) => PipelineEnd::Done(result),
                    Err(join_error) => PipelineEnd::Aborted(join_error.to_string()),
                };
                (uuid, end)
            });
        }

        while let Some(joined) = pipelines.join_next().await {
            match joined {
                Ok((_, PipelineEnd::Done(Ok(Some(report))))) => {
                    debug!(
                        monitor = %report.monitor_uuid,
                        status = %report.status,
                        action = ?report.action,
                        delivery = ?report.delivery,
                        alert_sent = report.alert_sent,
                        uptime = report.uptime,
                        latency_ms = report.log.latency_ms,
                        "cycle completed"
                    );
                    summary.completed += 1;
                }
                Ok((_, PipelineEnd::Done(Ok(None)))) => summary.vanished += 1,
                Ok((uuid, PipelineEnd::Done(Err(e)))) => {
                    error!(monitor = %uuid, error = %e, "check cycle failed");
                    summary.failed += 1;
                }
                Ok((uuid, PipelineEnd::Aborted(reason))) => {
                    error!(monitor = %uuid, reason = %reason, "check cycle aborted");
                    summary.failed += 1;
                }
                Err(join_error) => {
                    error!(error = %join_error, "check cycle task lost");
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}

/// Periodic driver of the check engine.
///
/// Each tick lists unpaused monitors and runs one cycle per due monitor,
/// concurrently and bounded by `max_concurrency`. Ticks run as their own
/// tasks, so a slow tick never delays the next one; a monitor whose previous
/// cycle is still in flight is skipped rather than run twice.
pub struct Scheduler {
    engine: Arc<TickEngine>,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(runner: Arc<CheckRunner>, mut settings: SchedulerSettings) -> Self {
        if settings.tick_interval < MIN_TICK_INTERVAL {
            warn!(requested = ?settings.tick_interval, "tick interval too short, clamping");
            settings.tick_interval = MIN_TICK_INTERVAL;
        }
        let engine = TickEngine {
            runner,
            permits: Arc::new(Semaphore::new(settings.max_concurrency.max(1))),
            settings,
            in_flight: Arc::new(DashSet::new()),
        };
        Self { engine: Arc::new(engine), shutdown: None, handle: None }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Run one tick now and wait for every cycle in it
    pub async fn run_tick(&self) -> TickSummary {
        self.engine.run_tick(Utc::now()).await
    }

    /// Run one tick as if the clock read `now`
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> TickSummary {
        self.engine.run_tick(now).await
    }

    /// Start ticking on the configured interval. No-op if already started.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let engine = Arc::clone(&self.engine);

        let handle = tokio::spawn(async move {
            let mut timer = interval(engine.settings.tick_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut ticks: JoinSet<TickSummary> = JoinSet::new();

            info!(interval_secs = engine.settings.tick_interval.as_secs(), "scheduler started");

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let engine = Arc::clone(&engine);
                        ticks.spawn(async move { engine.run_tick(Utc::now()).await });
                    }
                    Some(finished) = ticks.join_next(), if !ticks.is_empty() => log_tick(finished),
                    _ = shutdown_rx.changed() => break,
                }
            }

            // Let in-flight probes finish or time out on their own.
            while let Some(finished) = ticks.join_next().await {
                log_tick(finished);
            }
            info!("scheduler stopped");
        });

        self.shutdown = Some(shutdown_tx);
        self.handle = Some(handle);
    }

    /// Stop ticking and wait for in-flight ticks to complete
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler loop ended abnormally");
            }
        }
    }
}

fn log_tick(finished: Result<TickSummary, tokio::task::JoinError>) {
    match finished {
        Ok(summary) if summary.failed > 0 || summary.listing_failed => warn!(
            eligible = summary.eligible,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            listing_failed = summary.listing_failed,
            "tick finished with failures"
        ),
        Ok(summary) => info!(
            eligible = summary.eligible,
            completed = summary.completed,
            skipped = summary.skipped,
            not_due = summary.not_due,
            "tick finished"
        ),
        Err(e) => error!(error = %e, "tick aborted"),
    }
}
