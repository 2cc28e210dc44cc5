//! End-to-end tests for the check engine
//!
//! These run real ticks against a temporary LibSQL database with a scripted
//! transport and a recording notifier:
//! - Outage lifecycle (up, down, still down, recovered)
//! - Paused monitors and deleted monitors
//! - Failure isolation (store, notifier, panicking probe)
//! - Per-monitor mutual exclusion across overlapping ticks

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use uuid::Uuid;

use crate::database::{
    CheckLog, LibsqlStore, LogRepository, Monitor, MonitorEdit, MonitorRepository, MonitorUpdate, StoreError,
    initialize_database,
};
use crate::monitoring::checker::{FetchResponse, Transport, TransportError};
use crate::monitoring::{
    CheckOutcome, CheckRunner, CyclePolicy, MonitorStatus, Probe, Scheduler, SchedulerSettings,
    UptimeCalculator, UptimeWindow,
};
use crate::notifications::{Notifier, NotifyError};

#[derive(Clone)]
enum Behavior {
    Respond { status: u16, delay: Duration },
    Hang,
    Refuse,
    Panic,
}

/// Transport whose answer per URL is set by the test
#[derive(Default)]
struct ScriptedTransport {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<HashMap<String, usize>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    fn set(&self, url: &str, behavior: Behavior) {
        self.behaviors.lock().unwrap().insert(url.to_string(), behavior);
    }

    fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Most fetches ever answered at the same time
    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse, TransportError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(Behavior::Respond { status: 200, delay: Duration::ZERO });

        match behavior {
            Behavior::Respond { status, delay } => {
                let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now_active, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(FetchResponse { status_code: status, latency: delay })
            }
            Behavior::Hang => {
                tokio::time::sleep(timeout * 10).await;
                Err(TransportError::Timeout(timeout))
            }
            Behavior::Refuse => Err(TransportError::Connect("connection refused".into())),
            Behavior::Panic => panic!("transport exploded"),
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String, String)>>,
    attempts: Mutex<usize>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        *self.attempts.lock().unwrap() += 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected("smtp relay unavailable".into()));
        }
        self.sent.lock().unwrap().push((recipient.into(), subject.into(), body.into()));
        Ok(())
    }
}

/// Store wrapper that can be told to fail specific operations
struct FlakyStore {
    inner: LibsqlStore,
    fail_append_for: Mutex<HashSet<Uuid>>,
    fail_update_for: Mutex<HashSet<Uuid>>,
    fail_list: AtomicBool,
}

impl FlakyStore {
    fn injected() -> StoreError {
        StoreError::Corrupt("injected failure".into())
    }
}

#[async_trait]
impl MonitorRepository for FlakyStore {
    async fn list_eligible(&self) -> Result<Vec<Monitor>, StoreError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.list_eligible().await
    }

    async fn list_all(&self) -> Result<Vec<Monitor>, StoreError> {
        self.inner.list_all().await
    }

    async fn get(&self, uuid: Uuid) -> Result<Option<Monitor>, StoreError> {
        self.inner.get(uuid).await
    }

    async fn insert(&self, monitor: &Monitor) -> Result<(), StoreError> {
        self.inner.insert(monitor).await
    }

    async fn update(&self, uuid: Uuid, update: &MonitorUpdate) -> Result<(), StoreError> {
        if self.fail_update_for.lock().unwrap().contains(&uuid) {
            return Err(Self::injected());
        }
        self.inner.update(uuid, update).await
    }

    async fn set_paused(&self, uuid: Uuid, paused: bool) -> Result<(), StoreError> {
        self.inner.set_paused(uuid, paused).await
    }

    async fn edit(&self, uuid: Uuid, edit: &MonitorEdit) -> Result<(), StoreError> {
        self.inner.edit(uuid, edit).await
    }

    async fn delete(&self, uuid: Uuid) -> Result<(), StoreError> {
        self.inner.delete(uuid).await
    }
}

#[async_trait]
impl LogRepository for FlakyStore {
    async fn append(&self, log: &CheckLog) -> Result<i64, StoreError> {
        if self.fail_append_for.lock().unwrap().contains(&log.monitor_uuid) {
            return Err(Self::injected());
        }
        self.inner.append(log).await
    }

    async fn query_window(
        &self,
        monitor_uuid: Uuid,
        since: DateTime<Utc>,
        max_count: usize,
    ) -> Result<Vec<CheckLog>, StoreError> {
        self.inner.query_window(monitor_uuid, since, max_count).await
    }
}

struct Harness {
    store: Arc<FlakyStore>,
    transport: Arc<ScriptedTransport>,
    notifier: Arc<RecordingNotifier>,
    scheduler: Scheduler,
    base: DateTime<Utc>,
    _dir: TempDir,
}

impl Harness {
    async fn new(policy: CyclePolicy) -> Self {
        Self::with_settings(policy, SchedulerSettings { tick_interval: Duration::from_secs(60), max_concurrency: 4 })
            .await
    }

    async fn with_settings(policy: CyclePolicy, settings: SchedulerSettings) -> Self {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.db");
        let pool = crate::pool::open_local(&path.to_string_lossy(), 8).await.unwrap();
        let conn = pool.get().await.unwrap();
        initialize_database(&conn).await.unwrap();
        drop(conn);

        let store = Arc::new(FlakyStore {
            inner: LibsqlStore::new_from_pool(pool),
            fail_append_for: Mutex::new(HashSet::new()),
            fail_update_for: Mutex::new(HashSet::new()),
            fail_list: AtomicBool::new(false),
        });
        let transport = Arc::new(ScriptedTransport::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let runner = CheckRunner::new(
            store.clone(),
            store.clone(),
            Probe::new(transport.clone()),
            UptimeCalculator::new(store.clone(), UptimeWindow::default()),
            notifier.clone(),
            policy,
        );
        let scheduler = Scheduler::new(Arc::new(runner), settings);

        Self { store, transport, notifier, scheduler, base: Utc::now(), _dir: dir }
    }

    async fn add(&self, name: &str) -> Monitor {
        let mut monitor =
            Monitor::new(name, format!("https://{name}.example.com/health")).with_owner(format!("{name}@example.com"));
        monitor.timeout_ms = 300;
        self.store.insert(&monitor).await.unwrap();
        monitor
    }

    /// Tick `n` minutes after the harness base time
    async fn tick(&self, n: i64) -> crate::monitoring::TickSummary {
        self.scheduler.run_tick_at(self.base + ChronoDuration::minutes(n)).await
    }

    async fn monitor(&self, uuid: Uuid) -> Monitor {
        self.store.get(uuid).await.unwrap().unwrap()
    }

    async fn logs(&self, uuid: Uuid) -> Vec<CheckLog> {
        self.store
            .query_window(uuid, self.base - ChronoDuration::days(1), 10_000)
            .await
            .unwrap()
    }
}

fn up(delay_ms: u64) -> Behavior {
    Behavior::Respond { status: 200, delay: Duration::from_millis(delay_ms) }
}

#[tokio::test]
async fn test_outage_lifecycle_scenarios() {
    let h = Harness::new(CyclePolicy::default()).await;
    let monitor = h.add("api").await;

    // A: first probe answers 200 in ~120ms.
    h.transport.set(&monitor.url, up(120));
    let summary = h.tick(0).await;
    assert_eq!(summary.completed, 1);

    let m = h.monitor(monitor.uuid).await;
    let logs = h.logs(monitor.uuid).await;
    assert_eq!(m.status, MonitorStatus::Up);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].outcome, CheckOutcome::Up);
    assert!(logs[0].latency_ms >= 120, "latency {}", logs[0].latency_ms);
    assert_eq!(logs[0].response_code, Some(200));
    assert_eq!(m.uptime, 100.0);
    assert!(!m.alert_sent);
    assert!(h.notifier.sent().is_empty());

    // B: probe times out.
    h.transport.set(&monitor.url, Behavior::Hang);
    h.tick(1).await;
    let m = h.monitor(monitor.uuid).await;
    let logs = h.logs(monitor.uuid).await;
    assert_eq!(m.status, MonitorStatus::Down);
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].outcome, CheckOutcome::Down);
    assert!(logs[0].message.as_deref().unwrap_or_default().contains("timed out"));
    assert!(m.alert_sent);
    assert_eq!(m.uptime, 50.0);
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "api@example.com");
    assert_eq!(sent[0].1, "[DOWN] api");

    // C: still failing, no new notification.
    h.tick(2).await;
    let m = h.monitor(monitor.uuid).await;
    assert_eq!(m.status, MonitorStatus::Down);
    assert!(m.alert_sent);
    assert_eq!(m.uptime, 33.33);
    assert_eq!(h.notifier.attempts(), 1);

    // D: recovered, flag cleared, no recovery notification by default.
    h.transport.set(&monitor.url, up(0));
    h.tick(3).await;
    let m = h.monitor(monitor.uuid).await;
    assert_eq!(m.status, MonitorStatus::Up);
    assert!(!m.alert_sent);
    assert_eq!(m.uptime, 50.0);
    assert_eq!(h.notifier.attempts(), 1);
    assert_eq!(h.logs(monitor.uuid).await.len(), 4);
}

#[tokio::test]
async fn test_paused_monitor_is_never_touched() {
    let h = Harness::new(CyclePolicy::default()).await;
    let active = h.add("active").await;
    let mut paused = Monitor::new("paused", "https://paused.example.com");
    paused.paused = true;
    h.store.insert(&paused).await.unwrap();
    h.transport.set(&paused.url, Behavior::Refuse);

    for n in 0..3 {
        let summary = h.tick(n).await;
        assert_eq!(summary.eligible, 1);
    }

    assert_eq!(h.transport.calls(&paused.url), 0);
    assert!(h.logs(paused.uuid).await.is_empty());
    let stored = h.monitor(paused.uuid).await;
    assert_eq!(stored.status, MonitorStatus::Pending);
    assert!(stored.last_checked_at.is_none());
    assert!(!stored.alert_sent);
    assert_eq!(stored.uptime, 0.0);
    assert_eq!(h.logs(active.uuid).await.len(), 3);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_failed_notification_is_retried_next_cycle() {
    let h = Harness::new(CyclePolicy::default()).await;
    let monitor = h.add("billing").await;
    h.transport.set(&monitor.url, Behavior::Refuse);
    h.notifier.set_failing(true);

    h.tick(0).await;
    let m = h.monitor(monitor.uuid).await;
    assert_eq!(m.status, MonitorStatus::Down, "status persists despite notifier failure");
    assert!(!m.alert_sent);
    assert_eq!(m.uptime, 0.0);
    assert_eq!(h.notifier.attempts(), 1);

    h.notifier.set_failing(false);
    h.tick(1).await;
    assert!(h.monitor(monitor.uuid).await.alert_sent);
    assert_eq!(h.notifier.attempts(), 2);
    assert_eq!(h.notifier.sent().len(), 1);

    h.tick(2).await;
    assert_eq!(h.notifier.attempts(), 2);
}

#[tokio::test]
async fn test_lost_flag_after_restart_notifies() {
    let h = Harness::new(CyclePolicy::default()).await;
    let mut monitor = Monitor::new("legacy", "https://legacy.example.com");
    monitor.status = MonitorStatus::Down;
    monitor.alert_sent = false;
    h.store.insert(&monitor).await.unwrap();
    h.transport.set(&monitor.url, Behavior::Refuse);

    h.tick(0).await;
    assert_eq!(h.notifier.sent().len(), 1);
    assert!(h.monitor(monitor.uuid).await.alert_sent);
}

#[tokio::test]
async fn test_recovery_notification_when_enabled() {
    let policy = CyclePolicy { notify_on_recovery: true, ..CyclePolicy::default() };
    let h = Harness::new(policy).await;
    let monitor = h.add("web").await;

    h.transport.set(&monitor.url, Behavior::Refuse);
    h.tick(0).await;
    h.transport.set(&monitor.url, up(0));
    h.tick(1).await;
    h.tick(2).await;

    let subjects: Vec<String> = h.notifier.sent().into_iter().map(|(_, subject, _)| subject).collect();
    assert_eq!(subjects, vec!["[DOWN] web".to_string(), "[UP] web".to_string()]);
    assert!(!h.monitor(monitor.uuid).await.alert_sent);
}

#[tokio::test]
async fn test_store_failure_is_isolated_to_one_monitor() {
    let h = Harness::new(CyclePolicy::default()).await;
    let broken = h.add("broken").await;
    let healthy = h.add("healthy").await;
    h.transport.set(&broken.url, Behavior::Refuse);
    h.store.fail_append_for.lock().unwrap().insert(broken.uuid);

    let summary = h.tick(0).await;
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);

    let b = h.monitor(broken.uuid).await;
    assert_eq!(b.status, MonitorStatus::Pending, "record left unchanged");
    assert!(b.last_checked_at.is_none());
    assert!(!b.alert_sent);
    assert!(h.notifier.sent().is_empty(), "no alert from missing data");
    assert_eq!(h.monitor(healthy.uuid).await.status, MonitorStatus::Up);

    h.store.fail_append_for.lock().unwrap().clear();
    let summary = h.tick(1).await;
    assert_eq!(summary.completed, 2);
    assert_eq!(h.monitor(broken.uuid).await.status, MonitorStatus::Down);
}

#[tokio::test]
async fn test_persist_failure_leaves_flag_unset_for_retry() {
    let h = Harness::new(CyclePolicy::default()).await;
    let monitor = h.add("edge").await;
    h.transport.set(&monitor.url, Behavior::Refuse);
    h.store.fail_update_for.lock().unwrap().insert(monitor.uuid);

    let summary = h.tick(0).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(h.monitor(monitor.uuid).await.status, MonitorStatus::Pending);

    h.store.fail_update_for.lock().unwrap().clear();
    h.tick(1).await;
    // At-least-once: the unpersisted alert is sent again.
    assert_eq!(h.notifier.sent().len(), 2);
    assert!(h.monitor(monitor.uuid).await.alert_sent);
}

#[tokio::test]
async fn test_panicking_probe_does_not_abort_tick() {
    let h = Harness::new(CyclePolicy::default()).await;
    let exploding = h.add("exploding").await;
    let fine = h.add("fine").await;
    h.transport.set(&exploding.url, Behavior::Panic);

    let summary = h.tick(0).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(h.monitor(fine.uuid).await.status, MonitorStatus::Up);
    assert_eq!(h.monitor(exploding.uuid).await.status, MonitorStatus::Pending);

    // The in-flight mark was released, so the next tick tries again.
    let summary = h.tick(1).await;
    assert_eq!(summary.skipped, 0);
    assert_eq!(h.transport.calls(&exploding.url), 2);
}

#[tokio::test]
async fn test_listing_failure_does_not_stop_next_tick() {
    let h = Harness::new(CyclePolicy::default()).await;
    let monitor = h.add("api").await;

    h.store.fail_list.store(true, Ordering::SeqCst);
    let summary = h.tick(0).await;
    assert!(summary.listing_failed);
    assert!(h.logs(monitor.uuid).await.is_empty());

    h.store.fail_list.store(false, Ordering::SeqCst);
    let summary = h.tick(1).await;
    assert!(!summary.listing_failed);
    assert_eq!(summary.completed, 1);
}

#[tokio::test]
async fn test_overlapping_ticks_never_run_same_monitor_twice() {
    let h = Harness::new(CyclePolicy::default()).await;
    let mut slow = Monitor::new("slow", "https://slow.example.com");
    slow.timeout_ms = 5_000;
    h.store.insert(&slow).await.unwrap();
    h.transport.set(&slow.url, up(600));

    let (first, second) = tokio::join!(h.tick(0), async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        h.tick(1).await
    });

    assert_eq!(first.completed, 1);
    assert_eq!(second.skipped, 1);
    assert_eq!(second.completed, 0);
    assert_eq!(h.transport.calls(&slow.url), 1);
    assert_eq!(h.logs(slow.uuid).await.len(), 1);
}

#[tokio::test]
async fn test_monitor_interval_is_honoured() {
    let h = Harness::new(CyclePolicy::default()).await;
    let mut hourly = Monitor::new("hourly", "https://hourly.example.com");
    hourly.interval_secs = 3600;
    h.store.insert(&hourly).await.unwrap();

    assert_eq!(h.tick(0).await.completed, 1);
    assert_eq!(h.tick(1).await.not_due, 1);
    assert_eq!(h.tick(60).await.completed, 1);
    assert_eq!(h.logs(hourly.uuid).await.len(), 2);
}

#[tokio::test]
async fn test_deleted_monitor_leaves_schedule() {
    let h = Harness::new(CyclePolicy::default()).await;
    let monitor = h.add("gone").await;
    h.tick(0).await;

    h.store.delete(monitor.uuid).await.unwrap();
    let summary = h.tick(1).await;
    assert_eq!(summary.eligible, 0);
    assert_eq!(h.transport.calls(&monitor.url), 1);
}

#[tokio::test]
async fn test_start_and_stop_lifecycle() {
    let settings = SchedulerSettings { tick_interval: Duration::from_millis(200), max_concurrency: 2 };
    let mut h = Harness::with_settings(CyclePolicy::default(), settings).await;
    let mut monitor = Monitor::new("loop", "https://loop.example.com");
    monitor.interval_secs = 0;
    h.store.insert(&monitor).await.unwrap();

    h.scheduler.start();
    assert!(h.scheduler.is_running());
    tokio::time::sleep(Duration::from_millis(700)).await;
    h.scheduler.stop().await;
    assert!(!h.scheduler.is_running());

    let checked = h.logs(monitor.uuid).await.len();
    assert!(checked >= 2, "expected several ticks, got {checked}");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.logs(monitor.uuid).await.len(), checked);
}

#[tokio::test]
async fn test_delete_during_cycle_leaves_no_history() {
    let h = Harness::new(CyclePolicy::default()).await;
    let mut doomed = Monitor::new("doomed", "https://doomed.example.com");
    doomed.timeout_ms = 5_000;
    h.store.insert(&doomed).await.unwrap();
    h.transport.set(&doomed.url, up(500));

    let (summary, deleted) = tokio::join!(h.tick(0), async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        h.store.delete(doomed.uuid).await
    });
    deleted.unwrap();

    assert_eq!(summary.vanished, 1);
    assert_eq!(summary.failed, 0);
    assert!(h.store.get(doomed.uuid).await.unwrap().is_none());
    assert!(h.logs(doomed.uuid).await.is_empty());
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_fan_out_respects_max_concurrency() {
    let settings = SchedulerSettings { tick_interval: Duration::from_secs(60), max_concurrency: 2 };
    let h = Harness::with_settings(CyclePolicy::default(), settings).await;
    for n in 0..6 {
        let mut monitor = Monitor::new(format!("slow-{n}"), format!("https://slow-{n}.example.com"));
        monitor.timeout_ms = 5_000;
        h.store.insert(&monitor).await.unwrap();
        h.transport.set(&monitor.url, up(200));
    }

    let summary = h.tick(0).await;
    assert_eq!(summary.completed, 6);
    assert_eq!(h.transport.peak(), 2);
}

#[tokio::test]
async fn test_monitor_paused_while_waiting_for_permit_is_skipped() {
    let settings = SchedulerSettings { tick_interval: Duration::from_secs(60), max_concurrency: 1 };
    let h = Harness::with_settings(CyclePolicy::default(), settings).await;
    let mut uuids = Vec::new();
    for name in ["first", "second"] {
        let mut monitor = Monitor::new(name, format!("https://{name}.example.com"));
        monitor.timeout_ms = 5_000;
        h.store.insert(&monitor).await.unwrap();
        h.transport.set(&monitor.url, up(500));
        uuids.push(monitor.uuid);
    }

    // One cycle holds the only permit; the other re-reads the monitor once it
    // gets the permit and finds it paused.
    let (summary, _) = tokio::join!(h.tick(0), async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        for uuid in &uuids {
            h.store.set_paused(*uuid, true).await.unwrap();
        }
    });

    assert_eq!(summary.eligible, 2);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.vanished, 1);
    assert_eq!(h.transport.total_calls(), 1);
    let logged: usize = [h.logs(uuids[0]).await.len(), h.logs(uuids[1]).await.len()].iter().sum();
    assert_eq!(logged, 1);
}

#[tokio::test]
async fn test_resumed_monitor_is_checked_again() {
    let h = Harness::new(CyclePolicy::default()).await;
    let monitor = h.add("seasonal").await;

    h.store.set_paused(monitor.uuid, true).await.unwrap();
    assert_eq!(h.tick(0).await.eligible, 0);

    h.store.set_paused(monitor.uuid, false).await.unwrap();
    assert_eq!(h.tick(1).await.completed, 1);
    assert_eq!(h.logs(monitor.uuid).await.len(), 1);
}

#[tokio::test]
async fn test_zero_tick_interval_is_clamped() {
    let settings = SchedulerSettings { tick_interval: Duration::ZERO, max_concurrency: 2 };
    let mut h = Harness::with_settings(CyclePolicy::default(), settings).await;
    let mut monitor = Monitor::new("eager", "https://eager.example.com");
    monitor.interval_secs = 0;
    h.store.insert(&monitor).await.unwrap();

    h.scheduler.start();
    tokio::time::sleep(Duration::from_millis(450)).await;
    h.scheduler.stop().await;

    assert!(h.logs(monitor.uuid).await.len() >= 2);
}
