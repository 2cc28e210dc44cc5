use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{Duration, SecondsFormat, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use uuid::Uuid;

use uptime_service::config::Config;
use uptime_service::database::{LibsqlStore, Monitor, MonitorEdit, MonitorRepository, initialize_database};
use uptime_service::monitoring::uptime::uptime_percentage;
use uptime_service::monitoring::{CheckRunner, CyclePolicy, Probe, Scheduler, SchedulerSettings, UptimeCalculator, UptimeWindow};
use uptime_service::{notifications, pool, seed};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the scheduler until Ctrl-C
    Run,
    /// Run a single tick and print its summary
    Tick,
    /// List monitors with their current state
    Status,
    /// Show check history and availability for one monitor
    Logs {
        #[arg(long)]
        monitor: Uuid,
        #[arg(long, value_enum, default_value_t = Range::Day)]
        range: Range,
    },
    /// Register a monitor
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
        /// 0 uses the configured default
        #[arg(long, default_value_t = 0)]
        timeout_ms: u64,
    },
    /// Change a monitor's target or schedule
    Edit {
        #[arg(long)]
        monitor: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        interval_secs: Option<u64>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Stop checking a monitor
    Pause {
        #[arg(long)]
        monitor: Uuid,
    },
    /// Resume checking a paused monitor
    Resume {
        #[arg(long)]
        monitor: Uuid,
    },
    /// Delete a monitor and its history
    Remove {
        #[arg(long)]
        monitor: Uuid,
    },
    /// Insert synthetic per-minute history
    Seed {
        #[arg(long)]
        monitor: Uuid,
        #[arg(long, default_value_t = 24)]
        hours: u32,
        #[arg(long, default_value_t = 0.05)]
        failure_rate: f64,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Range {
    #[value(name = "24h")]
    Day,
    #[value(name = "7d")]
    Week,
    #[value(name = "30d")]
    Month,
}

impl Range {
    fn span(self) -> Duration {
        match self {
            Range::Day => Duration::hours(24),
            Range::Week => Duration::days(7),
            Range::Month => Duration::days(30),
        }
    }
}

fn build_scheduler(config: &Config, store: Arc<LibsqlStore>) -> anyhow::Result<Scheduler> {
    let notifier = notifications::from_config(&config.notifier)?;
    let probe = Probe::http()?;
    let uptime = UptimeCalculator::new(store.clone(), UptimeWindow::from(&config.uptime));
    let policy = CyclePolicy {
        default_timeout: config.scheduler.default_timeout(),
        notify_on_recovery: config.alerts.notify_on_recovery,
    };

    let runner = CheckRunner::new(store.clone(), store, probe, uptime, notifier, policy);
    Ok(Scheduler::new(Arc::new(runner), SchedulerSettings::from(&config.scheduler)))
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<LibsqlStore>> {
    let pool = pool::open_local(&config.database.path, config.database.max_connections)
        .await
        .with_context(|| format!("failed to open database {}", config.database.path))?;
    let conn = pool.get().await.map_err(|e| anyhow::anyhow!("failed to get connection: {e}"))?;
    initialize_database(&conn).await?;
    drop(conn);

    Ok(Arc::new(LibsqlStore::new_from_pool(pool)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logger::init();

    let args = Args::parse();
    let config = Config::from_config(args.config.as_ref())?;
    let store = open_store(&config).await?;

    match args.command {
        Command::Run => {
            info!("\n{config}");
            let mut scheduler = build_scheduler(&config, store)?;
            scheduler.start();

            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutting down, waiting for in-flight checks");
            scheduler.stop().await;
        }
        Command::Tick => {
            let scheduler = build_scheduler(&config, store)?;
            let summary = scheduler.run_tick().await;
            println!(
                "eligible={} completed={} failed={} skipped={} not_due={} vanished={} listing_failed={}",
                summary.eligible,
                summary.completed,
                summary.failed,
                summary.skipped,
                summary.not_due,
                summary.vanished,
                summary.listing_failed
            );
        }
        Command::Status => {
            for monitor in store.list_all().await? {
                let last = monitor
                    .last_checked_at
                    .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_else(|| "never".into());
                println!(
                    "{}  {:<7} {:>6.2}%  alert={:<5} paused={:<5} last={}  {} ({})",
                    monitor.uuid,
                    monitor.status.as_str(),
                    monitor.uptime,
                    monitor.alert_sent,
                    monitor.paused,
                    last,
                    monitor.name,
                    monitor.url
                );
            }
        }
        Command::Logs { monitor, range } => {
            let Some(found) = store.get(monitor).await? else {
                bail!("monitor {monitor} not found");
            };
            let logs = store.query_range(monitor, Utc::now() - range.span()).await?;
            for log in &logs {
                println!(
                    "{}  {:<4} {:>5}ms  {}  {}",
                    log.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                    log.outcome.as_str(),
                    log.latency_ms,
                    log.response_code.map(|code| code.to_string()).unwrap_or_else(|| "-".into()),
                    log.message.as_deref().unwrap_or_default()
                );
            }
            println!("{}: {} checks, {:.2}% available", found.name, logs.len(), uptime_percentage(&logs));
        }
        Command::Add { name, url, owner, interval_secs, timeout_ms } => {
            url::Url::parse(&url).with_context(|| format!("invalid url {url}"))?;
            let mut monitor = Monitor::new(name, url);
            monitor.owner_email = owner;
            monitor.interval_secs = interval_secs;
            monitor.timeout_ms = timeout_ms;
            store.insert(&monitor).await?;
            println!("{}", monitor.uuid);
        }
        Command::Edit { monitor, name, url, owner, interval_secs, timeout_ms } => {
            if let Some(url) = &url {
                url::Url::parse(url).with_context(|| format!("invalid url {url}"))?;
            }
            let edit = MonitorEdit { name, url, owner_email: owner, interval_secs, timeout_ms };
            if edit.is_empty() {
                bail!("nothing to change");
            }
            store.edit(monitor, &edit).await?;
            info!(monitor = %monitor, "monitor updated");
        }
        Command::Pause { monitor } => {
            store.set_paused(monitor, true).await?;
            info!(monitor = %monitor, "monitor paused");
        }
        Command::Resume { monitor } => {
            store.set_paused(monitor, false).await?;
            info!(monitor = %monitor, "monitor resumed");
        }
        Command::Remove { monitor } => {
            store.delete(monitor).await?;
            info!(monitor = %monitor, "monitor removed");
        }
        Command::Seed { monitor, hours, failure_rate } => {
            if store.get(monitor).await?.is_none() {
                bail!("monitor {monitor} not found");
            }
            let plan = seed::SeedPlan { hours, failure_rate };
            let logs = seed::generate(monitor, Utc::now(), plan, &mut rand::thread_rng());
            let inserted = store.append_batch(&logs).await?;
            info!(monitor = %monitor, inserted, hours, "seeded check history");
        }
    }

    Ok(())
}
