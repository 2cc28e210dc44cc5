//! Check and alerting engine
//!
//! This module is responsible for:
//! - Probing targets and classifying the outcome
//! - Deriving rolling availability from stored history
//! - Deciding, once per outage episode, when to notify
//! - Scheduling per-monitor cycles on a fixed tick

pub mod alert;
pub mod checker;
pub mod cycle;
pub mod executor;
pub mod scheduler;
pub mod types;
pub mod uptime;

#[cfg(test)]
mod tests;

pub use cycle::{CheckRunner, CycleError, CyclePolicy, CycleReport, Delivery};
pub use executor::Probe;
pub use scheduler::{Scheduler, SchedulerSettings, TickSummary};
pub use types::{CheckOutcome, MonitorStatus, ProbeResult};
pub use uptime::{UptimeCalculator, UptimeWindow};
