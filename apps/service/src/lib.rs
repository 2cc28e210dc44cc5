//! Uptime monitoring service: periodic HTTP probes, rolling availability and
//! once-per-outage alerting.

pub mod config;
pub mod database;
pub mod monitoring;
pub mod notifications;
pub mod pool;
pub mod seed;
