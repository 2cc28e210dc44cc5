//! Persistence for monitors and their check history
//!
//! Backed by LibSQL (SQLite) through a deadpool connection pool. The check
//! engine only sees the `MonitorRepository` and `LogRepository` traits.

pub mod migrations;
pub mod models;
pub mod repository;

pub use models::{CheckLog, Monitor, MonitorEdit, MonitorUpdate};
pub use repository::{LibsqlStore, LogRepository, MonitorRepository, StoreError};

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<(), StoreError> {
    migrations::run_migrations(conn).await
}
