use libsql::Connection;

use super::repository::StoreError;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// Each migration runs at most once; applied versions are recorded in
/// `schema_migrations`.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::debug!(version = current_version, "database schema is up to date");
        return Ok(());
    }

    tracing::info!(from = current_version, to = SCHEMA_VERSION, "running migrations");

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Monitors and check logs").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Indexes for eligibility and uptime windows").await?;
    }

    tracing::info!(version = SCHEMA_VERSION, "database migrations completed");
    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i32, StoreError> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i64> = row.get(0)?;
        Ok(version.unwrap_or(0) as i32)
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<(), StoreError> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version as i64, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: monitors and their append-only check history
async fn run_migration_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitors (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            owner_email TEXT,
            interval_secs INTEGER NOT NULL DEFAULT 60,
            timeout_ms INTEGER NOT NULL DEFAULT 5000,
            paused INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            last_checked_at INTEGER,
            alert_sent INTEGER NOT NULL DEFAULT 0,
            uptime REAL NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    // monitor_uuid is a plain back-reference; logs never own or cascade into monitors.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS check_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            monitor_uuid TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            outcome TEXT NOT NULL,
            latency_ms INTEGER NOT NULL,
            response_code INTEGER,
            message TEXT
        )",
        (),
    )
    .await?;

    Ok(())
}

async fn run_migration_v2(conn: &Connection) -> Result<(), StoreError> {
    conn.execute("CREATE INDEX IF NOT EXISTS idx_monitors_paused ON monitors(paused)", ()).await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_check_logs_monitor_timestamp ON check_logs(monitor_uuid, timestamp DESC, id DESC)",
        (),
    )
    .await?;
    Ok(())
}
