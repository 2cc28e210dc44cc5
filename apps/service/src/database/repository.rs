use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, Value, params, params::Params};
use thiserror::Error;
use uuid::Uuid;

use super::models::{CheckLog, Monitor, MonitorEdit, MonitorUpdate, millis_to_timestamp, timestamp_to_millis};
use crate::pool::{LibsqlManager, LibsqlPool};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool::managed::PoolError<libsql::Error>),

    #[error("database query failed: {0}")]
    Query(#[from] libsql::Error),

    #[error("monitor {0} not found")]
    NotFound(Uuid),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Monitor records, as consumed by the check engine
#[async_trait]
pub trait MonitorRepository: Send + Sync {
    /// Every monitor that is not paused
    async fn list_eligible(&self) -> Result<Vec<Monitor>, StoreError>;

    async fn list_all(&self) -> Result<Vec<Monitor>, StoreError>;

    async fn get(&self, uuid: Uuid) -> Result<Option<Monitor>, StoreError>;

    async fn insert(&self, monitor: &Monitor) -> Result<(), StoreError>;

    /// Write back the engine-owned fields. A missing monitor is `NotFound`.
    async fn update(&self, uuid: Uuid, update: &MonitorUpdate) -> Result<(), StoreError>;

    /// Pause or resume scheduling. A missing monitor is `NotFound`.
    async fn set_paused(&self, uuid: Uuid, paused: bool) -> Result<(), StoreError>;

    /// Change operator-owned fields; `None` keeps the stored value
    async fn edit(&self, uuid: Uuid, edit: &MonitorEdit) -> Result<(), StoreError>;

    /// Remove a monitor and its history
    async fn delete(&self, uuid: Uuid) -> Result<(), StoreError>;
}

/// Append-only check history
#[async_trait]
pub trait LogRepository: Send + Sync {
    /// Append a log for an existing monitor. A deleted monitor is `NotFound`
    /// and nothing is written.
    async fn append(&self, log: &CheckLog) -> Result<i64, StoreError>;

    /// Logs at or after `since`, newest first, at most `max_count` of them
    async fn query_window(
        &self,
        monitor_uuid: Uuid,
        since: DateTime<Utc>,
        max_count: usize,
    ) -> Result<Vec<CheckLog>, StoreError>;
}

const MONITOR_COLUMNS: &str = "uuid, name, url, owner_email, interval_secs, timeout_ms, paused, status, last_checked_at, alert_sent, uptime, created_at";

const LOG_COLUMNS: &str = "id, monitor_uuid, timestamp, outcome, latency_ms, response_code, message";

/// LibSQL implementation of both repositories
pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    /// Create a new store from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>, StoreError> {
        Ok(self.pool.get().await?)
    }

    /// Insert many logs in one transaction
    pub async fn append_batch(&self, logs: &[CheckLog]) -> Result<usize, StoreError> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;
        for log in logs {
            tx.execute(
                "INSERT INTO check_logs (monitor_uuid, timestamp, outcome, latency_ms, response_code, message) VALUES (?, ?, ?, ?, ?, ?)",
                Params::Positional(log_values(log)),
            )
            .await?;
        }
        tx.commit().await?;
        Ok(logs.len())
    }

    /// Every log for a monitor since `since`, oldest first
    pub async fn query_range(&self, monitor_uuid: Uuid, since: DateTime<Utc>) -> Result<Vec<CheckLog>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM check_logs WHERE monitor_uuid = ? AND timestamp >= ? ORDER BY timestamp ASC, id ASC"
                ),
                params![monitor_uuid.to_string(), timestamp_to_millis(since)],
            )
            .await?;

        let mut logs = Vec::new();
        while let Some(row) = rows.next().await? {
            logs.push(log_from_row(&row)?);
        }
        Ok(logs)
    }

    async fn query_monitors(&self, sql: &str, arg: Option<String>) -> Result<Vec<Monitor>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = match arg {
            Some(value) => conn.query(sql, params![value]).await?,
            None => conn.query(sql, ()).await?,
        };

        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(monitor_from_row(&row)?);
        }
        Ok(monitors)
    }
}

fn log_values(log: &CheckLog) -> Vec<Value> {
    vec![
        log.monitor_uuid.to_string().into(),
        timestamp_to_millis(log.timestamp).into(),
        log.outcome.as_str().into(),
        (log.latency_ms as i64).into(),
        log.response_code.map(|code| code as i64).into(),
        log.message.clone().into(),
    ]
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Corrupt(format!("uuid {raw:?}: {e}")))
}

fn monitor_from_row(row: &Row) -> Result<Monitor, StoreError> {
    let uuid: String = row.get(0)?;
    let status: String = row.get(7)?;

    Ok(Monitor {
        uuid: parse_uuid(&uuid)?,
        name: row.get(1)?,
        url: row.get(2)?,
        owner_email: row.get(3)?,
        interval_secs: row.get::<i64>(4)?.max(0) as u64,
        timeout_ms: row.get::<i64>(5)?.max(0) as u64,
        paused: row.get::<i64>(6)? != 0,
        status: status.parse().map_err(|e| StoreError::Corrupt(format!("{e}")))?,
        last_checked_at: row.get::<Option<i64>>(8)?.map(millis_to_timestamp),
        alert_sent: row.get::<i64>(9)? != 0,
        uptime: row.get(10)?,
        created_at: millis_to_timestamp(row.get(11)?),
    })
}

fn log_from_row(row: &Row) -> Result<CheckLog, StoreError> {
    let monitor_uuid: String = row.get(1)?;
    let outcome: String = row.get(3)?;

    Ok(CheckLog {
        id: Some(row.get(0)?),
        monitor_uuid: parse_uuid(&monitor_uuid)?,
        timestamp: millis_to_timestamp(row.get(2)?),
        outcome: outcome.parse().map_err(|e| StoreError::Corrupt(format!("{e}")))?,
        latency_ms: row.get::<i64>(4)?.max(0) as u64,
        response_code: row.get::<Option<i64>>(5)?.map(|code| code as u16),
        message: row.get(6)?,
    })
}

#[async_trait]
impl MonitorRepository for LibsqlStore {
    async fn list_eligible(&self) -> Result<Vec<Monitor>, StoreError> {
        let sql = format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE paused = 0");
        self.query_monitors(&sql, None).await
    }

    async fn list_all(&self) -> Result<Vec<Monitor>, StoreError> {
        let sql = format!("SELECT {MONITOR_COLUMNS} FROM monitors ORDER BY created_at");
        self.query_monitors(&sql, None).await
    }

    async fn get(&self, uuid: Uuid) -> Result<Option<Monitor>, StoreError> {
        let sql = format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE uuid = ?");
        Ok(self.query_monitors(&sql, Some(uuid.to_string())).await?.into_iter().next())
    }

    async fn insert(&self, monitor: &Monitor) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.execute(
            &format!("INSERT INTO monitors ({MONITOR_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                monitor.uuid.to_string(),
                monitor.name.clone(),
                monitor.url.clone(),
                monitor.owner_email.clone(),
                monitor.interval_secs as i64,
                monitor.timeout_ms as i64,
                if monitor.paused { 1 } else { 0 },
                monitor.status.as_str(),
                monitor.last_checked_at.map(timestamp_to_millis),
                if monitor.alert_sent { 1 } else { 0 },
                monitor.uptime,
                timestamp_to_millis(monitor.created_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn update(&self, uuid: Uuid, update: &MonitorUpdate) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE monitors SET status = ?, last_checked_at = ?, alert_sent = ?, uptime = ? WHERE uuid = ?",
                params![
                    update.status.as_str(),
                    timestamp_to_millis(update.last_checked_at),
                    if update.alert_sent { 1 } else { 0 },
                    update.uptime,
                    uuid.to_string()
                ],
            )
            .await?;

        if changed == 0 {
            return Err(StoreError::NotFound(uuid));
        }
        Ok(())
    }

    async fn set_paused(&self, uuid: Uuid, paused: bool) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE monitors SET paused = ? WHERE uuid = ?",
                params![if paused { 1 } else { 0 }, uuid.to_string()],
            )
            .await?;

        if changed == 0 {
            return Err(StoreError::NotFound(uuid));
        }
        Ok(())
    }

    async fn edit(&self, uuid: Uuid, edit: &MonitorEdit) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE monitors SET name = COALESCE(?, name), url = COALESCE(?, url), owner_email = COALESCE(?, owner_email), interval_secs = COALESCE(?, interval_secs), timeout_ms = COALESCE(?, timeout_ms) WHERE uuid = ?",
                params![
                    edit.name.clone(),
                    edit.url.clone(),
                    edit.owner_email.clone(),
                    edit.interval_secs.map(|secs| secs as i64),
                    edit.timeout_ms.map(|ms| ms as i64),
                    uuid.to_string()
                ],
            )
            .await?;

        if changed == 0 {
            return Err(StoreError::NotFound(uuid));
        }
        Ok(())
    }

    async fn delete(&self, uuid: Uuid) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;
        // Monitor row first so a concurrent append sees it gone.
        tx.execute("DELETE FROM monitors WHERE uuid = ?", params![uuid.to_string()]).await?;
        tx.execute("DELETE FROM check_logs WHERE monitor_uuid = ?", params![uuid.to_string()]).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl LogRepository for LibsqlStore {
    async fn append(&self, log: &CheckLog) -> Result<i64, StoreError> {
        let conn = self.get_conn().await?;
        let mut values = log_values(log);
        values.push(log.monitor_uuid.to_string().into());

        // Existence check and insert in one statement, atomic against `delete`.
        let inserted = conn
            .execute(
                "INSERT INTO check_logs (monitor_uuid, timestamp, outcome, latency_ms, response_code, message) SELECT ?, ?, ?, ?, ?, ? WHERE EXISTS (SELECT 1 FROM monitors WHERE uuid = ?)",
                Params::Positional(values),
            )
            .await?;

        if inserted == 0 {
            return Err(StoreError::NotFound(log.monitor_uuid));
        }
        Ok(conn.last_insert_rowid())
    }

    async fn query_window(
        &self,
        monitor_uuid: Uuid,
        since: DateTime<Utc>,
        max_count: usize,
    ) -> Result<Vec<CheckLog>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM check_logs WHERE monitor_uuid = ? AND timestamp >= ? ORDER BY timestamp DESC, id DESC LIMIT ?"
                ),
                params![monitor_uuid.to_string(), timestamp_to_millis(since), max_count as i64],
            )
            .await?;

        let mut logs = Vec::new();
        while let Some(row) = rows.next().await? {
            logs.push(log_from_row(&row)?);
        }
        Ok(logs)
    }
}
