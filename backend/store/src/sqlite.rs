//! Durable SQLite-backed call session store.
//!
//! Records are stored as JSON bodies with the columns needed for lookups
//! (provider call id, status, due time) broken out and indexed.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use callforge_core::{
    Agent, CallError, CallFilter, CallRecord, CallSessionStore, CallStatus, CallUpdate,
    ConversationTurn, Directory, Driver, DriverStatus, NewCall, ProviderKind, ScheduledCall,
    ScheduledCallStatus, ScheduledCallUpdate,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS calls (
        id               TEXT PRIMARY KEY,
        provider         TEXT NOT NULL,
        provider_call_id TEXT NOT NULL,
        driver_id        TEXT NOT NULL,
        status           TEXT NOT NULL,
        updated_at       INTEGER NOT NULL,
        body             TEXT NOT NULL,
        UNIQUE(provider, provider_call_id)
    );
    CREATE INDEX IF NOT EXISTS idx_calls_driver ON calls(driver_id);
    CREATE INDEX IF NOT EXISTS idx_calls_updated ON calls(updated_at);

    CREATE TABLE IF NOT EXISTS call_turns (
        call_id TEXT NOT NULL,
        seq     INTEGER NOT NULL,
        body    TEXT NOT NULL,
        PRIMARY KEY (call_id, seq)
    );

    CREATE TABLE IF NOT EXISTS scheduled_calls (
        id           TEXT PRIMARY KEY,
        status       TEXT NOT NULL,
        scheduled_at INTEGER NOT NULL,
        body         TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_scheduled_due ON scheduled_calls(status, scheduled_at);

    CREATE TABLE IF NOT EXISTS drivers (
        id     TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        body   TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS agents (
        id   TEXT PRIMARY KEY,
        body TEXT NOT NULL
    );
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn storage(err: impl std::fmt::Display) -> CallError {
    CallError::Storage(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<String, CallError> {
    serde_json::to_string(value).map_err(storage)
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, CallError> {
    serde_json::from_str(body).map_err(storage)
}

impl SqliteStore {
    /// Create or open a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).context("Failed to open call database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize call schema")?;
        info!("SqliteStore opened at {:?}", path.as_ref());
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub async fn upsert_driver(&self, driver: &Driver) -> Result<(), CallError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO drivers (id, status, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET status=excluded.status, body=excluded.body",
            params![driver.id, driver.status.as_str(), encode(driver)?],
        )
        .map_err(storage)?;
        Ok(())
    }

    pub async fn upsert_agent(&self, agent: &Agent) -> Result<(), CallError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO agents (id, body) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET body=excluded.body",
            params![agent.id, encode(agent)?],
        )
        .map_err(storage)?;
        Ok(())
    }
}

fn load_call(conn: &Connection, id: Uuid) -> Result<Option<CallRecord>, CallError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM calls WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage)?;
    body.as_deref().map(decode).transpose()
}

fn save_call(conn: &Connection, record: &CallRecord) -> Result<(), CallError> {
    conn.execute(
        "UPDATE calls SET status = ?2, updated_at = ?3, body = ?4 WHERE id = ?1",
        params![
            record.id.to_string(),
            record.status.as_str(),
            record.updated_at.timestamp_millis(),
            encode(record)?,
        ],
    )
    .map_err(storage)?;
    Ok(())
}

fn load_scheduled(conn: &Connection, id: Uuid) -> Result<Option<ScheduledCall>, CallError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM scheduled_calls WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage)?;
    body.as_deref().map(decode).transpose()
}

fn save_scheduled(conn: &Connection, scheduled: &ScheduledCall) -> Result<(), CallError> {
    conn.execute(
        "INSERT INTO scheduled_calls (id, status, scheduled_at, body) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
           status=excluded.status,
           scheduled_at=excluded.scheduled_at,
           body=excluded.body",
        params![
            scheduled.id.to_string(),
            scheduled.status.as_str(),
            scheduled.scheduled_at.timestamp_millis(),
            encode(scheduled)?,
        ],
    )
    .map_err(storage)?;
    Ok(())
}

#[async_trait]
impl CallSessionStore for SqliteStore {
    async fn find_call_by_provider_id(
        &self,
        provider: ProviderKind,
        provider_call_id: &str,
    ) -> Result<Option<CallRecord>, CallError> {
        let conn = self.conn.lock().await;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM calls WHERE provider = ?1 AND provider_call_id = ?2",
                params![provider.as_str(), provider_call_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        body.as_deref().map(decode).transpose()
    }

    async fn call(&self, id: Uuid) -> Result<Option<CallRecord>, CallError> {
        let conn = self.conn.lock().await;
        load_call(&conn, id)
    }

    async fn create_call(&self, call: NewCall) -> Result<CallRecord, CallError> {
        let record = CallRecord::new(call, Utc::now());
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO calls
               (id, provider, provider_call_id, driver_id, status, updated_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.to_string(),
                record.provider.as_str(),
                record.provider_call_id,
                record.driver_id,
                record.status.as_str(),
                record.updated_at.timestamp_millis(),
                encode(&record)?,
            ],
        )
        .map_err(storage)?;
        if inserted == 0 {
            return Err(CallError::Validation(format!(
                "call {} is already registered for {}",
                record.provider_call_id, record.provider
            )));
        }
        debug!(call_id = %record.id, provider = %record.provider, "Stored call");
        Ok(record)
    }

    async fn update_call(&self, id: Uuid, update: CallUpdate) -> Result<CallRecord, CallError> {
        let conn = self.conn.lock().await;
        let mut record = load_call(&conn, id)?
            .ok_or_else(|| CallError::NotFound(format!("call {id}")))?;
        if record.apply(update, Utc::now()) {
            save_call(&conn, &record)?;
        }
        Ok(record)
    }

    async fn list_calls(&self, filter: &CallFilter) -> Result<Vec<CallRecord>, CallError> {
        let mut sql = String::from("SELECT body FROM calls WHERE 1=1");
        let mut args: Vec<SqlValue> = Vec::new();

        if let Some(id) = filter.call_id {
            args.push(SqlValue::Text(id.to_string()));
            sql.push_str(&format!(" AND id = ?{}", args.len()));
        }
        if let Some(driver_id) = &filter.driver_id {
            args.push(SqlValue::Text(driver_id.clone()));
            sql.push_str(&format!(" AND driver_id = ?{}", args.len()));
        }
        if filter.active_only {
            let active: Vec<String> = CallStatus::ALL
                .iter()
                .filter(|s| !s.is_terminal())
                .map(|s| format!("'{}'", s.as_str()))
                .collect();
            sql.push_str(&format!(" AND status IN ({})", active.join(", ")));
        }
        if let Some(before) = filter.updated_before {
            args.push(SqlValue::Integer(before.timestamp_millis()));
            sql.push_str(&format!(" AND updated_at < ?{}", args.len()));
        }
        sql.push_str(" ORDER BY updated_at DESC");
        if filter.limit > 0 {
            sql.push_str(&format!(" LIMIT {}", filter.limit));
        }

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql).map_err(storage)?;
        let bodies: Vec<String> = stmt
            .query_map(params_from_iter(args), |row| row.get(0))
            .map_err(storage)?
            .collect::<rusqlite::Result<_>>()
            .map_err(storage)?;
        bodies.iter().map(|b| decode(b)).collect()
    }

    async fn append_turn(
        &self,
        call_id: Uuid,
        expected_len: usize,
        turn: ConversationTurn,
    ) -> Result<bool, CallError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(storage)?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM calls WHERE id = ?1)",
                params![call_id.to_string()],
                |row| row.get(0),
            )
            .map_err(storage)?;
        if !exists {
            return Err(CallError::NotFound(format!("call {call_id}")));
        }

        let count: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM call_turns WHERE call_id = ?1",
                params![call_id.to_string()],
                |row| row.get(0),
            )
            .map_err(storage)?;
        if count as usize != expected_len {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO call_turns (call_id, seq, body) VALUES (?1, ?2, ?3)",
            params![call_id.to_string(), expected_len as i64, encode(&turn)?],
        )
        .map_err(storage)?;
        tx.commit().map_err(storage)?;
        Ok(true)
    }

    async fn turns(&self, call_id: Uuid) -> Result<Vec<ConversationTurn>, CallError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT body FROM call_turns WHERE call_id = ?1 ORDER BY seq")
            .map_err(storage)?;
        let bodies: Vec<String> = stmt
            .query_map(params![call_id.to_string()], |row| row.get(0))
            .map_err(storage)?
            .collect::<rusqlite::Result<_>>()
            .map_err(storage)?;
        bodies.iter().map(|b| decode(b)).collect()
    }

    async fn find_due_scheduled_calls(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledCall>, CallError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT body FROM scheduled_calls
                 WHERE status = ?1 AND scheduled_at <= ?2
                 ORDER BY scheduled_at LIMIT ?3",
            )
            .map_err(storage)?;
        let bodies: Vec<String> = stmt
            .query_map(
                params![
                    ScheduledCallStatus::Pending.as_str(),
                    now.timestamp_millis(),
                    limit as i64
                ],
                |row| row.get(0),
            )
            .map_err(storage)?
            .collect::<rusqlite::Result<_>>()
            .map_err(storage)?;
        bodies.iter().map(|b| decode(b)).collect()
    }

    async fn scheduled_call(&self, id: Uuid) -> Result<Option<ScheduledCall>, CallError> {
        let conn = self.conn.lock().await;
        load_scheduled(&conn, id)
    }

    async fn create_scheduled_call(&self, call: ScheduledCall) -> Result<ScheduledCall, CallError> {
        let conn = self.conn.lock().await;
        save_scheduled(&conn, &call)?;
        Ok(call)
    }

    async fn update_scheduled_call(
        &self,
        id: Uuid,
        update: ScheduledCallUpdate,
    ) -> Result<ScheduledCall, CallError> {
        let conn = self.conn.lock().await;
        let mut scheduled = load_scheduled(&conn, id)?
            .ok_or_else(|| CallError::NotFound(format!("scheduled call {id}")))?;
        scheduled.apply(update);
        save_scheduled(&conn, &scheduled)?;
        Ok(scheduled)
    }

    async fn update_driver_status(&self, driver_id: &str, status: DriverStatus) -> Result<(), CallError> {
        let conn = self.conn.lock().await;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM drivers WHERE id = ?1",
                params![driver_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        let mut driver: Driver = match body {
            Some(body) => decode(&body)?,
            None => return Err(CallError::NotFound(format!("driver {driver_id}"))),
        };
        driver.status = status;
        conn.execute(
            "UPDATE drivers SET status = ?2, body = ?3 WHERE id = ?1",
            params![driver_id, status.as_str(), encode(&driver)?],
        )
        .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl Directory for SqliteStore {
    async fn driver(&self, id: &str) -> Result<Option<Driver>, CallError> {
        let conn = self.conn.lock().await;
        let body: Option<String> = conn
            .query_row("SELECT body FROM drivers WHERE id = ?1", params![id], |row| row.get(0))
            .optional()
            .map_err(storage)?;
        body.as_deref().map(decode).transpose()
    }

    async fn agent(&self, id: &str) -> Result<Option<Agent>, CallError> {
        let conn = self.conn.lock().await;
        let body: Option<String> = conn
            .query_row("SELECT body FROM agents WHERE id = ?1", params![id], |row| row.get(0))
            .optional()
            .map_err(storage)?;
        body.as_deref().map(decode).transpose()
    }
}
