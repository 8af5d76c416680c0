//! SQLite registry implementation.
//!
//! Provides durable storage using a SQLite database so schedules survive
//! process death and reboot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::{EntryStatus, Registry, RegistryEntry, StorageError};
use crate::core::retry::RetryState;
use crate::core::run::{Outcome, TaskRun};
use crate::core::types::{RunId, TaskName};

/// SQLite registry backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStorage {
    pool: SqlitePool,
}

type EntryRow = (
    String,
    i64,
    i64,
    String,
    String,
    i64,
    i64,
    Option<String>,
    Option<i64>,
    Option<i64>,
    i64,
    i64,
    i64,
);

type RunRow = (String, String, i64, String, i64, i64, Option<String>);

const ENTRY_COLUMNS: &str = "name, interval_ms, flex_ms, status, retry_state, attempt_count, \
     next_fire_at, last_outcome, last_run_at, last_success_at, generation, created_at, updated_at";

impl SqliteStorage {
    /// Open (or create) the registry database at the given path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// Helper functions for time conversion
fn time_to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn millis_to_time(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn duration_to_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn millis_to_duration(millis: i64) -> Duration {
    Duration::from_millis(millis.max(0) as u64)
}

fn parse_outcome(s: &str) -> Result<Outcome, StorageError> {
    Outcome::parse(s).ok_or_else(|| StorageError::SerializationError(format!("unknown outcome: {}", s)))
}

fn entry_from_row(row: EntryRow) -> Result<RegistryEntry, StorageError> {
    Ok(RegistryEntry {
        name: TaskName::new(row.0),
        interval: millis_to_duration(row.1),
        flex: millis_to_duration(row.2),
        status: EntryStatus::parse(&row.3),
        retry_state: RetryState::parse(&row.4),
        attempt_count: u32::try_from(row.5).unwrap_or(0),
        next_fire_at: millis_to_time(row.6),
        last_outcome: row.7.as_deref().map(parse_outcome).transpose()?,
        last_run_at: row.8.map(millis_to_time),
        last_success_at: row.9.map(millis_to_time),
        generation: u64::try_from(row.10).unwrap_or(0),
        created_at: millis_to_time(row.11),
        updated_at: millis_to_time(row.12),
    })
}

fn run_from_row(row: RunRow) -> Result<TaskRun, StorageError> {
    Ok(TaskRun {
        id: RunId::from_uuid(
            row.0
                .parse()
                .map_err(|e| StorageError::SerializationError(format!("invalid uuid: {}", e)))?,
        ),
        name: TaskName::new(row.1),
        attempt: u32::try_from(row.2).unwrap_or(0),
        outcome: parse_outcome(&row.3)?,
        started_at: millis_to_time(row.4),
        finished_at: millis_to_time(row.5),
        error: row.6,
    })
}

#[async_trait]
impl Registry for SqliteStorage {
    async fn insert_entry(&self, entry: RegistryEntry) -> Result<(), StorageError> {
        let result = sqlx::query(&format!(
            "INSERT INTO registry_entries ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ENTRY_COLUMNS
        ))
        .bind(entry.name.as_str())
        .bind(duration_to_millis(entry.interval))
        .bind(duration_to_millis(entry.flex))
        .bind(entry.status.as_str())
        .bind(entry.retry_state.as_str())
        .bind(i64::from(entry.attempt_count))
        .bind(time_to_millis(entry.next_fire_at))
        .bind(entry.last_outcome.map(|o| o.as_str()))
        .bind(entry.last_run_at.map(time_to_millis))
        .bind(entry.last_success_at.map(time_to_millis))
        .bind(i64::try_from(entry.generation).unwrap_or(i64::MAX))
        .bind(time_to_millis(entry.created_at))
        .bind(time_to_millis(entry.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateKey(format!("entry: {}", entry.name)))
            }
            Err(e) => Err(StorageError::Other(e.to_string())),
        }
    }

    async fn get_entry(&self, name: &TaskName) -> Result<Option<RegistryEntry>, StorageError> {
        let row: Option<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM registry_entries WHERE name = ?",
            ENTRY_COLUMNS
        ))
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        row.map(entry_from_row).transpose()
    }

    async fn update_entry(&self, entry: RegistryEntry) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE registry_entries SET
                interval_ms = ?, flex_ms = ?, status = ?, retry_state = ?, attempt_count = ?,
                next_fire_at = ?, last_outcome = ?, last_run_at = ?, last_success_at = ?,
                generation = ?, updated_at = ?
            WHERE name = ?
            "#,
        )
        .bind(duration_to_millis(entry.interval))
        .bind(duration_to_millis(entry.flex))
        .bind(entry.status.as_str())
        .bind(entry.retry_state.as_str())
        .bind(i64::from(entry.attempt_count))
        .bind(time_to_millis(entry.next_fire_at))
        .bind(entry.last_outcome.map(|o| o.as_str()))
        .bind(entry.last_run_at.map(time_to_millis))
        .bind(entry.last_success_at.map(time_to_millis))
        .bind(i64::try_from(entry.generation).unwrap_or(i64::MAX))
        .bind(time_to_millis(entry.updated_at))
        .bind(entry.name.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("entry: {}", entry.name)));
        }
        Ok(())
    }

    async fn list_entries(&self) -> Result<Vec<RegistryEntry>, StorageError> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM registry_entries ORDER BY name",
            ENTRY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn save_run(&self, run: TaskRun) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO task_runs (id, name, attempt, outcome, started_at, finished_at, error)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.name.as_str())
        .bind(i64::from(run.attempt))
        .bind(run.outcome.as_str())
        .bind(time_to_millis(run.started_at))
        .bind(time_to_millis(run.finished_at))
        .bind(&run.error)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateKey(format!("run: {}", run.id)))
            }
            Err(e) => Err(StorageError::Other(e.to_string())),
        }
    }

    async fn list_runs(&self, name: &TaskName, limit: usize) -> Result<Vec<TaskRun>, StorageError> {
        let rows: Vec<RunRow> = sqlx::query_as(
            "SELECT id, name, attempt, outcome, started_at, finished_at, error FROM task_runs \
             WHERE name = ? ORDER BY finished_at DESC, rowid DESC LIMIT ?",
        )
        .bind(name.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter().map(run_from_row).collect()
    }
}
