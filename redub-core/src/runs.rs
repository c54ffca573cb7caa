//! Durable record of pipeline runs, one row per item.
//!
//! The row is advisory: artifact existence stays the source of truth for
//! progress, the registry only adds which stage is active and why a run failed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;

use crate::pipeline::PipelineStage;

const RUNS_SCHEMA: &str = include_str!("../../sql/runs.sql");

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to open run database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on run database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("run database path not configured")]
    MissingStore,
    #[error("invalid run state: {0}")]
    InvalidState(String),
    #[error("failed to prepare run database directory {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type RunResult<T> = Result<T, RunError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Complete,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Complete => "complete",
            RunState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunState {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(RunError::InvalidState(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub item_name: String,
    pub source_path: String,
    pub stage: PipelineStage,
    pub state: RunState,
    pub failure_reason: Option<String>,
    pub attempt: i64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            item_name: row.get("item_name")?,
            source_path: row.get("source_path")?,
            stage: row
                .get::<_, String>("stage")?
                .parse()
                .unwrap_or(PipelineStage::Uploaded),
            state: row
                .get::<_, String>("state")?
                .parse()
                .unwrap_or(RunState::Running),
            failure_reason: row.get("failure_reason")?,
            attempt: row.get("attempt")?,
            started_at: to_utc(row.get("started_at")?),
            updated_at: to_utc(row.get("updated_at")?),
            finished_at: row.get::<_, Option<NaiveDateTime>>("finished_at")?.map(to_utc),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub state: Option<RunState>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RunStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for RunStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl RunStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> RunResult<RunStore> {
        let path = self.path.ok_or(RunError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(RunStore { path, flags })
    }
}

#[derive(Debug, Clone)]
pub struct RunStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl RunStore {
    pub fn builder() -> RunStoreBuilder {
        RunStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> RunResult<Self> {
        RunStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> RunResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            RunError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| RunError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    /// Creates the database file and schema if needed.
    pub fn initialize(&self) -> RunResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| RunError::Io {
                source,
                path: parent.to_path_buf(),
            })?;
        }
        let conn = self.open()?;
        conn.execute_batch(RUNS_SCHEMA)?;
        Ok(())
    }

    /// Starts or restarts the run for `item`. A restart bumps the attempt counter
    /// and clears any previous failure.
    pub fn begin(&self, item: &str, source_path: &Path) -> RunResult<RunRecord> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let now = Utc::now().naive_utc();
        let previous: Option<i64> = tx
            .query_row(
                "SELECT attempt FROM runs WHERE item_name = ?1",
                [item],
                |row| row.get(0),
            )
            .optional()?;
        let attempt = previous.map(|value| value + 1).unwrap_or(1);
        tx.execute(
            "INSERT OR REPLACE INTO runs (
                item_name, source_path, stage, state, failure_reason, attempt,
                started_at, updated_at, finished_at
            ) VALUES (?1, ?2, ?3, 'running', NULL, ?4, ?5, ?5, NULL)",
            params![
                item,
                source_path.display().to_string(),
                PipelineStage::Uploaded.as_str(),
                attempt,
                now
            ],
        )?;
        let record = tx.query_row("SELECT * FROM runs WHERE item_name = ?1", [item], |row| {
            RunRecord::from_row(row)
        })?;
        tx.commit()?;
        Ok(record)
    }

    pub fn advance(&self, item: &str, stage: PipelineStage) -> RunResult<bool> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE runs SET stage = ?2, updated_at = ?3 WHERE item_name = ?1 AND state = 'running'",
            params![item, stage.as_str(), Utc::now().naive_utc()],
        )?;
        Ok(changed > 0)
    }

    pub fn complete(&self, item: &str) -> RunResult<bool> {
        let conn = self.open()?;
        let now = Utc::now().naive_utc();
        let changed = conn.execute(
            "UPDATE runs SET stage = ?2, state = 'complete', failure_reason = NULL,
                updated_at = ?3, finished_at = ?3
             WHERE item_name = ?1",
            params![item, PipelineStage::Complete.as_str(), now],
        )?;
        Ok(changed > 0)
    }

    /// Marks the run failed. `stage` is the stage that was running.
    pub fn fail(&self, item: &str, stage: PipelineStage, reason: &str) -> RunResult<bool> {
        let conn = self.open()?;
        let now = Utc::now().naive_utc();
        let changed = conn.execute(
            "UPDATE runs SET stage = ?2, state = 'failed', failure_reason = ?3,
                updated_at = ?4, finished_at = ?4
             WHERE item_name = ?1",
            params![item, stage.as_str(), reason, now],
        )?;
        Ok(changed > 0)
    }

    pub fn get(&self, item: &str) -> RunResult<Option<RunRecord>> {
        let conn = self.open()?;
        let record = conn
            .query_row("SELECT * FROM runs WHERE item_name = ?1", [item], |row| {
                RunRecord::from_row(row)
            })
            .optional()?;
        Ok(record)
    }

    pub fn list(&self, filter: &RunFilter) -> RunResult<Vec<RunRecord>> {
        let conn = self.open()?;
        let mut query = String::from("SELECT * FROM runs");
        let mut params: Vec<Value> = Vec::new();
        if let Some(state) = filter.state {
            query.push_str(" WHERE state = ?");
            params.push(Value::Text(state.as_str().to_string()));
        }
        query.push_str(" ORDER BY updated_at DESC, item_name ASC");
        if let Some(limit) = filter.limit {
            query.push_str(" LIMIT ?");
            params.push(Value::Integer(limit as i64));
        }
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(
            params.iter().map(|value| value as &dyn rusqlite::ToSql),
        ))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(RunRecord::from_row(row)?);
        }
        Ok(records)
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA busy_timeout = 5000;\n",
    )
}

fn to_utc(value: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(value, Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn run_state_round_trips_through_text() {
        for state in [RunState::Running, RunState::Complete, RunState::Failed] {
            assert_eq!(state.as_str().parse::<RunState>().unwrap(), state);
        }
        assert!("paused".parse::<RunState>().is_err());
    }

    #[test]
    fn builder_requires_path() {
        assert!(matches!(
            RunStore::builder().build(),
            Err(RunError::MissingStore)
        ));
    }

    #[test]
    fn initialize_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let store = RunStore::new(dir.path().join("data/runs.sqlite")).unwrap();
        store.initialize().unwrap();
        assert!(store.path().exists());
        assert!(store.get("missing").unwrap().is_none());
    }
}
