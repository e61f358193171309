//! Job run status: RUNNING on entry, COMPLETED or FAILED on every exit path.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::db::Db;
use crate::error::{RagsyncError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionRunState {
    Running,
    Completed,
    Failed,
}

impl CollectionRunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionRunState::Running => "RUNNING",
            CollectionRunState::Completed => "COMPLETED",
            CollectionRunState::Failed => "FAILED",
        }
    }

    /// Transitions only move forward: RUNNING → COMPLETED | FAILED
    pub fn can_transition_to(&self, next: CollectionRunState) -> bool {
        matches!(
            (self, next),
            (CollectionRunState::Running, CollectionRunState::Completed)
                | (CollectionRunState::Running, CollectionRunState::Failed)
        )
    }
}

impl fmt::Display for CollectionRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionRunState {
    type Err = RagsyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RUNNING" => Ok(CollectionRunState::Running),
            "COMPLETED" => Ok(CollectionRunState::Completed),
            "FAILED" => Ok(CollectionRunState::Failed),
            other => Err(RagsyncError::JobStatus(format!("Unknown run state: {}", other))),
        }
    }
}

/// Validate a status write against the currently stored state
fn check_transition(run_name: &str, current: Option<CollectionRunState>, next: CollectionRunState) -> Result<()> {
    let allowed = match current {
        None => next == CollectionRunState::Running,
        Some(current) => current.can_transition_to(next),
    };
    if allowed {
        Ok(())
    } else {
        Err(RagsyncError::JobStatus(format!(
            "Run {}: illegal transition {} -> {}",
            run_name,
            current.map(|s| s.as_str()).unwrap_or("<none>"),
            next
        )))
    }
}

#[async_trait]
pub trait JobStatusStore: Send + Sync {
    async fn set_status(&self, run_name: &str, status: CollectionRunState) -> Result<()>;

    async fn get_status(&self, run_name: &str) -> Result<Option<CollectionRunState>>;
}

/// Configured job status backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStoreProvider {
    Sqlite,
    Memory,
}

#[derive(Default)]
pub struct InMemoryJobStatusStore {
    runs: RwLock<HashMap<String, CollectionRunState>>,
}

impl InMemoryJobStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStatusStore for InMemoryJobStatusStore {
    async fn set_status(&self, run_name: &str, status: CollectionRunState) -> Result<()> {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        check_transition(run_name, runs.get(run_name).copied(), status)?;
        runs.insert(run_name.to_string(), status);
        Ok(())
    }

    async fn get_status(&self, run_name: &str) -> Result<Option<CollectionRunState>> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(runs.get(run_name).copied())
    }
}

/// Job runs persisted in the `job_runs` table
pub struct SqliteJobStatusStore {
    db: Db,
}

impl SqliteJobStatusStore {
    pub async fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Db::open(path).await?))
    }

    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobStatusStore for SqliteJobStatusStore {
    async fn set_status(&self, run_name: &str, status: CollectionRunState) -> Result<()> {
        let run_name = run_name.to_string();
        self.db
            .with_connection(move |conn| {
                // Read-then-write: take the write lock first so busy_timeout applies
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let current: Option<String> = tx
                    .query_row(
                        "SELECT status FROM job_runs WHERE run_name = ?1",
                        params![run_name],
                        |row| row.get(0),
                    )
                    .optional()?;
                let current = current.map(|s| s.parse::<CollectionRunState>()).transpose()?;
                check_transition(&run_name, current, status)?;

                let now = chrono::Utc::now().to_rfc3339();
                tx.execute(
                    "INSERT INTO job_runs (run_name, status, started_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)
                     ON CONFLICT(run_name) DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
                    params![run_name, status.as_str(), now],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn get_status(&self, run_name: &str) -> Result<Option<CollectionRunState>> {
        let run_name = run_name.to_string();
        self.db
            .with_connection(move |conn| {
                let status: Option<String> = conn
                    .query_row(
                        "SELECT status FROM job_runs WHERE run_name = ?1",
                        params![run_name],
                        |row| row.get(0),
                    )
                    .optional()?;
                status.map(|s| s.parse()).transpose()
            })
            .await
    }
}

/// Scoped job run. `start` records RUNNING; `finish` records the outcome
/// and hands the run's result back unchanged.
pub struct JobRun {
    store: Arc<dyn JobStatusStore>,
    run_name: String,
}

impl JobRun {
    pub async fn start(store: Arc<dyn JobStatusStore>, run_name: impl Into<String>) -> Self {
        let run = Self {
            store,
            run_name: run_name.into(),
        };
        run.record(CollectionRunState::Running).await;
        run
    }

    pub async fn finish<T>(self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.record(CollectionRunState::Completed).await,
            Err(e) => {
                log::error!("Run {} failed: {}", self.run_name, e);
                self.record(CollectionRunState::Failed).await;
            }
        }
        result
    }

    /// Best-effort: a failed status write is logged and never replaces the run outcome
    async fn record(&self, status: CollectionRunState) {
        match self.store.set_status(&self.run_name, status).await {
            Ok(()) => log::info!("Run {} is {}", self.run_name, status),
            Err(e) => log::error!("Failed to record status {} for run {}: {}", status, self.run_name, e),
        }
    }
}
