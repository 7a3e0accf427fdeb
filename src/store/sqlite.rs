//! SQLite-backed store

use super::schema::init_schema;
use super::{Store, StoreError};
use crate::workflow::WorkflowRun;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Summary row of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub run_id: String,
    pub workflow_name: String,
    pub status: String,
    pub duration_ms: i64,
    pub failed_step: Option<String>,
    pub error_message: Option<String>,
    pub completed_steps: i64,
    pub started_at: String,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database, creating parent directories as needed
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Record a finished run; recording the same run twice keeps one row
    pub fn record_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();

        self.conn()?.execute(
            "INSERT INTO workflow_runs (run_id, workflow_name, status, duration_ms, failed_step, error_message, completed_steps, started_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                duration_ms = excluded.duration_ms,
                failed_step = excluded.failed_step,
                error_message = excluded.error_message,
                completed_steps = excluded.completed_steps",
            (
                &run.run_id,
                &run.workflow_id,
                run.status.to_string(),
                run.duration_ms as i64,
                &run.failed_node_id,
                &run.error,
                run.records.len() as i64,
                run.started_at.to_rfc3339(),
                &now,
            ),
        )?;

        Ok(())
    }

    /// Most recent runs first
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunHistoryEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, workflow_name, status, duration_ms, failed_step, error_message, completed_steps, started_at
             FROM workflow_runs
             ORDER BY started_at DESC, id DESC
             LIMIT ?1",
        )?;

        let runs = stmt
            .query_map([limit as i64], |row| {
                Ok(RunHistoryEntry {
                    run_id: row.get(0)?,
                    workflow_name: row.get(1)?,
                    status: row.get(2)?,
                    duration_ms: row.get(3)?,
                    failed_step: row.get(4)?,
                    error_message: row.get(5)?,
                    completed_steps: row.get(6)?,
                    started_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(runs)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let body = serde_json::to_string(value)?;

        self.conn()?.execute(
            "INSERT INTO records (key, value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            (key, &body, &now, &now),
        )?;

        Ok(())
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let body: Option<String> = self
            .conn()?
            .query_row("SELECT value FROM records WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{RunStatus, create_step, create_workflow};
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("nested/dayflow.db")).unwrap();

        store.upsert("daily-log:2024-05-01", &json!({"n": 1})).await.unwrap();
        store.upsert("daily-log:2024-05-01", &json!({"n": 2})).await.unwrap();

        assert_eq!(
            store.find_by_key("daily-log:2024-05-01").await.unwrap(),
            Some(json!({"n": 2}))
        );
        assert_eq!(store.find_by_key("daily-log:2024-05-02").await.unwrap(), None);

        let count: i64 = store
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dayflow.db");

        SqliteStore::open(&path)
            .unwrap()
            .upsert("k", &json!(["a", "b"]))
            .await
            .unwrap();

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.find_by_key("k").await.unwrap(), Some(json!(["a", "b"])));
    }

    #[tokio::test]
    async fn test_record_and_list_runs() {
        let store = SqliteStore::in_memory().unwrap();

        let ok = create_workflow::<i64>("ok")
            .then(create_step("inc", |ctx: crate::workflow::StepContext<i64>| async move {
                Ok(*ctx.input() + 1)
            }))
            .commit()
            .unwrap();
        let report = ok.run(1).await.unwrap();
        store.record_run(&report.run).unwrap();
        // Re-recording the same run keeps a single row
        store.record_run(&report.run).unwrap();

        let failing = create_workflow::<i64>("failing")
            .then(create_step("boom", |_ctx: crate::workflow::StepContext<i64>| async move {
                Err::<i64, _>(anyhow::anyhow!("boom"))
            }))
            .commit()
            .unwrap();
        let failure = failing.run(1).await.unwrap_err();
        store.record_run(&failure.run).unwrap();

        let runs = store.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 2);

        let failed = runs.iter().find(|r| r.workflow_name == "failing").unwrap();
        assert_eq!(failed.status, RunStatus::Failed.to_string());
        assert_eq!(failed.failed_step.as_deref(), Some("boom"));
        assert!(failed.error_message.as_deref().unwrap().contains("boom"));

        let succeeded = runs.iter().find(|r| r.workflow_name == "ok").unwrap();
        assert_eq!(succeeded.status, "succeeded");
        assert_eq!(succeeded.completed_steps, 1);

        assert_eq!(store.recent_runs(1).unwrap().len(), 1);
    }
}
