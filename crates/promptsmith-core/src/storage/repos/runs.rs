use super::collect_rows;
use crate::config::OptimizerConfig;
use crate::errors::{OptimizeError, Result};
use crate::model::{Run, RunStatus, TaskSpec};
use crate::storage::rows::{run_from_row, RUN_COLUMNS};
use crate::storage::store::{now_rfc3339, Store};
use rusqlite::{params, OptionalExtension};

pub struct RunRepository<'a> {
    store: &'a Store,
}

impl<'a> RunRepository<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn create(&self, task: &TaskSpec, config: &OptimizerConfig) -> Result<i64> {
        let task_json = serde_json::to_string(task)?;
        let config_json = serde_json::to_string(config)?;
        let conn = self.store.conn()?;
        conn.execute(
            "INSERT INTO runs (task_json, config_json, started_at, status) VALUES (?1, ?2, ?3, ?4)",
            params![task_json, config_json, now_rfc3339(), RunStatus::Running],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, run_id: i64) -> Result<Run> {
        let conn = self.store.conn()?;
        let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1");
        conn.query_row(&sql, params![run_id], run_from_row)
            .optional()?
            .ok_or(OptimizeError::RunNotFound(run_id))
    }

    /// Most recent first.
    pub fn list(&self) -> Result<Vec<Run>> {
        let conn = self.store.conn()?;
        let sql = format!("SELECT {RUN_COLUMNS} FROM runs ORDER BY id DESC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], run_from_row)?;
        collect_rows(rows)
    }

    pub fn latest_id(&self) -> Result<Option<i64>> {
        let conn = self.store.conn()?;
        let id = conn
            .query_row("SELECT MAX(id) FROM runs", [], |r| r.get::<_, Option<i64>>(0))?;
        Ok(id)
    }

    pub fn mark_running(&self, run_id: i64) -> Result<()> {
        self.update_status(run_id, RunStatus::Running, None)
    }

    /// Terminal status; `completed_at` is stamped for both outcomes.
    pub fn finalize(&self, run_id: i64, status: RunStatus, error: Option<&str>) -> Result<()> {
        self.update_status(run_id, status, error)
    }

    fn update_status(&self, run_id: i64, status: RunStatus, error: Option<&str>) -> Result<()> {
        let completed_at = match status {
            RunStatus::Running => None,
            _ => Some(now_rfc3339()),
        };
        let conn = self.store.conn()?;
        let n = conn.execute(
            "UPDATE runs SET status = ?1, completed_at = ?2, error = ?3 WHERE id = ?4",
            params![status, completed_at, error, run_id],
        )?;
        if n == 0 {
            return Err(OptimizeError::RunNotFound(run_id));
        }
        Ok(())
    }

    pub fn set_champion(&self, run_id: i64, prompt_id: i64, total_evaluations: i64) -> Result<()> {
        let conn = self.store.conn()?;
        conn.execute(
            "UPDATE runs SET champion_prompt_id = ?1, total_evaluations = ?2 WHERE id = ?3",
            params![prompt_id, total_evaluations, run_id],
        )?;
        Ok(())
    }
}
