use super::collect_rows;
use crate::errors::Result;
use crate::model::{StageResult, StageStatus};
use crate::storage::rows::{stage_result_from_row, STAGE_RESULT_COLUMNS};
use crate::storage::store::{now_rfc3339, Store};
use rusqlite::{params, OptionalExtension};

/// Per-stage completion markers used for crash recovery.
pub struct StageResultRepository<'a> {
    store: &'a Store,
}

impl<'a> StageResultRepository<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn get(&self, run_id: i64, stage_name: &str) -> Result<Option<StageResult>> {
        let conn = self.store.conn()?;
        let sql = format!(
            "SELECT {STAGE_RESULT_COLUMNS} FROM stage_results WHERE run_id = ?1 AND stage_name = ?2"
        );
        Ok(conn
            .query_row(&sql, params![run_id, stage_name], stage_result_from_row)
            .optional()?)
    }

    pub fn put(
        &self,
        run_id: i64,
        stage_name: &str,
        status: StageStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.store.conn()?;
        conn.execute(
            "INSERT INTO stage_results (run_id, stage_name, status, error, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(run_id, stage_name)
             DO UPDATE SET status = excluded.status, error = excluded.error, updated_at = excluded.updated_at",
            params![run_id, stage_name, status, error, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn list(&self, run_id: i64) -> Result<Vec<StageResult>> {
        let conn = self.store.conn()?;
        let sql = format!(
            "SELECT {STAGE_RESULT_COLUMNS} FROM stage_results WHERE run_id = ?1 ORDER BY rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![run_id], stage_result_from_row)?;
        collect_rows(rows)
    }
}
