use super::collect_rows;
use crate::errors::{OptimizeError, Result};
use crate::model::{NewWeakness, WeaknessAnalysis};
use crate::storage::rows::{weakness_from_row, WEAKNESS_COLUMNS};
use crate::storage::store::{now_rfc3339, Store};
use rusqlite::{params, OptionalExtension};

pub struct WeaknessRepository<'a> {
    store: &'a Store,
}

impl<'a> WeaknessRepository<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Append-only; a second record for the same `(track, iteration)` is rejected.
    pub fn insert(&self, run_id: i64, w: &NewWeakness) -> Result<WeaknessAnalysis> {
        let ids_json = serde_json::to_string(&w.failed_test_ids)?;
        let desc_json = serde_json::to_string(&w.failed_test_descriptions)?;
        let conn = self.store.conn()?;
        conn.execute(
            "INSERT INTO weakness_analyses (run_id, prompt_id, track_id, iteration, description,
                                            failed_test_ids_json, failed_test_descriptions_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                w.prompt_id,
                w.track_id,
                w.iteration,
                w.description,
                ids_json,
                desc_json,
                now_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        let sql = format!("SELECT {WEAKNESS_COLUMNS} FROM weakness_analyses WHERE id = ?1");
        conn.query_row(&sql, params![id], weakness_from_row)
            .optional()?
            .ok_or_else(|| OptimizeError::integrity(format!("weakness {id} vanished after insert")))
    }

    pub fn get(&self, run_id: i64, track_id: i64, iteration: u32) -> Result<Option<WeaknessAnalysis>> {
        let conn = self.store.conn()?;
        let sql = format!(
            "SELECT {WEAKNESS_COLUMNS} FROM weakness_analyses
              WHERE run_id = ?1 AND track_id = ?2 AND iteration = ?3"
        );
        Ok(conn
            .query_row(&sql, params![run_id, track_id, iteration], weakness_from_row)
            .optional()?)
    }

    pub fn for_track(&self, run_id: i64, track_id: i64) -> Result<Vec<WeaknessAnalysis>> {
        let conn = self.store.conn()?;
        let sql = format!(
            "SELECT {WEAKNESS_COLUMNS} FROM weakness_analyses
              WHERE run_id = ?1 AND track_id = ?2 ORDER BY iteration"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![run_id, track_id], weakness_from_row)?;
        collect_rows(rows)
    }

    pub fn count(&self, run_id: i64) -> Result<usize> {
        let conn = self.store.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM weakness_analyses WHERE run_id = ?1",
            params![run_id],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }
}
