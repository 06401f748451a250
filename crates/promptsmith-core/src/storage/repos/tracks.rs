use super::collect_rows;
use crate::errors::Result;
use crate::model::{ConvergenceReason, TrackOutcome, TrackStatus};
use crate::storage::rows::{track_from_row, TRACK_COLUMNS};
use crate::storage::store::{now_rfc3339, Store};
use rusqlite::{params, OptionalExtension};

/// Terminal markers for refinement tracks.
pub struct TrackRepository<'a> {
    store: &'a Store,
}

impl<'a> TrackRepository<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Registers a track as running. Terminal markers are left untouched.
    pub fn start(&self, run_id: i64, track_id: i64, seed_prompt_id: i64) -> Result<()> {
        let conn = self.store.conn()?;
        conn.execute(
            "INSERT INTO refinement_tracks (run_id, track_id, seed_prompt_id, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(run_id, track_id) DO NOTHING",
            params![
                run_id,
                track_id,
                seed_prompt_id,
                TrackStatus::Running,
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn finish(
        &self,
        run_id: i64,
        track_id: i64,
        status: TrackStatus,
        reason: Option<ConvergenceReason>,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.store.conn()?;
        conn.execute(
            "UPDATE refinement_tracks SET status = ?1, reason = ?2, error = ?3, updated_at = ?4
              WHERE run_id = ?5 AND track_id = ?6",
            params![status, reason, error, now_rfc3339(), run_id, track_id],
        )?;
        Ok(())
    }

    /// Clears a failed marker so the track can be retried on a forced resume.
    pub fn reopen(&self, run_id: i64, track_id: i64) -> Result<()> {
        self.finish(run_id, track_id, TrackStatus::Running, None, None)
    }

    pub fn get(&self, run_id: i64, track_id: i64) -> Result<Option<TrackOutcome>> {
        let conn = self.store.conn()?;
        let sql = format!(
            "SELECT {TRACK_COLUMNS} FROM refinement_tracks WHERE run_id = ?1 AND track_id = ?2"
        );
        Ok(conn
            .query_row(&sql, params![run_id, track_id], track_from_row)
            .optional()?)
    }

    pub fn list(&self, run_id: i64) -> Result<Vec<TrackOutcome>> {
        let conn = self.store.conn()?;
        let sql = format!(
            "SELECT {TRACK_COLUMNS} FROM refinement_tracks WHERE run_id = ?1 ORDER BY track_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![run_id], track_from_row)?;
        collect_rows(rows)
    }
}
