use super::collect_rows;
use crate::errors::{OptimizeError, Result};
use crate::model::{Evaluation, NewEvaluation, TestStage};
use crate::storage::rows::{evaluation_from_row, EVALUATION_COLUMNS};
use crate::storage::store::{now_rfc3339, Store};
use rusqlite::{params, OptionalExtension};

pub struct EvaluationRepository<'a> {
    store: &'a Store,
}

impl<'a> EvaluationRepository<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Write-once: a second evaluation of the same pair is an integrity error.
    pub fn insert(&self, run_id: i64, e: &NewEvaluation) -> Result<Evaluation> {
        let conn = self.store.conn()?;
        conn.execute(
            "INSERT INTO evaluations (run_id, prompt_id, test_case_id, response, functionality, safety,
                                      consistency, edge_case_handling, reasoning, overall, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                run_id,
                e.prompt_id,
                e.test_case_id,
                e.response,
                e.scores.functionality,
                e.scores.safety,
                e.scores.consistency,
                e.scores.edge_case_handling,
                e.reasoning,
                e.overall,
                now_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        let sql = format!("SELECT {EVALUATION_COLUMNS} FROM evaluations e WHERE e.id = ?1");
        conn.query_row(&sql, params![id], evaluation_from_row)
            .optional()?
            .ok_or_else(|| OptimizeError::integrity(format!("evaluation {id} vanished after insert")))
    }

    /// Evaluations of one prompt, optionally restricted to one test stage, by test id.
    pub fn for_prompt(
        &self,
        run_id: i64,
        prompt_id: i64,
        stage: Option<TestStage>,
    ) -> Result<Vec<Evaluation>> {
        let conn = self.store.conn()?;
        let sql = format!(
            "SELECT {EVALUATION_COLUMNS}
               FROM evaluations e
               JOIN test_cases t ON t.id = e.test_case_id
              WHERE e.run_id = ?1 AND e.prompt_id = ?2 AND (?3 IS NULL OR t.stage = ?3)
              ORDER BY e.test_case_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![run_id, prompt_id, stage], evaluation_from_row)?;
        collect_rows(rows)
    }

    pub fn count(&self, run_id: i64) -> Result<usize> {
        let conn = self.store.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM evaluations WHERE run_id = ?1",
            params![run_id],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }
}
