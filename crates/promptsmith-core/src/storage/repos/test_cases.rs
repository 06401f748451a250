use super::collect_rows;
use crate::errors::Result;
use crate::model::{GeneratedTest, TestCase, TestStage};
use crate::storage::rows::{test_case_from_row, TEST_CASE_COLUMNS};
use crate::storage::store::{now_rfc3339, Store};
use rusqlite::params;

pub struct TestCaseRepository<'a> {
    store: &'a Store,
}

impl<'a> TestCaseRepository<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn insert_many(
        &self,
        run_id: i64,
        stage: TestStage,
        tests: &[GeneratedTest],
    ) -> Result<Vec<TestCase>> {
        let created_at = now_rfc3339();
        let ids = self.store.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "INSERT INTO test_cases (run_id, input, expected_behavior, category, stage, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            let mut ids = Vec::with_capacity(tests.len());
            for t in tests {
                stmt.execute(params![
                    run_id,
                    t.input,
                    t.expected_behavior,
                    t.category,
                    stage,
                    created_at
                ])?;
                ids.push(tx.last_insert_rowid());
            }
            Ok(ids)
        })?;

        Ok(ids
            .into_iter()
            .zip(tests)
            .map(|(id, t)| TestCase {
                id,
                run_id,
                input: t.input.clone(),
                expected_behavior: t.expected_behavior.clone(),
                category: t.category,
                stage,
                created_at: created_at.clone(),
            })
            .collect())
    }

    pub fn by_stage(&self, run_id: i64, stage: TestStage) -> Result<Vec<TestCase>> {
        let conn = self.store.conn()?;
        let sql = format!(
            "SELECT {TEST_CASE_COLUMNS} FROM test_cases WHERE run_id = ?1 AND stage = ?2 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![run_id, stage], test_case_from_row)?;
        collect_rows(rows)
    }

    pub fn count(&self, run_id: i64, stage: TestStage) -> Result<usize> {
        let conn = self.store.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM test_cases WHERE run_id = ?1 AND stage = ?2",
            params![run_id, stage],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }
}
