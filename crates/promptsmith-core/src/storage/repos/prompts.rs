use super::collect_rows;
use crate::errors::{OptimizeError, Result};
use crate::model::{NewPrompt, Prompt, PromptStage, TestStage};
use crate::storage::rows::{prompt_from_row, PROMPT_COLUMNS};
use crate::storage::store::{now_rfc3339, Store};
use rusqlite::{params, Connection, OptionalExtension};

pub struct PromptRepository<'a> {
    store: &'a Store,
}

fn get_in(conn: &Connection, run_id: i64, id: i64) -> Result<Option<Prompt>> {
    let sql = format!("SELECT {PROMPT_COLUMNS} FROM prompts WHERE id = ?1 AND run_id = ?2");
    Ok(conn
        .query_row(&sql, params![id, run_id], prompt_from_row)
        .optional()?)
}

fn insert_in(conn: &Connection, run_id: i64, p: &NewPrompt) -> Result<Prompt> {
    if let Some(parent_id) = p.parent_prompt_id {
        let parent = get_in(conn, run_id, parent_id)?.ok_or_else(|| {
            OptimizeError::integrity(format!(
                "parent prompt {parent_id} does not exist in run {run_id}"
            ))
        })?;
        if p.iteration <= parent.iteration {
            return Err(OptimizeError::integrity(format!(
                "child iteration {} must exceed parent {} iteration {}",
                p.iteration, parent_id, parent.iteration
            )));
        }
    }

    let stage = p.stage.unwrap_or(PromptStage::Initial);
    conn.execute(
        "INSERT INTO prompts (run_id, text, stage, strategy, iteration, track_id, parent_prompt_id, is_baseline, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            run_id,
            p.text,
            stage,
            p.strategy,
            p.iteration,
            p.track_id,
            p.parent_prompt_id,
            p.is_baseline,
            now_rfc3339()
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_in(conn, run_id, id)?
        .ok_or_else(|| OptimizeError::integrity(format!("prompt {id} vanished after insert")))
}

impl<'a> PromptRepository<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Rejects a parent outside the run or a child whose iteration does not
    /// exceed its parent's.
    pub fn insert(&self, run_id: i64, p: &NewPrompt) -> Result<Prompt> {
        self.store.with_tx(|tx| insert_in(tx, run_id, p))
    }

    /// All-or-nothing batch insert.
    pub fn insert_many(&self, run_id: i64, prompts: &[NewPrompt]) -> Result<Vec<Prompt>> {
        self.store.with_tx(|tx| {
            prompts
                .iter()
                .map(|p| insert_in(tx, run_id, p))
                .collect::<Result<Vec<_>>>()
        })
    }

    pub fn get(&self, run_id: i64, id: i64) -> Result<Prompt> {
        let conn = self.store.conn()?;
        get_in(&conn, run_id, id)?
            .ok_or_else(|| OptimizeError::integrity(format!("prompt {id} not found in run {run_id}")))
    }

    fn query(&self, where_sql: &str, params: impl rusqlite::Params) -> Result<Vec<Prompt>> {
        let conn = self.store.conn()?;
        let sql = format!("SELECT {PROMPT_COLUMNS} FROM prompts WHERE {where_sql}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params, prompt_from_row)?;
        collect_rows(rows)
    }

    pub fn all(&self, run_id: i64) -> Result<Vec<Prompt>> {
        self.query("run_id = ?1 ORDER BY id", params![run_id])
    }

    pub fn by_stage(&self, run_id: i64, stage: PromptStage) -> Result<Vec<Prompt>> {
        self.query("run_id = ?1 AND stage = ?2 ORDER BY id", params![run_id, stage])
    }

    /// Prompts that have not been rewritten by a refinement track.
    pub fn candidates(&self, run_id: i64) -> Result<Vec<Prompt>> {
        self.query(
            "run_id = ?1 AND track_id IS NULL ORDER BY id",
            params![run_id],
        )
    }

    pub fn baseline(&self, run_id: i64) -> Result<Option<Prompt>> {
        Ok(self
            .query("run_id = ?1 AND is_baseline = 1", params![run_id])?
            .into_iter()
            .next())
    }

    /// Untracked prompts scored on `stage`, highest score first.
    ///
    /// Equal scores keep insertion order; the full tie-break is the caller's.
    pub fn top_by_score(&self, run_id: i64, stage: TestStage) -> Result<Vec<Prompt>> {
        let column = match stage {
            TestStage::Quick => "quick_score",
            TestStage::Rigorous => "rigorous_score",
        };
        self.query(
            &format!(
                "run_id = ?1 AND track_id IS NULL AND {column} IS NOT NULL
                 ORDER BY {column} DESC, id ASC"
            ),
            params![run_id],
        )
    }

    pub fn latest_in_track(&self, run_id: i64, track_id: i64) -> Result<Option<Prompt>> {
        Ok(self
            .query(
                "run_id = ?1 AND track_id = ?2 ORDER BY iteration DESC, id DESC LIMIT 1",
                params![run_id, track_id],
            )?
            .into_iter()
            .next())
    }

    /// Ancestors of `prompt_id` followed by the prompt itself, oldest first.
    pub fn lineage(&self, run_id: i64, prompt_id: i64) -> Result<Vec<Prompt>> {
        let conn = self.store.conn()?;
        let sql = format!(
            "WITH RECURSIVE chain(id, depth) AS (
                SELECT id, 0 FROM prompts WHERE id = ?1 AND run_id = ?2
                UNION ALL
                SELECT p.parent_prompt_id, chain.depth + 1
                  FROM prompts p JOIN chain ON p.id = chain.id
                 WHERE p.parent_prompt_id IS NOT NULL
             )
             SELECT {cols} FROM prompts JOIN chain ON prompts.id = chain.id
              WHERE prompts.run_id = ?2
              ORDER BY chain.depth DESC",
            cols = PROMPT_COLUMNS
                .split(", ")
                .map(|c| format!("prompts.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![prompt_id, run_id], prompt_from_row)?;
        collect_rows(rows)
    }

    /// Makes `ids` the selection at `stage`.
    ///
    /// Untracked prompts at `stage` or above first drop back to the stage
    /// below, so a repeated selection replaces the earlier one. Every id must
    /// sit at that lower stage once the reset is done.
    pub fn promote(&self, run_id: i64, ids: &[i64], stage: PromptStage) -> Result<()> {
        let (floor, reset): (PromptStage, &[PromptStage]) = match stage {
            PromptStage::QuickFilter => (
                PromptStage::Initial,
                &[PromptStage::QuickFilter, PromptStage::Rigorous],
            ),
            PromptStage::Rigorous => (PromptStage::QuickFilter, &[PromptStage::Rigorous]),
            other => {
                return Err(OptimizeError::integrity(format!(
                    "prompts cannot be selected into the {other} stage"
                )))
            }
        };

        self.store.with_tx(|tx| {
            for from in reset {
                tx.execute(
                    "UPDATE prompts SET stage = ?1 WHERE run_id = ?2 AND track_id IS NULL AND stage = ?3",
                    params![floor, run_id, from],
                )?;
            }
            for id in ids {
                let current = get_in(tx, run_id, *id)?.ok_or_else(|| {
                    OptimizeError::integrity(format!(
                        "cannot promote missing prompt {id} in run {run_id}"
                    ))
                })?;
                if current.stage != floor {
                    return Err(OptimizeError::integrity(format!(
                        "prompt {id} is at the {} stage, not {floor}; cannot promote to {stage}",
                        current.stage
                    )));
                }
                tx.execute(
                    "UPDATE prompts SET stage = ?1 WHERE id = ?2 AND run_id = ?3",
                    params![stage, id, run_id],
                )?;
            }
            Ok(())
        })
    }

    /// Writes the stage score and recomputes `average_score` from the populated ones.
    pub fn record_score(
        &self,
        run_id: i64,
        id: i64,
        stage: TestStage,
        score: f64,
    ) -> Result<Prompt> {
        self.store.with_tx(|tx| {
            let mut prompt = get_in(tx, run_id, id)?.ok_or_else(|| {
                OptimizeError::integrity(format!("prompt {id} not found in run {run_id}"))
            })?;
            match stage {
                TestStage::Quick => prompt.quick_score = Some(score),
                TestStage::Rigorous => prompt.rigorous_score = Some(score),
            }
            prompt.average_score = prompt.populated_average();
            tx.execute(
                "UPDATE prompts SET quick_score = ?1, rigorous_score = ?2, average_score = ?3
                 WHERE id = ?4 AND run_id = ?5",
                params![
                    prompt.quick_score,
                    prompt.rigorous_score,
                    prompt.average_score,
                    id,
                    run_id
                ],
            )?;
            Ok(prompt)
        })
    }

    pub fn count(&self, run_id: i64) -> Result<usize> {
        let conn = self.store.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM prompts WHERE run_id = ?1",
            params![run_id],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }
}
