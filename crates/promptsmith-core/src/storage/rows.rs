//! Row to entity conversion. Each `*_COLUMNS` list matches the index order
//! read by the `from_row` helper next to it.

use crate::model::{
    ConvergenceReason, Evaluation, Prompt, PromptStage, Run, RunStatus, StageResult, StageStatus,
    SubScores, TaskSpec, TestCase, TestCategory, TestStage, TrackOutcome, TrackStatus,
    WeaknessAnalysis,
};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::Row;

macro_rules! sql_text_enum {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    let s = value.as_str()?;
                    <$ty>::parse(s).ok_or_else(|| {
                        FromSqlError::Other(format!("unknown {} value {:?}", stringify!($ty), s).into())
                    })
                }
            }
        )+
    };
}

sql_text_enum!(
    RunStatus,
    PromptStage,
    TestCategory,
    TestStage,
    StageStatus,
    ConvergenceReason,
    TrackStatus,
);

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub const RUN_COLUMNS: &str =
    "id, task_json, started_at, completed_at, status, champion_prompt_id, total_evaluations, error";

pub fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    let task: TaskSpec = json_column(row, 1)?;
    Ok(Run {
        id: row.get(0)?,
        task,
        started_at: row.get(2)?,
        completed_at: row.get(3)?,
        status: row.get(4)?,
        champion_prompt_id: row.get(5)?,
        total_evaluations: row.get(6)?,
        error: row.get(7)?,
    })
}

pub const PROMPT_COLUMNS: &str = "id, run_id, text, stage, strategy, quick_score, rigorous_score, \
     average_score, iteration, track_id, parent_prompt_id, is_baseline, created_at";

pub fn prompt_from_row(row: &Row<'_>) -> rusqlite::Result<Prompt> {
    Ok(Prompt {
        id: row.get(0)?,
        run_id: row.get(1)?,
        text: row.get(2)?,
        stage: row.get(3)?,
        strategy: row.get(4)?,
        quick_score: row.get(5)?,
        rigorous_score: row.get(6)?,
        average_score: row.get(7)?,
        iteration: row.get(8)?,
        track_id: row.get(9)?,
        parent_prompt_id: row.get(10)?,
        is_baseline: row.get(11)?,
        created_at: row.get(12)?,
    })
}

pub const TEST_CASE_COLUMNS: &str =
    "id, run_id, input, expected_behavior, category, stage, created_at";

pub fn test_case_from_row(row: &Row<'_>) -> rusqlite::Result<TestCase> {
    Ok(TestCase {
        id: row.get(0)?,
        run_id: row.get(1)?,
        input: row.get(2)?,
        expected_behavior: row.get(3)?,
        category: row.get(4)?,
        stage: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub const EVALUATION_COLUMNS: &str = "e.id, e.run_id, e.prompt_id, e.test_case_id, e.response, \
     e.functionality, e.safety, e.consistency, e.edge_case_handling, e.reasoning, e.overall, e.created_at";

pub fn evaluation_from_row(row: &Row<'_>) -> rusqlite::Result<Evaluation> {
    Ok(Evaluation {
        id: row.get(0)?,
        run_id: row.get(1)?,
        prompt_id: row.get(2)?,
        test_case_id: row.get(3)?,
        response: row.get(4)?,
        scores: SubScores {
            functionality: row.get(5)?,
            safety: row.get(6)?,
            consistency: row.get(7)?,
            edge_case_handling: row.get(8)?,
        },
        reasoning: row.get(9)?,
        overall: row.get(10)?,
        created_at: row.get(11)?,
    })
}

pub const STAGE_RESULT_COLUMNS: &str = "run_id, stage_name, status, error, updated_at";

pub fn stage_result_from_row(row: &Row<'_>) -> rusqlite::Result<StageResult> {
    Ok(StageResult {
        run_id: row.get(0)?,
        stage_name: row.get(1)?,
        status: row.get(2)?,
        error: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

pub const WEAKNESS_COLUMNS: &str = "id, run_id, prompt_id, track_id, iteration, description, \
     failed_test_ids_json, failed_test_descriptions_json, created_at";

pub fn weakness_from_row(row: &Row<'_>) -> rusqlite::Result<WeaknessAnalysis> {
    Ok(WeaknessAnalysis {
        id: row.get(0)?,
        run_id: row.get(1)?,
        prompt_id: row.get(2)?,
        track_id: row.get(3)?,
        iteration: row.get(4)?,
        description: row.get(5)?,
        failed_test_ids: json_column(row, 6)?,
        failed_test_descriptions: json_column(row, 7)?,
        created_at: row.get(8)?,
    })
}

pub const TRACK_COLUMNS: &str =
    "run_id, track_id, seed_prompt_id, status, reason, error, updated_at";

pub fn track_from_row(row: &Row<'_>) -> rusqlite::Result<TrackOutcome> {
    Ok(TrackOutcome {
        run_id: row.get(0)?,
        track_id: row.get(1)?,
        seed_prompt_id: row.get(2)?,
        status: row.get(3)?,
        reason: row.get(4)?,
        error: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
