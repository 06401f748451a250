//! Result assembly from stored rows, plus the sinks that persist it.

use crate::engine::evaluation::standing_for;
use crate::errors::{OptimizeError, Result};
use crate::model::{
    BaselineComparison, CategoryEvaluations, EvaluatedCase, OptimizationResult, Prompt,
    PromptStage, RunCounts, TestCategory, TestStage, Verdict,
};
use crate::refinement::track_results;
use crate::scoring::{self, TieBreakPolicy, SCORE_EPSILON};
use crate::storage::Store;
use std::collections::{BTreeMap, HashMap};

pub mod console;
pub mod sink;

pub use sink::{JsonDirSink, NullSink, ReportSink};

/// Builds the run's result purely from the store.
///
/// The champion is the best of the baseline, the top-M seeds and the final
/// prompt of every track that did not fail.
pub fn assemble(store: &Store, run_id: i64, policy: TieBreakPolicy) -> Result<OptimizationResult> {
    let run = store.runs().get(run_id)?;
    let prompts = store.prompts();
    let all = prompts.all(run_id)?;
    let by_id: HashMap<i64, &Prompt> = all.iter().map(|p| (p.id, p)).collect();

    let tracks = track_results(store, run_id)?;
    let baseline = all.iter().find(|p| p.is_baseline);

    let mut pool: Vec<&Prompt> = Vec::new();
    if let Some(b) = baseline {
        pool.push(b);
    }
    pool.extend(all.iter().filter(|p| p.stage == PromptStage::Rigorous && p.track_id.is_none()));
    for t in tracks.iter().filter(|t| !t.is_failed()) {
        if let Some(p) = by_id.get(&t.final_prompt_id) {
            pool.push(p);
        }
    }
    pool.sort_by_key(|p| p.id);
    pool.dedup_by_key(|p| p.id);

    let standings = pool
        .iter()
        .filter(|p| p.average_score.is_some())
        .map(|p| standing_for(store, run_id, p, None))
        .collect::<Result<Vec<_>>>()?;
    let best = scoring::rank(standings, policy)
        .into_iter()
        .next()
        .ok_or_else(|| OptimizeError::integrity(format!("run {run_id} has no scored champion candidates")))?;
    let champion = by_id
        .get(&best.prompt_id)
        .map(|p| (*p).clone())
        .ok_or_else(|| OptimizeError::integrity(format!("champion {} vanished", best.prompt_id)))?;
    let champion_score = best.score;

    let baseline = match baseline.and_then(|b| b.average_score.map(|score| (b, score))) {
        Some((b, score)) => Some(BaselineComparison {
            prompt: b.clone(),
            score,
            delta: champion_score - score,
            evaluations: grouped_evaluations(store, run_id, b.id)?,
        }),
        None => None,
    };
    let verdict = match &baseline {
        None => Verdict::NoBaseline,
        Some(b) if b.delta > SCORE_EPSILON && b.prompt.id != champion.id => Verdict::Improved,
        Some(_) => Verdict::NotImproved,
    };

    let champion_evaluations = grouped_evaluations(store, run_id, champion.id)?;

    let counts = RunCounts {
        initial_prompts: all
            .iter()
            .filter(|p| p.track_id.is_none() && !p.is_baseline)
            .count(),
        top_k: all
            .iter()
            .filter(|p| p.track_id.is_none() && p.stage >= PromptStage::QuickFilter)
            .count(),
        top_m: all
            .iter()
            .filter(|p| p.track_id.is_none() && p.stage == PromptStage::Rigorous)
            .count(),
        refined_prompts: all.iter().filter(|p| p.stage == PromptStage::Refined).count(),
        quick_tests: store.test_cases().count(run_id, TestStage::Quick)?,
        rigorous_tests: store.test_cases().count(run_id, TestStage::Rigorous)?,
        evaluations: store.evaluations().count(run_id)?,
    };

    let elapsed_seconds = chrono::DateTime::parse_from_rfc3339(&run.started_at)
        .ok()
        .map(|start| {
            let end = run
                .completed_at
                .as_deref()
                .and_then(|c| chrono::DateTime::parse_from_rfc3339(c).ok())
                .map(|c| c.with_timezone(&chrono::Utc))
                .unwrap_or_else(chrono::Utc::now);
            (end - start.with_timezone(&chrono::Utc)).num_milliseconds() as f64 / 1000.0
        });

    Ok(OptimizationResult {
        run_id,
        champion,
        champion_score,
        baseline,
        verdict,
        tracks,
        champion_evaluations,
        counts,
        elapsed_seconds,
    })
}

fn grouped_evaluations(
    store: &Store,
    run_id: i64,
    prompt_id: i64,
) -> Result<Vec<CategoryEvaluations>> {
    let tests = store.test_cases();
    let mut by_test: HashMap<i64, _> = HashMap::new();
    for stage in [TestStage::Quick, TestStage::Rigorous] {
        for t in tests.by_stage(run_id, stage)? {
            by_test.insert(t.id, t);
        }
    }

    let mut groups: BTreeMap<TestCategory, Vec<EvaluatedCase>> = BTreeMap::new();
    for evaluation in store.evaluations().for_prompt(run_id, prompt_id, None)? {
        let test_case = by_test.get(&evaluation.test_case_id).cloned().ok_or_else(|| {
            OptimizeError::integrity(format!(
                "evaluation {} references unknown test case {}",
                evaluation.id, evaluation.test_case_id
            ))
        })?;
        groups
            .entry(test_case.category)
            .or_default()
            .push(EvaluatedCase {
                test_case,
                evaluation,
            });
    }

    Ok(groups
        .into_iter()
        .map(|(category, entries)| CategoryEvaluations { category, entries })
        .collect())
}
