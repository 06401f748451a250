use crate::engine::evaluation::{Evaluator, ScoredPrompt};
use crate::errors::{OptimizeError, Result};
use crate::model::{
    ConvergenceReason, NewPrompt, NewWeakness, Prompt, TestCase, TestStage, WeaknessAnalysis,
};
use crate::pipeline::StageContext;
use crate::scoring;
use std::collections::HashMap;
use std::sync::Arc;

/// How many failed tests are quoted back to the rewriter.
const QUOTED_FAILURES: usize = 5;
/// How many distinct judge remarks go into the summary line.
const SUMMARY_REMARKS: usize = 3;

/// One refinement track: evaluate, analyse, rewrite, until a terminal condition.
pub struct TrackRunner {
    pub ctx: StageContext,
    pub track_id: i64,
    pub seed: Prompt,
    pub tests: Arc<Vec<TestCase>>,
}

impl TrackRunner {
    fn evaluator(&self) -> Evaluator {
        self.ctx.evaluator()
    }

    /// Resumes from the newest prompt already written for this track.
    fn starting_point(&self) -> Result<(Prompt, Option<f64>)> {
        let prompts = self.ctx.store.prompts();
        let Some(latest) = prompts.latest_in_track(self.ctx.run_id, self.track_id)? else {
            return Ok((self.seed.clone(), None));
        };
        let prev = match latest.parent_prompt_id {
            Some(parent) => prompts.get(self.ctx.run_id, parent)?.rigorous_score,
            None => None,
        };
        Ok((latest, prev))
    }

    pub async fn run(&self) -> Result<ConvergenceReason> {
        let refinement = &self.ctx.config.refinement;
        let (mut current, mut prev_score) = self.starting_point()?;

        loop {
            let scored = self
                .evaluator()
                .score_prompt(&current, &self.tests, TestStage::Rigorous)
                .await?;
            let score = scored.score;
            let failing = scored.failing(refinement.pass_threshold);

            tracing::info!(
                event = "track_iteration",
                run_id = self.ctx.run_id,
                track_id = self.track_id,
                iteration = current.iteration,
                prompt_id = current.id,
                score,
                failing = failing.len()
            );

            if failing.is_empty() {
                return Ok(ConvergenceReason::NoFailingTests);
            }
            if let Some(prev) = prev_score {
                if scoring::relative_improvement(prev, score) < refinement.convergence_threshold {
                    return Ok(ConvergenceReason::Converged);
                }
            }
            if current.iteration >= refinement.max_iterations {
                return Ok(ConvergenceReason::MaxIterationsReached);
            }

            let weakness = self.record_weakness(&current, &scored)?;
            let text = self
                .ctx
                .service
                .rewrite_prompt(&self.ctx.task, &current.text, &weakness)
                .await?;
            let next = self.ctx.store.prompts().insert(
                self.ctx.run_id,
                &NewPrompt::refined(text, &current, self.track_id),
            )?;

            prev_score = Some(score);
            current = next;
        }
    }

    /// Weakness record for the rewrite producing the next iteration; reused if
    /// an earlier attempt already wrote it.
    fn record_weakness(&self, current: &Prompt, scored: &ScoredPrompt) -> Result<WeaknessAnalysis> {
        let repo = self.ctx.store.weaknesses();
        let iteration = current.iteration + 1;
        if let Some(existing) = repo.get(self.ctx.run_id, self.track_id, iteration)? {
            return Ok(existing);
        }

        let failing = scored.failing(self.ctx.config.refinement.pass_threshold);
        let by_id: HashMap<i64, &TestCase> = self.tests.iter().map(|t| (t.id, t)).collect();

        let mut remarks: Vec<&str> = Vec::new();
        for e in &failing {
            if remarks.len() == SUMMARY_REMARKS {
                break;
            }
            if !remarks.contains(&e.reasoning.as_str()) {
                remarks.push(e.reasoning.as_str());
            }
        }

        let descriptions = failing
            .iter()
            .take(QUOTED_FAILURES)
            .map(|e| match by_id.get(&e.test_case_id) {
                Some(t) => format!(
                    "Test {} [{}] {:?}: {}",
                    e.test_case_id, t.category, t.input, e.reasoning
                ),
                None => format!("Test {}: {}", e.test_case_id, e.reasoning),
            })
            .collect();

        let weakness = NewWeakness {
            prompt_id: current.id,
            track_id: self.track_id,
            iteration,
            description: format!(
                "Found {} weak test cases. Common issues: {}",
                failing.len(),
                remarks.join(", ")
            ),
            failed_test_ids: failing.iter().map(|e| e.test_case_id).collect(),
            failed_test_descriptions: descriptions,
        };
        repo.insert(self.ctx.run_id, &weakness)
            .map_err(|e| match e {
                OptimizeError::Integrity(msg) => OptimizeError::Integrity(format!(
                    "track {} iteration {}: {}",
                    self.track_id, iteration, msg
                )),
                other => other,
            })
    }
}
