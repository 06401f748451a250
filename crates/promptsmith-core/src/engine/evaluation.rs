use crate::config::ScoringWeights;
use crate::errors::{OptimizeError, Result};
use crate::model::{Evaluation, NewEvaluation, Prompt, TaskSpec, TestCase, TestStage};
use crate::providers::guard::GuardedService;
use crate::scoring::{self, Standing};
use crate::storage::Store;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A prompt together with its score against one test stage.
#[derive(Debug, Clone)]
pub struct ScoredPrompt {
    pub prompt: Prompt,
    pub score: f64,
    pub evaluations: Vec<Evaluation>,
}

impl ScoredPrompt {
    pub fn failing(&self, pass_threshold: f64) -> Vec<&Evaluation> {
        self.evaluations
            .iter()
            .filter(|e| e.overall < pass_threshold)
            .collect()
    }
}

/// Runs prompts against test cases and records evaluations and scores.
#[derive(Clone)]
pub struct Evaluator {
    pub run_id: i64,
    pub store: Store,
    pub service: GuardedService,
    pub task: Arc<TaskSpec>,
    pub weights: ScoringWeights,
}

impl Evaluator {
    /// Evaluates the pairs not yet in the store, then writes the stage score.
    pub async fn score_prompt(
        &self,
        prompt: &Prompt,
        tests: &[TestCase],
        stage: TestStage,
    ) -> Result<ScoredPrompt> {
        if tests.is_empty() {
            return Err(OptimizeError::integrity(format!(
                "no {stage} test cases to evaluate prompt {} against",
                prompt.id
            )));
        }

        let mut evaluations = self
            .store
            .evaluations()
            .for_prompt(self.run_id, prompt.id, Some(stage))?;
        let done: HashSet<i64> = evaluations.iter().map(|e| e.test_case_id).collect();

        for test in tests.iter().filter(|t| !done.contains(&t.id)) {
            let response = self
                .service
                .invoke_model_under_test(&prompt.text, &test.input)
                .await?;
            let judgement = self
                .service
                .evaluate_response(&self.task, test, &response)
                .await?;
            let overall = scoring::overall(&self.weights, &judgement.scores);
            let row = self.store.evaluations().insert(
                self.run_id,
                &NewEvaluation {
                    prompt_id: prompt.id,
                    test_case_id: test.id,
                    response,
                    scores: judgement.scores,
                    reasoning: judgement.reasoning,
                    overall,
                },
            )?;
            evaluations.push(row);
        }

        let wanted: HashSet<i64> = tests.iter().map(|t| t.id).collect();
        evaluations.retain(|e| wanted.contains(&e.test_case_id));
        evaluations.sort_by_key(|e| e.test_case_id);

        let score = scoring::mean(evaluations.iter().map(|e| e.overall)).ok_or_else(|| {
            OptimizeError::integrity(format!("prompt {} has no {stage} evaluations", prompt.id))
        })?;
        let prompt = self
            .store
            .prompts()
            .record_score(self.run_id, prompt.id, stage, score)?;

        Ok(ScoredPrompt {
            prompt,
            score,
            evaluations,
        })
    }

    /// Scores each prompt in its own task, at most `max_concurrent` at a time.
    pub async fn score_all(
        &self,
        prompts: Vec<Prompt>,
        tests: Arc<Vec<TestCase>>,
        stage: TestStage,
        max_concurrent: usize,
    ) -> Result<Vec<ScoredPrompt>> {
        let sem = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut handles = Vec::with_capacity(prompts.len());

        for prompt in prompts {
            let permit = sem.clone().acquire_owned().await?;
            let this = self.clone();
            let tests = tests.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                this.score_prompt(&prompt, &tests, stage).await
            }));
        }

        let mut scored = Vec::with_capacity(handles.len());
        let mut first_err = None;
        for h in handles {
            match h.await? {
                Ok(s) => scored.push(s),
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(scored),
        }
    }
}

/// Ranking inputs for a scored prompt, read back from the store.
///
/// With a `stage`, both the score and the consistency tie-break come from
/// that stage's evaluations. Without one, the average over all of them.
pub fn standing_for(
    store: &Store,
    run_id: i64,
    prompt: &Prompt,
    stage: Option<TestStage>,
) -> Result<Standing> {
    let score = prompt.score_on(stage).ok_or_else(|| {
        OptimizeError::integrity(format!(
            "prompt {} has no {} score to rank by",
            prompt.id,
            stage.map_or("average", |s| s.as_str())
        ))
    })?;
    let evaluations = store.evaluations().for_prompt(run_id, prompt.id, stage)?;
    let consistency =
        scoring::mean(evaluations.iter().map(|e| f64::from(e.scores.consistency))).unwrap_or(0.0);
    Ok(Standing {
        prompt_id: prompt.id,
        score,
        consistency,
        iteration: prompt.iteration,
        is_baseline: prompt.is_baseline,
    })
}
