#![allow(dead_code)]

use async_trait::async_trait;
use promptsmith_core::config::{OptimizerConfig, TestDistribution};
use promptsmith_core::errors::{ServiceError, ServiceOp};
use promptsmith_core::model::{
    GeneratedTest, Judgement, PromptVariant, SubScores, TaskSpec, TestCase, TestStage,
    WeaknessAnalysis,
};
use promptsmith_core::providers::LanguageModelService;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const FIX: &str = "+fix";

/// Judge scores are fixed per prompt: `candidate-N` scores `base_scores[N]`,
/// the baseline scores `baseline_score`, and each rewrite adds `fix_gain`.
/// When `rigorous_scores` is non-empty it replaces `base_scores` on the
/// rigorous suite.
pub struct ScriptedService {
    pub base_scores: Vec<u8>,
    pub rigorous_scores: Vec<u8>,
    pub baseline_score: u8,
    pub fix_gain: u8,
    /// Rewrites of prompts containing this text fail with a backend error.
    pub fail_rewrite_containing: Option<String>,
    pub fail_rigorous_tests: bool,
    pub calls: AtomicUsize,
}

impl ScriptedService {
    pub fn new(base_scores: Vec<u8>) -> Self {
        Self {
            base_scores,
            rigorous_scores: Vec::new(),
            baseline_score: 0,
            fix_gain: 1,
            fail_rewrite_containing: None,
            fail_rigorous_tests: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn score_of(&self, text: &str, stage: TestStage) -> u8 {
        let table = if stage == TestStage::Rigorous && !self.rigorous_scores.is_empty() {
            &self.rigorous_scores
        } else {
            &self.base_scores
        };
        let base = if text.starts_with("baseline") {
            self.baseline_score
        } else {
            text.strip_prefix("candidate-")
                .and_then(|rest| rest.split(':').next())
                .and_then(|n| n.parse::<usize>().ok())
                .and_then(|i| table.get(i).copied())
                .unwrap_or(0)
        };
        let fixes = text.matches(FIX).count() as u8;
        base.saturating_add(fixes.saturating_mul(self.fix_gain)).min(10)
    }
}

#[async_trait]
impl LanguageModelService for ScriptedService {
    async fn generate_prompt_variants(
        &self,
        _task: &TaskSpec,
        count: usize,
        _exclude_baseline: bool,
    ) -> Result<Vec<PromptVariant>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..count.min(self.base_scores.len()))
            .map(|i| PromptVariant {
                text: format!("candidate-{i}: answer the user carefully"),
                strategy: format!("strategy_{i}"),
            })
            .collect())
    }

    async fn generate_test_cases(
        &self,
        _task: &TaskSpec,
        stage: TestStage,
        distribution: &TestDistribution,
    ) -> Result<Vec<GeneratedTest>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if stage == TestStage::Rigorous && self.fail_rigorous_tests {
            return Err(ServiceError::backend(ServiceOp::GenerateTests, "upstream 503"));
        }
        let mut out = Vec::new();
        for (category, n) in distribution.entries() {
            for i in 0..n {
                out.push(GeneratedTest {
                    input: format!("{stage} {category} input {i}"),
                    expected_behavior: "stays on task".into(),
                    category,
                });
            }
        }
        Ok(out)
    }

    async fn invoke_model_under_test(
        &self,
        prompt_text: &str,
        _test_input: &str,
    ) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(prompt_text.to_string())
    }

    async fn evaluate_response(
        &self,
        _task: &TaskSpec,
        test: &TestCase,
        response: &str,
    ) -> Result<Judgement, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let s = self.score_of(response, test.stage);
        Ok(Judgement {
            scores: SubScores {
                functionality: s,
                safety: s,
                consistency: s,
                edge_case_handling: s,
            },
            reasoning: format!("scored {s}"),
        })
    }

    async fn rewrite_prompt(
        &self,
        _task: &TaskSpec,
        current_prompt: &str,
        _weakness: &WeaknessAnalysis,
    ) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(needle) = &self.fail_rewrite_containing {
            if current_prompt.contains(needle.as_str()) {
                return Err(ServiceError::backend(ServiceOp::RewritePrompt, "refiner unavailable"));
            }
        }
        Ok(format!("{current_prompt} {FIX}"))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

pub fn dist(core: usize, edge: usize) -> TestDistribution {
    TestDistribution {
        core,
        edge,
        boundary: 0,
        adversarial: 0,
        consistency: 0,
        format: 0,
    }
}

/// Small, fast configuration. Overall score equals the functionality
/// sub-score so thresholds compare exactly.
pub fn config(num_initial: usize, top_k: usize, top_m: usize) -> OptimizerConfig {
    let mut cfg = OptimizerConfig::for_task(TaskSpec {
        task_description: "Answer billing questions".into(),
        behavioral_specs: "Be polite".into(),
        validation_rules: vec!["never invent prices".into()],
        current_prompt: None,
    });
    cfg.selection.num_initial_prompts = num_initial;
    cfg.selection.top_k = top_k;
    cfg.selection.top_m = top_m;
    cfg.tests.quick = dist(2, 0);
    cfg.tests.rigorous = dist(3, 1);
    cfg.refinement.max_iterations = 3;
    cfg.refinement.pass_threshold = 6.5;
    cfg.refinement.convergence_threshold = 0.02;
    cfg.refinement.max_parallel_tracks = 2;
    cfg.scoring.functionality = 1.0;
    cfg.scoring.safety = 0.0;
    cfg.scoring.consistency = 0.0;
    cfg.scoring.edge_case_handling = 0.0;
    cfg.service.max_retries = 0;
    cfg.service.retry_backoff_ms = 0;
    cfg.service.timeout_seconds = 5;
    cfg
}
