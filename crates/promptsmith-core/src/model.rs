use serde::{Deserialize, Serialize};

/// Immutable description of the task a prompt is optimized for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskSpec {
    pub task_description: String,
    #[serde(default)]
    pub behavioral_specs: String,
    #[serde(default)]
    pub validation_rules: Vec<String>,
    /// Existing prompt to benchmark alongside generated candidates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_prompt: Option<String>,
}

impl TaskSpec {
    pub fn baseline(&self) -> Option<&str> {
        self.current_prompt
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $s),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($s => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

str_enum!(RunStatus {
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub task: TaskSpec,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: RunStatus,
    pub champion_prompt_id: Option<i64>,
    pub total_evaluations: Option<i64>,
    pub error: Option<String>,
}

/// Furthest pipeline stage a prompt has reached. Ordered by progression.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PromptStage {
    Initial,
    QuickFilter,
    Rigorous,
    Refined,
}

str_enum!(PromptStage {
    Initial => "initial",
    QuickFilter => "quick_filter",
    Rigorous => "rigorous",
    Refined => "refined",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    pub id: i64,
    pub run_id: i64,
    pub text: String,
    pub stage: PromptStage,
    pub strategy: Option<String>,
    pub quick_score: Option<f64>,
    pub rigorous_score: Option<f64>,
    pub average_score: Option<f64>,
    pub iteration: u32,
    pub track_id: Option<i64>,
    pub parent_prompt_id: Option<i64>,
    pub is_baseline: bool,
    pub created_at: String,
}

impl Prompt {
    /// Mean of whichever stage scores are populated.
    pub fn populated_average(&self) -> Option<f64> {
        let scores: Vec<f64> = [self.quick_score, self.rigorous_score]
            .into_iter()
            .flatten()
            .collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    /// The stage score, or `average_score` when no stage is given.
    pub fn score_on(&self, stage: Option<TestStage>) -> Option<f64> {
        match stage {
            Some(TestStage::Quick) => self.quick_score,
            Some(TestStage::Rigorous) => self.rigorous_score,
            None => self.average_score,
        }
    }
}

/// Insert shape for `prompts`; ids and timestamps come from the store.
#[derive(Debug, Clone, Default)]
pub struct NewPrompt {
    pub text: String,
    pub stage: Option<PromptStage>,
    pub strategy: Option<String>,
    pub iteration: u32,
    pub track_id: Option<i64>,
    pub parent_prompt_id: Option<i64>,
    pub is_baseline: bool,
}

impl NewPrompt {
    pub fn initial(text: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stage: Some(PromptStage::Initial),
            strategy: Some(strategy.into()),
            ..Default::default()
        }
    }

    pub fn baseline(text: impl Into<String>) -> Self {
        Self {
            is_baseline: true,
            ..Self::initial(text, "baseline")
        }
    }

    pub fn refined(text: impl Into<String>, parent: &Prompt, track_id: i64) -> Self {
        Self {
            text: text.into(),
            stage: Some(PromptStage::Refined),
            strategy: parent.strategy.clone(),
            iteration: parent.iteration + 1,
            track_id: Some(track_id),
            parent_prompt_id: Some(parent.id),
            is_baseline: false,
        }
    }
}

/// A candidate returned by the generation capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptVariant {
    pub text: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_strategy() -> String {
    "unspecified".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TestCategory {
    Core,
    Edge,
    Boundary,
    Adversarial,
    Consistency,
    Format,
}

str_enum!(TestCategory {
    Core => "core",
    Edge => "edge",
    Boundary => "boundary",
    Adversarial => "adversarial",
    Consistency => "consistency",
    Format => "format",
});

impl TestCategory {
    pub const ALL: [TestCategory; 6] = [
        TestCategory::Core,
        TestCategory::Edge,
        TestCategory::Boundary,
        TestCategory::Adversarial,
        TestCategory::Consistency,
        TestCategory::Format,
    ];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TestStage {
    Quick,
    Rigorous,
}

str_enum!(TestStage {
    Quick => "quick",
    Rigorous => "rigorous",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    pub id: i64,
    pub run_id: i64,
    pub input: String,
    pub expected_behavior: String,
    pub category: TestCategory,
    pub stage: TestStage,
    pub created_at: String,
}

/// A test case as produced by the test-design capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedTest {
    #[serde(alias = "input_message")]
    pub input: String,
    pub expected_behavior: String,
    pub category: TestCategory,
}

/// Judge sub-scores, each on a 0–10 scale.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubScores {
    pub functionality: u8,
    pub safety: u8,
    pub consistency: u8,
    pub edge_case_handling: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Judgement {
    #[serde(flatten)]
    pub scores: SubScores,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub id: i64,
    pub run_id: i64,
    pub prompt_id: i64,
    pub test_case_id: i64,
    pub response: String,
    pub scores: SubScores,
    pub reasoning: String,
    pub overall: f64,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewEvaluation {
    pub prompt_id: i64,
    pub test_case_id: i64,
    pub response: String,
    pub scores: SubScores,
    pub reasoning: String,
    pub overall: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Running,
    Completed,
    Failed,
}

str_enum!(StageStatus {
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub run_id: i64,
    pub stage_name: String,
    pub status: StageStatus,
    pub error: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeaknessAnalysis {
    pub id: i64,
    pub run_id: i64,
    /// The prompt whose evaluations were analysed.
    pub prompt_id: i64,
    pub track_id: i64,
    pub iteration: u32,
    pub description: String,
    pub failed_test_ids: Vec<i64>,
    pub failed_test_descriptions: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewWeakness {
    pub prompt_id: i64,
    pub track_id: i64,
    pub iteration: u32,
    pub description: String,
    pub failed_test_ids: Vec<i64>,
    pub failed_test_descriptions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceReason {
    /// Relative improvement fell below the configured threshold.
    Converged,
    MaxIterationsReached,
    NoFailingTests,
}

str_enum!(ConvergenceReason {
    Converged => "converged",
    MaxIterationsReached => "max_iterations_reached",
    NoFailingTests => "no_failing_tests",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    Running,
    Converged,
    Failed,
}

str_enum!(TrackStatus {
    Running => "running",
    Converged => "converged",
    Failed => "failed",
});

/// Terminal marker of a refinement track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackOutcome {
    pub run_id: i64,
    pub track_id: i64,
    pub seed_prompt_id: i64,
    pub status: TrackStatus,
    pub reason: Option<ConvergenceReason>,
    pub error: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackStep {
    pub prompt_id: i64,
    pub iteration: u32,
    pub score: Option<f64>,
    /// Analysis that conditioned the rewrite producing this prompt.
    pub weakness: Option<WeaknessAnalysis>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementTrackResult {
    pub track_id: i64,
    pub seed_prompt_id: i64,
    pub steps: Vec<TrackStep>,
    pub final_prompt_id: i64,
    pub final_score: Option<f64>,
    pub status: TrackStatus,
    pub reason: Option<ConvergenceReason>,
    pub error: Option<String>,
    pub improvement: f64,
}

impl RefinementTrackResult {
    pub fn is_failed(&self) -> bool {
        self.status != TrackStatus::Converged
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Improved,
    NotImproved,
    NoBaseline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineComparison {
    pub prompt: Prompt,
    pub score: f64,
    /// Champion score minus baseline score.
    pub delta: f64,
    /// The baseline's own answers and judgements, grouped like the champion's.
    pub evaluations: Vec<CategoryEvaluations>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatedCase {
    pub test_case: TestCase,
    pub evaluation: Evaluation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryEvaluations {
    pub category: TestCategory,
    pub entries: Vec<EvaluatedCase>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunCounts {
    pub initial_prompts: usize,
    pub top_k: usize,
    pub top_m: usize,
    pub refined_prompts: usize,
    pub quick_tests: usize,
    pub rigorous_tests: usize,
    pub evaluations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub run_id: i64,
    pub champion: Prompt,
    pub champion_score: f64,
    pub baseline: Option<BaselineComparison>,
    pub verdict: Verdict,
    pub tracks: Vec<RefinementTrackResult>,
    pub champion_evaluations: Vec<CategoryEvaluations>,
    pub counts: RunCounts,
    pub elapsed_seconds: Option<f64>,
}
