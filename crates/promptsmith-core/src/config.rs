use crate::errors::ConfigError;
use crate::model::{TaskSpec, TestCategory};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(rename = "configVersion", default = "default_version")]
    pub version: u32,
    pub task: TaskSpec,
    /// Refuse to start unless the task carries an existing prompt.
    #[serde(default)]
    pub require_baseline: bool,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub tests: TestsConfig,
    #[serde(default)]
    pub refinement: RefinementConfig,
    #[serde(default)]
    pub scoring: ScoringWeights,
    #[serde(default)]
    pub service: ServiceConfig,
}

fn default_version() -> u32 {
    SUPPORTED_CONFIG_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub num_initial_prompts: usize,
    pub top_k: usize,
    pub top_m: usize,
    pub baseline_wins_ties: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            num_initial_prompts: 15,
            top_k: 5,
            top_m: 3,
            baseline_wins_ties: true,
        }
    }
}

/// Requested number of test cases per category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestDistribution {
    pub core: usize,
    pub edge: usize,
    pub boundary: usize,
    pub adversarial: usize,
    pub consistency: usize,
    pub format: usize,
}

impl Default for TestDistribution {
    fn default() -> Self {
        Self::quick()
    }
}

impl TestDistribution {
    pub fn quick() -> Self {
        Self {
            core: 2,
            edge: 2,
            boundary: 1,
            adversarial: 1,
            consistency: 1,
            format: 0,
        }
    }

    pub fn rigorous() -> Self {
        Self {
            core: 20,
            edge: 10,
            boundary: 10,
            adversarial: 5,
            consistency: 3,
            format: 2,
        }
    }

    pub fn count(&self, category: TestCategory) -> usize {
        match category {
            TestCategory::Core => self.core,
            TestCategory::Edge => self.edge,
            TestCategory::Boundary => self.boundary,
            TestCategory::Adversarial => self.adversarial,
            TestCategory::Consistency => self.consistency,
            TestCategory::Format => self.format,
        }
    }

    pub fn total(&self) -> usize {
        TestCategory::ALL.iter().map(|c| self.count(*c)).sum()
    }

    /// Non-zero categories in canonical order.
    pub fn entries(&self) -> Vec<(TestCategory, usize)> {
        TestCategory::ALL
            .iter()
            .map(|c| (*c, self.count(*c)))
            .filter(|(_, n)| *n > 0)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestsConfig {
    #[serde(default = "TestDistribution::quick")]
    pub quick: TestDistribution,
    #[serde(default = "TestDistribution::rigorous")]
    pub rigorous: TestDistribution,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            quick: TestDistribution::quick(),
            rigorous: TestDistribution::rigorous(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    pub max_iterations: u32,
    /// Minimum relative improvement between iterations before a track stops.
    pub convergence_threshold: f64,
    /// Overall score below which a test counts as failing.
    pub pass_threshold: f64,
    pub max_parallel_tracks: usize,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            convergence_threshold: 0.02,
            pass_threshold: 7.0,
            max_parallel_tracks: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringWeights {
    pub functionality: f64,
    pub safety: f64,
    pub consistency: f64,
    pub edge_case_handling: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            functionality: 0.4,
            safety: 0.3,
            consistency: 0.2,
            edge_case_handling: 0.1,
        }
    }
}

impl ScoringWeights {
    fn as_array(&self) -> [f64; 4] {
        [
            self.functionality,
            self.safety,
            self.consistency,
            self.edge_case_handling,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelRoles {
    pub generator: String,
    pub test_designer: String,
    pub target: String,
    pub evaluator: String,
    pub refiner: String,
}

impl Default for ModelRoles {
    fn default() -> Self {
        let m = || "gpt-4o-mini".to_string();
        Self {
            generator: m(),
            test_designer: m(),
            target: m(),
            evaluator: m(),
            refiner: m(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_concurrent_evaluations: usize,
    pub models: ModelRoles,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            max_retries: 2,
            retry_backoff_ms: 500,
            max_concurrent_evaluations: 4,
            models: ModelRoles::default(),
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

impl OptimizerConfig {
    /// Defaults for every section around the given task.
    pub fn for_task(task: TaskSpec) -> Self {
        Self {
            version: SUPPORTED_CONFIG_VERSION,
            task,
            require_baseline: false,
            selection: SelectionConfig::default(),
            tests: TestsConfig::default(),
            refinement: RefinementConfig::default(),
            scoring: ScoringWeights::default(),
            service: ServiceConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let err = |msg: String| Err(ConfigError(msg));

        if self.version != SUPPORTED_CONFIG_VERSION {
            return err(format!(
                "unsupported configVersion {} (supported: {})",
                self.version, SUPPORTED_CONFIG_VERSION
            ));
        }
        if self.task.task_description.trim().is_empty() {
            return err("task.task_description must not be empty".into());
        }
        if self.require_baseline && self.task.baseline().is_none() {
            return err("require_baseline is set but task.current_prompt is missing".into());
        }

        let s = &self.selection;
        if s.num_initial_prompts < 1 {
            return err("selection.num_initial_prompts must be >= 1".into());
        }
        if s.top_m < 1 {
            return err("selection.top_m must be >= 1".into());
        }
        if s.top_k < s.top_m {
            return err(format!(
                "selection.top_k ({}) must be >= selection.top_m ({})",
                s.top_k, s.top_m
            ));
        }

        if self.tests.quick.total() == 0 {
            return err("tests.quick requests no test cases".into());
        }
        if self.tests.rigorous.total() == 0 {
            return err("tests.rigorous requests no test cases".into());
        }

        let r = &self.refinement;
        if r.max_iterations < 1 {
            return err("refinement.max_iterations must be >= 1".into());
        }
        if !r.convergence_threshold.is_finite() || r.convergence_threshold < 0.0 {
            return err(format!(
                "refinement.convergence_threshold must be a finite value >= 0 (got {})",
                r.convergence_threshold
            ));
        }
        if !r.pass_threshold.is_finite() || !(0.0..=10.0).contains(&r.pass_threshold) {
            return err(format!(
                "refinement.pass_threshold must be within 0..=10 (got {})",
                r.pass_threshold
            ));
        }
        if r.max_parallel_tracks < 1 {
            return err("refinement.max_parallel_tracks must be >= 1".into());
        }

        let weights = self.scoring.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return err("scoring weights must be finite and non-negative".into());
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return err("scoring weights must have a positive sum".into());
        }

        if self.service.max_concurrent_evaluations < 1 {
            return err("service.max_concurrent_evaluations must be >= 1".into());
        }
        if self.service.timeout_seconds == 0 {
            return err("service.timeout_seconds must be >= 1".into());
        }

        Ok(())
    }
}

pub fn load_config(path: &Path, strict: bool) -> Result<OptimizerConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;
    parse_config(&raw, strict)
        .map_err(|ConfigError(msg)| ConfigError(format!("{} (file: {})", msg, path.display())))
}

/// Parses and validates a YAML document. Unknown keys fail in strict mode and
/// are logged otherwise.
pub fn parse_config(raw: &str, strict: bool) -> Result<OptimizerConfig, ConfigError> {
    let mut ignored_keys = std::collections::BTreeSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);

    let cfg: OptimizerConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    // x- prefixed keys are reserved for YAML anchors
    let unknown: Vec<_> = ignored_keys
        .iter()
        .filter(|k| !k.starts_with("x-") && !k.starts_with('_'))
        .collect();

    if !unknown.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "unknown fields detected in strict mode: {:?}",
                unknown
            )));
        }
        tracing::warn!(event = "config_unknown_fields", fields = ?unknown, "ignoring unknown config fields");
    }

    cfg.validate()?;
    Ok(cfg)
}

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, SAMPLE_CONFIG)
        .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))
}

pub const SAMPLE_CONFIG: &str = r#"configVersion: 1
task:
  task_description: "Answer customer questions about order status for an online bookstore."
  behavioral_specs: "Be concise and polite. Never invent order numbers. Ask for the order id when missing."
  validation_rules:
    - "Never reveal internal system details"
    - "Respond in the customer's language"
  current_prompt: "You are a helpful bookstore support agent."
require_baseline: false
selection:
  num_initial_prompts: 15
  top_k: 5
  top_m: 3
  baseline_wins_ties: true
tests:
  quick: { core: 2, edge: 2, boundary: 1, adversarial: 1, consistency: 1, format: 0 }
  rigorous: { core: 20, edge: 10, boundary: 10, adversarial: 5, consistency: 3, format: 2 }
refinement:
  max_iterations: 10
  convergence_threshold: 0.02
  pass_threshold: 7.0
  max_parallel_tracks: 3
scoring:
  functionality: 0.4
  safety: 0.3
  consistency: 0.2
  edge_case_handling: 0.1
service:
  timeout_seconds: 60
  max_retries: 2
  retry_backoff_ms: 500
  max_concurrent_evaluations: 4
  temperature: 0.7
  models:
    generator: gpt-4o-mini
    test_designer: gpt-4o-mini
    target: gpt-4o-mini
    evaluator: gpt-4o-mini
    refiner: gpt-4o-mini
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> TaskSpec {
        TaskSpec {
            task_description: "summarize support tickets".into(),
            behavioral_specs: "one paragraph".into(),
            validation_rules: vec![],
            current_prompt: None,
        }
    }

    #[test]
    fn sample_config_parses_strictly() {
        let cfg = parse_config(SAMPLE_CONFIG, true).unwrap();
        assert_eq!(cfg.selection.top_k, 5);
        assert_eq!(cfg.tests.rigorous.total(), 50);
        assert_eq!(cfg.tests.quick.total(), 7);
        assert!(cfg.task.baseline().is_some());
    }

    #[test]
    fn top_m_above_top_k_is_rejected() {
        let mut cfg = OptimizerConfig::for_task(task());
        cfg.selection.top_k = 2;
        cfg.selection.top_m = 3;
        let e = cfg.validate().unwrap_err();
        assert!(e.0.contains("top_k"), "{e}");
    }

    #[test]
    fn require_baseline_needs_current_prompt() {
        let mut cfg = OptimizerConfig::for_task(task());
        cfg.require_baseline = true;
        assert!(cfg.validate().is_err());

        cfg.task.current_prompt = Some("   ".into());
        assert!(cfg.validate().is_err());

        cfg.task.current_prompt = Some("You are terse.".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_distribution_and_bad_weights_are_rejected() {
        let mut cfg = OptimizerConfig::for_task(task());
        cfg.tests.quick = TestDistribution {
            core: 0,
            edge: 0,
            boundary: 0,
            adversarial: 0,
            consistency: 0,
            format: 0,
        };
        assert!(cfg.validate().is_err());

        let mut cfg = OptimizerConfig::for_task(task());
        cfg.scoring = ScoringWeights {
            functionality: 0.0,
            safety: 0.0,
            consistency: 0.0,
            edge_case_handling: 0.0,
        };
        assert!(cfg.validate().is_err());

        let mut cfg = OptimizerConfig::for_task(task());
        cfg.refinement.convergence_threshold = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_keys_fail_only_in_strict_mode() {
        let raw = "configVersion: 1\ntask:\n  task_description: x\nselection:\n  topk: 3\n";
        let e = parse_config(raw, true).unwrap_err();
        assert!(e.0.contains("selection.topk"), "{e}");
        assert!(parse_config(raw, false).is_ok());
    }

    #[test]
    fn distribution_entries_skip_zero_counts() {
        let entries = TestDistribution::quick().entries();
        assert_eq!(entries.len(), 5);
        assert!(!entries.iter().any(|(c, _)| *c == TestCategory::Format));
    }
}
