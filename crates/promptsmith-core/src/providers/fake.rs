use crate::config::TestDistribution;
use crate::errors::ServiceError;
use crate::fingerprint::sha256_hex;
use crate::model::{
    GeneratedTest, Judgement, PromptVariant, SubScores, TaskSpec, TestCase, TestStage,
    WeaknessAnalysis,
};
use crate::providers::LanguageModelService;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

const STRATEGIES: [&str; 8] = [
    "structured_rules",
    "persona",
    "few_shot",
    "step_by_step",
    "constraint_first",
    "checklist",
    "socratic",
    "concise",
];

/// Marker appended by `rewrite_prompt`; each one lifts the fake judge's scores.
const FIX_MARKER: &str = "- Address:";

/// Offline, deterministic service for dry runs and tests.
///
/// Scores derive from a hash of the response, plus a bonus per rewrite the
/// prompt has been through, so refinement visibly converges.
#[derive(Debug, Clone, Default)]
pub struct FakeService;

impl FakeService {
    pub fn new() -> Self {
        Self
    }
}

fn quality_of(response: &str) -> u8 {
    response
        .strip_prefix("quality=")
        .and_then(|rest| rest.split(';').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl LanguageModelService for FakeService {
    async fn generate_prompt_variants(
        &self,
        task: &TaskSpec,
        count: usize,
        _exclude_baseline: bool,
    ) -> Result<Vec<PromptVariant>, ServiceError> {
        Ok((0..count)
            .map(|i| {
                let strategy = STRATEGIES[i % STRATEGIES.len()];
                PromptVariant {
                    text: format!(
                        "You are an assistant for: {}\nApproach: {} (variant {}).\n{}",
                        task.task_description,
                        strategy.replace('_', " "),
                        i + 1,
                        task.behavioral_specs
                    ),
                    strategy: strategy.to_string(),
                }
            })
            .collect())
    }

    async fn generate_test_cases(
        &self,
        task: &TaskSpec,
        stage: TestStage,
        distribution: &TestDistribution,
    ) -> Result<Vec<GeneratedTest>, ServiceError> {
        let mut out = Vec::with_capacity(distribution.total());
        for (category, n) in distribution.entries() {
            for i in 0..n {
                out.push(GeneratedTest {
                    input: format!(
                        "[{stage}/{category} #{}] request about: {}",
                        i + 1,
                        task.task_description
                    ),
                    expected_behavior: format!("handles the {category} case correctly"),
                    category,
                });
            }
        }
        Ok(out)
    }

    async fn invoke_model_under_test(
        &self,
        prompt_text: &str,
        test_input: &str,
    ) -> Result<String, ServiceError> {
        let fixes = prompt_text.matches(FIX_MARKER).count().min(u8::MAX as usize);
        Ok(format!(
            "quality={fixes}; reply to {test_input:?} under prompt {}",
            &sha256_hex(prompt_text)[..12]
        ))
    }

    async fn evaluate_response(
        &self,
        _task: &TaskSpec,
        test: &TestCase,
        response: &str,
    ) -> Result<Judgement, ServiceError> {
        let h = Sha256::digest(response.as_bytes());
        let bonus = quality_of(response).saturating_mul(2);
        let score = |b: u8| (3 + b % 6).saturating_add(bonus).min(10);
        let scores = SubScores {
            functionality: score(h[0]),
            safety: score(h[1]),
            consistency: score(h[2]),
            edge_case_handling: score(h[3]),
        };
        Ok(Judgement {
            scores,
            reasoning: format!(
                "{} case scored {}/{}/{}/{}",
                test.category,
                scores.functionality,
                scores.safety,
                scores.consistency,
                scores.edge_case_handling
            ),
        })
    }

    async fn rewrite_prompt(
        &self,
        _task: &TaskSpec,
        current_prompt: &str,
        weakness: &WeaknessAnalysis,
    ) -> Result<String, ServiceError> {
        let focus = weakness
            .failed_test_descriptions
            .first()
            .map(String::as_str)
            .unwrap_or("general robustness");
        let focus: String = focus.chars().take(80).collect();
        Ok(format!(
            "{current_prompt}\n{FIX_MARKER} {focus} (iteration {})",
            weakness.iteration
        ))
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestCategory;

    fn test_case() -> TestCase {
        TestCase {
            id: 1,
            run_id: 1,
            input: "hello".into(),
            expected_behavior: "greets".into(),
            category: TestCategory::Core,
            stage: TestStage::Quick,
            created_at: String::new(),
        }
    }

    #[tokio::test]
    async fn same_inputs_same_scores() {
        let svc = FakeService::new();
        let task = TaskSpec::default();
        let r1 = svc.invoke_model_under_test("p", "q").await.unwrap();
        let r2 = svc.invoke_model_under_test("p", "q").await.unwrap();
        assert_eq!(r1, r2);
        let j1 = svc.evaluate_response(&task, &test_case(), &r1).await.unwrap();
        let j2 = svc.evaluate_response(&task, &test_case(), &r2).await.unwrap();
        assert_eq!(j1, j2);
    }

    #[tokio::test]
    async fn rewrites_raise_quality() {
        let svc = FakeService::new();
        let prompt = format!("base\n{FIX_MARKER} x\n{FIX_MARKER} y");
        let r = svc.invoke_model_under_test(&prompt, "q").await.unwrap();
        assert_eq!(quality_of(&r), 2);
        let j = svc
            .evaluate_response(&TaskSpec::default(), &test_case(), &r)
            .await
            .unwrap();
        assert!(j.scores.functionality >= 7);
    }

    #[tokio::test]
    async fn tests_follow_distribution() {
        let svc = FakeService::new();
        let tests = svc
            .generate_test_cases(&TaskSpec::default(), TestStage::Quick, &TestDistribution::quick())
            .await
            .unwrap();
        assert_eq!(tests.len(), 7);
        assert_eq!(
            tests.iter().filter(|t| t.category == TestCategory::Core).count(),
            2
        );
    }
}
