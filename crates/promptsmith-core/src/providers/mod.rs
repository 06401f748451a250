//! The language-model service seam and its implementations.
//!
//! Stages only ever see `Arc<dyn LanguageModelService>`. `LlmService` adapts a
//! chat-completion `LlmClient`; `FakeService` answers deterministically offline.

use crate::config::TestDistribution;
use crate::errors::ServiceError;
use crate::model::{
    GeneratedTest, Judgement, PromptVariant, TaskSpec, TestCase, TestStage, WeaknessAnalysis,
};
use async_trait::async_trait;

pub mod fake;
pub mod guard;
pub mod llm;
pub mod service;

#[async_trait]
pub trait LanguageModelService: Send + Sync {
    /// Candidate system prompts. With `exclude_baseline`, none may repeat the
    /// task's current prompt.
    async fn generate_prompt_variants(
        &self,
        task: &TaskSpec,
        count: usize,
        exclude_baseline: bool,
    ) -> Result<Vec<PromptVariant>, ServiceError>;

    /// Roughly `distribution.total()` test cases spread over its categories.
    async fn generate_test_cases(
        &self,
        task: &TaskSpec,
        stage: TestStage,
        distribution: &TestDistribution,
    ) -> Result<Vec<GeneratedTest>, ServiceError>;

    async fn invoke_model_under_test(
        &self,
        prompt_text: &str,
        test_input: &str,
    ) -> Result<String, ServiceError>;

    async fn evaluate_response(
        &self,
        task: &TaskSpec,
        test: &TestCase,
        response: &str,
    ) -> Result<Judgement, ServiceError>;

    async fn rewrite_prompt(
        &self,
        task: &TaskSpec,
        current_prompt: &str,
        weakness: &WeaknessAnalysis,
    ) -> Result<String, ServiceError>;

    fn provider_name(&self) -> &'static str;
}
