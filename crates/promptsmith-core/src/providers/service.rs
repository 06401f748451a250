use crate::config::{ModelRoles, TestDistribution};
use crate::errors::{ServiceError, ServiceOp};
use crate::model::{
    GeneratedTest, Judgement, PromptVariant, TaskSpec, TestCase, TestStage, WeaknessAnalysis,
};
use crate::providers::llm::{ChatRequest, LlmClient};
use crate::providers::LanguageModelService;
use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};

static FENCED_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```[a-zA-Z0-9_-]*\s*\n(.*?)```").ok());

/// Contents of the first fenced code block, or the trimmed input when there is none.
pub fn strip_fences(raw: &str) -> &str {
    FENCED_BLOCK
        .as_ref()
        .and_then(|re| re.captures(raw))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or_else(|| raw.trim())
}

/// Decodes a JSON reply, tolerating markdown fences and chatter around the payload.
pub fn parse_json_reply<T: DeserializeOwned>(op: ServiceOp, raw: &str) -> Result<T, ServiceError> {
    let body = strip_fences(raw);
    if let Ok(v) = serde_json::from_str(body) {
        return Ok(v);
    }
    let start = body.find(['{', '[']);
    let end = body.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if e > s => serde_json::from_str(&body[s..=e])
            .map_err(|err| ServiceError::malformed(op, err.to_string())),
        _ => Err(ServiceError::malformed(op, "reply contains no JSON payload")),
    }
}

#[derive(Deserialize)]
struct PromptsReply {
    prompts: Vec<WirePrompt>,
}

#[derive(Deserialize)]
struct WirePrompt {
    #[serde(alias = "text")]
    prompt_text: String,
    #[serde(default)]
    strategy: Option<String>,
}

#[derive(Deserialize)]
struct TestCasesReply {
    test_cases: Vec<GeneratedTest>,
}

#[derive(Deserialize)]
struct RefinedReply {
    improved_prompt: String,
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- (none)".to_string();
    }
    items
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn task_brief(task: &TaskSpec) -> String {
    format!(
        "TASK: {}\n\nREQUIRED BEHAVIOR:\n{}\n\nVALIDATION RULES:\n{}",
        task.task_description,
        task.behavioral_specs,
        bullet_list(&task.validation_rules)
    )
}

/// `LanguageModelService` backed by a chat-completion client, one model per role.
pub struct LlmService {
    client: Arc<dyn LlmClient>,
    models: ModelRoles,
}

impl LlmService {
    pub fn new(client: Arc<dyn LlmClient>, models: ModelRoles) -> Self {
        Self { client, models }
    }

    async fn chat(
        &self,
        op: ServiceOp,
        model: &str,
        system: Option<&str>,
        user: &str,
    ) -> Result<String, ServiceError> {
        self.client
            .complete(ChatRequest {
                model,
                system,
                user,
            })
            .await
            .map_err(|e| ServiceError::backend(op, format!("{e:#}")))
    }
}

#[async_trait]
impl LanguageModelService for LlmService {
    async fn generate_prompt_variants(
        &self,
        task: &TaskSpec,
        count: usize,
        exclude_baseline: bool,
    ) -> Result<Vec<PromptVariant>, ServiceError> {
        let op = ServiceOp::GeneratePrompts;
        let mut user = format!(
            "{}\n\nWrite {count} distinct system prompts for this task. Vary the strategy \
             (structured rules, persona, few-shot examples, step-by-step, constraint-first, ...).\n",
            task_brief(task)
        );
        if let (true, Some(baseline)) = (exclude_baseline, task.baseline()) {
            user.push_str(&format!(
                "\nThe current prompt is below. Do not repeat it verbatim:\n```\n{baseline}\n```\n"
            ));
        }
        user.push_str(
            "\nReply with JSON only: {\"prompts\": [{\"strategy\": \"...\", \"prompt_text\": \"...\"}]}",
        );

        let raw = self
            .chat(
                op,
                &self.models.generator,
                Some("You are an expert prompt engineer."),
                &user,
            )
            .await?;
        let reply: PromptsReply = parse_json_reply(op, &raw)?;
        let variants: Vec<PromptVariant> = reply
            .prompts
            .into_iter()
            .filter(|p| !p.prompt_text.trim().is_empty())
            .map(|p| PromptVariant {
                text: p.prompt_text.trim().to_string(),
                strategy: p.strategy.unwrap_or_else(|| "unspecified".into()),
            })
            .collect();
        if variants.is_empty() {
            return Err(ServiceError::malformed(op, "no prompts in reply"));
        }
        Ok(variants)
    }

    async fn generate_test_cases(
        &self,
        task: &TaskSpec,
        stage: TestStage,
        distribution: &TestDistribution,
    ) -> Result<Vec<GeneratedTest>, ServiceError> {
        let op = ServiceOp::GenerateTests;
        let breakdown = distribution
            .entries()
            .iter()
            .map(|(c, n)| format!("- {c}: {n}"))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "{}\n\nDesign {} {stage} test cases for a system prompt implementing this task, \
             distributed as:\n{breakdown}\n\nEach test is a user message plus the behavior a \
             correct assistant shows. Reply with JSON only: {{\"test_cases\": [{{\"input\": \"...\", \
             \"expected_behavior\": \"...\", \"category\": \"core|edge|boundary|adversarial|consistency|format\"}}]}}",
            task_brief(task),
            distribution.total()
        );

        let raw = self
            .chat(
                op,
                &self.models.test_designer,
                Some("You are a meticulous QA engineer for conversational AI."),
                &user,
            )
            .await?;
        let reply: TestCasesReply = parse_json_reply(op, &raw)?;
        if reply.test_cases.is_empty() {
            return Err(ServiceError::malformed(op, "no test cases in reply"));
        }
        Ok(reply.test_cases)
    }

    async fn invoke_model_under_test(
        &self,
        prompt_text: &str,
        test_input: &str,
    ) -> Result<String, ServiceError> {
        self.chat(
            ServiceOp::InvokeModel,
            &self.models.target,
            Some(prompt_text),
            test_input,
        )
        .await
    }

    async fn evaluate_response(
        &self,
        task: &TaskSpec,
        test: &TestCase,
        response: &str,
    ) -> Result<Judgement, ServiceError> {
        let op = ServiceOp::EvaluateResponse;
        let user = format!(
            "{}\n\nTEST ({category}):\nUser message: {input}\nExpected behavior: {expected}\n\n\
             ASSISTANT RESPONSE:\n{response}\n\nScore the response from 0 to 10 on functionality, \
             safety, consistency and edge_case_handling. Reply with JSON only: \
             {{\"functionality\": 0, \"safety\": 0, \"consistency\": 0, \"edge_case_handling\": 0, \
             \"reasoning\": \"...\"}}",
            task_brief(task),
            category = test.category,
            input = test.input,
            expected = test.expected_behavior,
        );

        let raw = self
            .chat(
                op,
                &self.models.evaluator,
                Some("You are an objective LLM-as-judge evaluator."),
                &user,
            )
            .await?;
        let judgement: Judgement = parse_json_reply(op, &raw)?;
        let s = judgement.scores;
        if [s.functionality, s.safety, s.consistency, s.edge_case_handling]
            .iter()
            .any(|v| *v > 10)
        {
            return Err(ServiceError::malformed(op, "sub-score outside 0..=10"));
        }
        Ok(judgement)
    }

    async fn rewrite_prompt(
        &self,
        task: &TaskSpec,
        current_prompt: &str,
        weakness: &WeaknessAnalysis,
    ) -> Result<String, ServiceError> {
        let op = ServiceOp::RewritePrompt;
        let user = format!(
            "{}\n\nCURRENT PROMPT (iteration {iteration}):\n```\n{current_prompt}\n```\n\n\
             IDENTIFIED WEAKNESSES:\n{weakness}\n\nFAILED TEST CASES:\n{failed}\n\n\
             Improve the prompt surgically: keep what works, fix the failure modes, \
             strengthen violated rules, stay concise. Reply with JSON only: \
             {{\"improved_prompt\": \"...\", \"changes_made\": \"...\"}}",
            task_brief(task),
            iteration = weakness.iteration,
            weakness = weakness.description,
            failed = bullet_list(&weakness.failed_test_descriptions),
        );

        let raw = self
            .chat(
                op,
                &self.models.refiner,
                Some("You are a prompt optimization specialist."),
                &user,
            )
            .await?;
        let text = match parse_json_reply::<RefinedReply>(op, &raw) {
            Ok(r) => r.improved_prompt,
            Err(_) => strip_fences(&raw).to_string(),
        };
        let text = text.trim();
        if text.is_empty() {
            return Err(ServiceError::malformed(op, "empty rewritten prompt"));
        }
        Ok(text.to_string())
    }

    fn provider_name(&self) -> &'static str {
        self.client.provider_name()
    }
}
