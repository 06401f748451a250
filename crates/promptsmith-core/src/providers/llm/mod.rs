use async_trait::async_trait;

/// One chat turn: an optional system message and a user message.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub system: Option<&'a str>,
    pub user: &'a str,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, req: ChatRequest<'_>) -> anyhow::Result<String>;
    fn provider_name(&self) -> &'static str;
}

pub mod openai;
