use anyhow::Result;
use async_trait::async_trait;
use norn_core::config::LlmConfig;

/// Sampling parameters for one completion request.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stop: Vec<String>,
}

impl CompletionParams {
    pub fn from_config(cfg: &LlmConfig) -> Self {
        Self {
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            top_p: cfg.top_p,
            stop: cfg.stop.clone(),
        }
    }
}

/// Text-completion backend. One method, one prompt in, one string out; the
/// HTTP implementation lives in `provider`, tests script their own.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String>;
}

/// Consolidation summarizer backed by the completion client.
pub struct LlmSummarizer {
    client: std::sync::Arc<dyn CompletionClient>,
    params: CompletionParams,
}

impl LlmSummarizer {
    pub fn new(client: std::sync::Arc<dyn CompletionClient>, params: CompletionParams) -> Self {
        Self { client, params }
    }
}

#[async_trait]
impl norn_memory::Summarizer for LlmSummarizer {
    async fn summarize(&self, turns: &[norn_core::Turn]) -> Result<String> {
        let mut prompt = String::from(
            "Summarize the following conversation in one short paragraph, \
             keeping names, decisions, and anything worth remembering later:\n\n",
        );
        for turn in turns {
            prompt.push_str(&format!("{}: {}\n", turn.role.as_str(), turn.text));
        }
        prompt.push_str("\nSummary:");
        self.client.complete(&prompt, &self.params).await
    }
}
