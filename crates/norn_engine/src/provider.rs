//! Completion clients: the real HTTP client for an OpenAI-compatible
//! `/completions` endpoint, and a scripted stand-in for tests.
//!
//! Transient failures (429, 408, 5xx, network errors, unparseable bodies)
//! are retried with growing jittered delays; client errors are not.

use crate::llm::{CompletionClient, CompletionParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use norn_core::config::LlmConfig;
use rand::Rng;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Delay before retry number `attempt` (1-based): 1s, 2s, 4s, ... capped,
/// plus up to half a second of jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_secs(1u64 << attempt.saturating_sub(1).min(5));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
    base.min(BACKOFF_CAP) + jitter
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

// ============================================================================
// HTTP completions client
// ============================================================================

pub struct HttpCompletionClient {
    client: reqwest::Client,
    api_base: String,
    max_attempts: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    text: String,
}

impl HttpCompletionClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            max_attempts: config.retry_attempts.max(1),
        })
    }

    /// One request/parse round trip. `Ok(Err(reason))` is a transient failure
    /// worth retrying; `Err` is final.
    async fn try_once(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<std::result::Result<String, String>> {
        let response = match self.client.post(url).json(body).send().await {
            Ok(r) => r,
            Err(e) => return Ok(Err(format!("request failed: {e}"))),
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            if is_transient(status) {
                return Ok(Err(format!(
                    "{status}: {}",
                    detail.chars().take(200).collect::<String>()
                )));
            }
            anyhow::bail!("completion endpoint returned {status}: {detail}");
        }

        let parsed: CompletionResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => return Ok(Err(format!("unparseable response body: {e}"))),
        };
        let text = parsed
            .choices
            .first()
            .map(|c| c.text.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Ok(Err("response contained no text".to_string()));
        }
        Ok(Ok(text))
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String> {
        let url = format!("{}/completions", self.api_base);
        let body = json!({
            "model": params.model,
            "prompt": prompt,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "stop": params.stop,
            "stream": false,
        });

        let mut last_reason = String::new();
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let delay = backoff_delay(attempt - 1);
                tracing::info!(
                    "Retrying completion in {:.1}s (attempt {attempt}/{})",
                    delay.as_secs_f64(),
                    self.max_attempts
                );
                tokio::time::sleep(delay).await;
            }
            match self.try_once(&url, &body).await? {
                Ok(text) => {
                    if attempt > 1 {
                        tracing::info!("Completion succeeded on attempt {attempt}");
                    }
                    return Ok(text);
                }
                Err(reason) => {
                    tracing::warn!(
                        "Completion attempt {attempt}/{} failed: {reason}",
                        self.max_attempts
                    );
                    last_reason = reason;
                }
            }
        }
        anyhow::bail!(
            "completion failed after {} attempts: {last_reason}",
            self.max_attempts
        )
    }
}

// ============================================================================
// Scripted client (tests and dry runs)
// ============================================================================

/// Returns queued responses in order; errors once the script runs out.
/// Records every prompt it was handed.
pub struct ScriptedClient {
    responses: tokio::sync::Mutex<VecDeque<String>>,
    pub prompts: tokio::sync::Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: tokio::sync::Mutex::new(
                responses.into_iter().map(str::to_string).collect(),
            ),
            prompts: tokio::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, prompt: &str, _params: &CompletionParams) -> Result<String> {
        self.prompts.lock().await.push(prompt.to_string());
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("scripted client exhausted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_client_plays_in_order() {
        let client = ScriptedClient::new(vec!["first", "second"]);
        let params = CompletionParams::from_config(&LlmConfig::default());
        assert_eq!(client.complete("p1", &params).await.unwrap(), "first");
        assert_eq!(client.complete("p2", &params).await.unwrap(), "second");
        assert!(client.complete("p3", &params).await.is_err());
        assert_eq!(client.prompts.lock().await.len(), 3);
    }

    #[test]
    fn test_api_base_trailing_slash_trimmed() {
        let cfg = LlmConfig {
            api_base: "http://localhost:8000/v1/".to_string(),
            ..Default::default()
        };
        let client = HttpCompletionClient::new(&cfg).unwrap();
        assert_eq!(client.api_base, "http://localhost:8000/v1");
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(StatusCode::REQUEST_TIMEOUT));
        assert!(is_transient(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(!is_transient(StatusCode::BAD_REQUEST));
        assert!(!is_transient(StatusCode::UNAUTHORIZED));
        assert!(!is_transient(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        for attempt in 1..10 {
            let d = backoff_delay(attempt);
            assert!(d >= Duration::from_secs(1));
            assert!(d <= BACKOFF_CAP + Duration::from_millis(500));
        }
        // Later retries wait at least as long as earlier ones (minus jitter).
        assert!(backoff_delay(4) >= Duration::from_secs(8));
    }
}
