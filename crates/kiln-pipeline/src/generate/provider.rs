//! Text-generation providers used to write questions and answers.

use super::config::{GlobalSettings, ProviderKind, ProviderSpec};
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} request failed: {reason}")]
    Request { provider: String, reason: String },

    #[error("{provider} returned status {status}: {body}")]
    Status { provider: String, status: u16, body: String },

    #[error("{provider} response could not be decoded: {reason}")]
    Decode { provider: String, reason: String },

    #[error("{provider} returned an empty response")]
    Empty { provider: String },

    #[error("OPENAI_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("{provider} failed after {attempts} attempts: {last}")]
    Exhausted { provider: String, attempts: u32, last: String },
}

impl ProviderError {
    /// Transport, status and decoding failures are worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Request { .. } | Self::Status { .. } | Self::Decode { .. })
    }
}

/// A model that turns one prompt into one completion.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Short name used in logs and errors, e.g. `ollama:llama3.1`.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Exponential backoff with random jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Upper bound of the random delay added to each wait.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// `max_retries` retries without waiting.
    #[must_use]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: Duration::ZERO,
        }
    }

    /// initial_delay * multiplier^retry_count, capped at max_delay, plus jitter.
    #[must_use]
    pub fn calculate_delay(&self, retry_count: u32) -> Duration {
        let base_ms = (self.initial_delay.as_millis() as f64 * self.multiplier.powi(retry_count as i32))
            .min(self.max_delay.as_millis() as f64) as u64;
        let jitter_ms = if self.jitter.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64)
        };
        Duration::from_millis(base_ms + jitter_ms)
    }
}

/// Calls `provider`, retrying retryable failures under `policy`.
pub async fn generate_with_retry(
    provider: &dyn TextProvider,
    prompt: &str,
    policy: &RetryPolicy,
) -> Result<String, ProviderError> {
    let mut retry_count = 0;
    loop {
        match provider.generate(prompt).await {
            Ok(text) => return Ok(text),
            Err(e) if e.is_retryable() && retry_count < policy.max_retries => {
                let delay = policy.calculate_delay(retry_count);
                warn!(
                    provider = provider.name(),
                    attempt = retry_count + 1,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "generation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
            }
            Err(e) if e.is_retryable() => {
                return Err(ProviderError::Exhausted {
                    provider: provider.name().to_string(),
                    attempts: retry_count + 1,
                    last: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
}

/// Builds the provider a config entry names.
pub fn build_provider(spec: &ProviderSpec, global: &GlobalSettings) -> Result<Arc<dyn TextProvider>, ProviderError> {
    match spec.provider {
        ProviderKind::Ollama => Ok(Arc::new(OllamaProvider::new(&global.ollama_url, &spec.model))),
        ProviderKind::Openai => {
            let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| ProviderError::MissingApiKey)?;
            Ok(Arc::new(OpenAiProvider::new(&global.openai_url, &spec.model, api_key)))
        }
    }
}

fn request_error(provider: &str, e: &reqwest::Error) -> ProviderError {
    error!(provider, error = %e, "request failed");
    ProviderError::Request { provider: provider.to_string(), reason: e.to_string() }
}

async fn check_status(provider: &str, response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
    error!(provider, status = %status, body = %body, "provider returned error status");
    Err(ProviderError::Status { provider: provider.to_string(), status: status.as_u16(), body })
}

fn non_empty(provider: &str, text: &str) -> Result<String, ProviderError> {
    let text = text.trim();
    if text.is_empty() {
        Err(ProviderError::Empty { provider: provider.to_string() })
    } else {
        Ok(text.to_string())
    }
}

/// Ollama's non-streaming generate endpoint.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    name: String,
    url: String,
    model: String,
    client: Client,
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaProvider {
    /// `url` is the full endpoint, e.g. `http://localhost:11434/api/generate`.
    #[must_use]
    pub fn new(url: &str, model: &str) -> Self {
        Self {
            name: format!("ollama:{model}"),
            url: url.to_string(),
            model: model.to_string(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl TextProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        debug!(provider = %self.name, prompt_len = prompt.len(), "generating");
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: serde_json::Map::new(),
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(&self.name, &e))?;
        let parsed: OllamaGenerateResponse = check_status(&self.name, response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode { provider: self.name.clone(), reason: e.to_string() })?;
        non_empty(&self.name, &parsed.response)
    }
}

/// OpenAI chat completions with a single user message.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    name: String,
    base_url: String,
    model: String,
    api_key: String,
    client: Client,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiProvider {
    #[must_use]
    pub fn new(base_url: &str, model: &str, api_key: String) -> Self {
        Self {
            name: format!("openai:{model}"),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl TextProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        debug!(provider = %self.name, prompt_len = prompt.len(), "generating");
        let body = OpenAiRequest {
            model: &self.model,
            messages: vec![OpenAiMessage { role: "user", content: prompt }],
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(&self.name, &e))?;
        let parsed: OpenAiResponse = check_status(&self.name, response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode { provider: self.name.clone(), reason: e.to_string() })?;
        let content = parsed.choices.into_iter().next().and_then(|c| c.message.content).unwrap_or_default();
        non_empty(&self.name, &content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy { jitter: Duration::ZERO, ..RetryPolicy::default() };
        assert_eq!(policy.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(policy.calculate_delay(4), Duration::from_secs(16));
        assert_eq!(policy.calculate_delay(10), Duration::from_secs(60));

        let jittered = RetryPolicy::default().calculate_delay(0);
        assert!(jittered >= Duration::from_secs(1) && jittered <= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_ollama_generate() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .match_body(Matcher::PartialJsonString(
                r#"{"model": "llama3.1", "prompt": "Say hi", "stream": false}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"response": "  hi there \n", "done": true}"#)
            .create_async()
            .await;

        let provider = OllamaProvider::new(&format!("{}/api/generate", server.url()), "llama3.1");
        assert_eq!(provider.generate("Say hi").await.unwrap(), "hi there");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_openai_generate_sends_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJsonString(
                r#"{"model": "gpt-4o-mini", "messages": [{"role": "user", "content": "Q?"}]}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": "A."}}]}"#)
            .create_async()
            .await;

        let provider = OpenAiProvider::new(&format!("{}/v1/", server.url()), "gpt-4o-mini", "test-key".to_string());
        assert_eq!(provider.generate("Q?").await.unwrap(), "A.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_until_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .with_status(500)
            .with_body("model crashed")
            .expect(3)
            .create_async()
            .await;

        let provider = OllamaProvider::new(&format!("{}/api/generate", server.url()), "llama3.1");
        let err = generate_with_retry(&provider, "Say hi", &RetryPolicy::immediate(2)).await.unwrap_err();

        match err {
            ProviderError::Exhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(last.contains("model crashed"));
            }
            other => panic!("unexpected error: {other}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_response_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .with_status(200)
            .with_body(r#"{"response": "   "}"#)
            .expect(1)
            .create_async()
            .await;

        let provider = OllamaProvider::new(&format!("{}/api/generate", server.url()), "llama3.1");
        let err = generate_with_retry(&provider, "Say hi", &RetryPolicy::immediate(3)).await.unwrap_err();

        assert!(matches!(err, ProviderError::Empty { .. }));
        mock.assert_async().await;
    }
}
