//! Language-model client.
//!
//! One prompt in, one completion out. Retry policy lives above this layer
//! and nothing is cached: every call is billed by the provider.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::config::ModelConfig;

/// Failure category of a single completion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    Timeout,
    Provider,
}

/// A failed completion. `message` carries the provider's own text.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl LlmError {
    pub fn provider(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::Provider,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: LlmErrorKind::Timeout,
            message: format!("no completion within {after:?}"),
        }
    }
}

/// Per-call settings.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    /// Model identifier understood by the provider.
    pub model: String,
    pub max_tokens: u32,
    /// Upper bound on the wait for one completion.
    pub timeout: Duration,
}

#[async_trait]
pub trait LanguageModel: Send + Sync + fmt::Debug {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Issue a single completion request.
    async fn complete(&self, prompt: &str, options: &CompletionOptions)
    -> Result<String, LlmError>;
}

/// Reject prompts the provider would refuse anyway.
pub fn check_prompt(prompt: &str, max_chars: usize) -> Result<(), LlmError> {
    if prompt.trim().is_empty() {
        return Err(LlmError::provider("prompt is empty"));
    }
    let len = prompt.chars().count();
    if len > max_chars {
        return Err(LlmError::provider(format!(
            "prompt is {len} chars, limit is {max_chars}"
        )));
    }
    Ok(())
}

/// Await `call`, turning an elapsed deadline into a `Timeout` error.
pub async fn with_deadline<F>(timeout: Duration, call: F) -> Result<String, LlmError>
where
    F: Future<Output = Result<String, LlmError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::timeout(timeout)),
    }
}

/// Client for any OpenAI-compatible chat-completions endpoint
/// (Gemini's compatibility endpoint by default).
pub struct OpenAiCompatibleClient {
    client: Client<OpenAIConfig>,
    api_base: String,
    max_prompt_chars: usize,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &ModelConfig, api_key: &str) -> Result<Self, LlmError> {
        // The request deadline is enforced by `with_deadline`; this one only
        // keeps a stalled socket from living forever.
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.saturating_add(5)))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| LlmError::provider(format!("Failed to create HTTP client: {}", e)))?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&config.api_base);

        Ok(Self {
            client: Client::with_config(openai_config).with_http_client(http_client),
            api_base: config.api_base.clone(),
            max_prompt_chars: config.max_prompt_chars,
        })
    }
}

impl fmt::Debug for OpenAiCompatibleClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCompatibleClient")
            .field("api_base", &self.api_base)
            .field("max_prompt_chars", &self.max_prompt_chars)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        check_prompt(prompt, self.max_prompt_chars)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&options.model)
            .max_completion_tokens(options.max_tokens)
            .messages(vec![ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage {
                    content: prompt.to_string().into(),
                    name: None,
                },
            )])
            .build()
            .map_err(|e| LlmError::provider(e.to_string()))?;

        let start = Instant::now();
        let content = with_deadline(options.timeout, async {
            let response = self
                .client
                .chat()
                .create(request)
                .await
                .map_err(|e| LlmError::provider(e.to_string()))?;
            Ok(response
                .choices
                .first()
                .and_then(|c| c.message.content.clone())
                .unwrap_or_default())
        })
        .await?;

        debug!(
            model = %options.model,
            latency_ms = start.elapsed().as_millis() as u64,
            chars = content.len(),
            "completion received"
        );

        if content.trim().is_empty() {
            return Err(LlmError::provider("model returned an empty completion"));
        }
        Ok(content)
    }
}
