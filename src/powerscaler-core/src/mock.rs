//! Scripted language model for tests and offline runs.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{CompletionOptions, LanguageModel, LlmError, check_prompt, with_deadline};

type Handler = Box<dyn Fn(&str) -> Result<String, LlmError> + Send + Sync>;

/// A model whose answers come from a closure over the prompt.
pub struct MockModel {
    handler: Handler,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    latency: Duration,
}

impl MockModel {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// Always answer with the same text.
    pub fn constant(response: &str) -> Self {
        let response = response.to_string();
        Self::new(move |_| Ok(response.clone()))
    }

    /// Answer fighter prompts with `argument` and judge prompts with `judgment`.
    pub fn battle(argument: &str, judgment: &str) -> Self {
        let argument = argument.to_string();
        let judgment = judgment.to_string();
        Self::new(move |prompt| {
            if is_judge_prompt(prompt) {
                Ok(judgment.clone())
            } else {
                Ok(argument.clone())
            }
        })
    }

    /// Delay every answer, to exercise deadlines and concurrency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in arrival order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Number of prompts received that were judge prompts.
    pub fn judge_calls(&self) -> usize {
        self.prompts()
            .iter()
            .filter(|p| is_judge_prompt(p))
            .count()
    }
}

/// Judge prompts are the only ones that demand a `Winner:` line.
pub fn is_judge_prompt(prompt: &str) -> bool {
    prompt.contains("Winner:")
}

impl fmt::Debug for MockModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockModel")
            .field("calls", &self.call_count())
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        check_prompt(prompt, usize::MAX)?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        with_deadline(options.timeout, async {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            (self.handler)(prompt)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmErrorKind;

    fn options(timeout: Duration) -> CompletionOptions {
        CompletionOptions {
            model: "mock".to_string(),
            max_tokens: 64,
            timeout,
        }
    }

    #[tokio::test]
    async fn test_mock_counts_calls() {
        let mock = MockModel::constant("Hello, world!");
        let out = mock.complete("test", &options(Duration::from_secs(1))).await.unwrap();
        assert_eq!(out, "Hello, world!");
        assert_eq!(mock.call_count(), 1);
        assert_eq!(mock.prompts(), vec!["test".to_string()]);
    }

    #[tokio::test]
    async fn test_slow_mock_times_out() {
        let mock = MockModel::constant("too late").with_latency(Duration::from_millis(300));
        let err = mock
            .complete("test", &options(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::Timeout);
    }
}
