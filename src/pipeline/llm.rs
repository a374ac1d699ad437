//! Model calls: the [`LlmClient`] seam, the provider adapter and the retry loop.
//!
//! Both LLM stages (page OCR and batch normalization) go through
//! [`complete_with_retry`], so they share one retry policy. All prompt text
//! lives in [`crate::prompts`].
//!
//! ## Why a trait in front of `LLMProvider`?
//!
//! The stages only need "prompt (+ images) in, text out, classified error on
//! failure". Narrowing the provider to that surface lets the OCR and
//! normalization tests script replies and count calls without network access.
//!
//! ## Retry Strategy
//!
//! Free-tier vision quotas answer with 429 / `RESOURCE_EXHAUSTED` under any
//! sustained load. Backoff is linear (`rate_limit_backoff_ms × attempt`):
//! with the 10 s default the waits are 10 s, then 20 s. Quota windows are
//! measured in minutes, so exponential growth from a small base would just
//! burn attempts inside the same window.

use crate::config::PipelineConfig;
use crate::error::{LlmCallError, TarifarioError};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// One model invocation.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub images: Vec<ImageData>,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Text returned by the model plus token accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmReply {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Anything that can answer an [`LlmRequest`].
pub trait LlmClient: Send + Sync {
    fn complete(
        &self,
        request: LlmRequest,
    ) -> impl Future<Output = Result<LlmReply, LlmCallError>> + Send;
}

impl<T: LlmClient> LlmClient for Arc<T> {
    fn complete(
        &self,
        request: LlmRequest,
    ) -> impl Future<Output = Result<LlmReply, LlmCallError>> + Send {
        (**self).complete(request)
    }
}

// ── Provider adapter ─────────────────────────────────────────────────────

/// [`LlmClient`] backed by an `edgequake-llm` provider.
#[derive(Clone)]
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient").finish_non_exhaustive()
    }
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

impl LlmClient for ProviderClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmReply, LlmCallError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system {
            messages.push(ChatMessage::system(system));
        }
        if request.images.is_empty() {
            messages.push(ChatMessage::user(request.prompt));
        } else {
            messages.push(ChatMessage::user_with_images(request.prompt, request.images));
        }

        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| LlmCallError::from_message(format!("{}", e)))?;

        Ok(LlmReply {
            content: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

/// Instantiate a named provider with the given model.
fn create_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, TarifarioError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        TarifarioError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the provider, from most-specific to least-specific:
///
/// 1. `config.provider`, a pre-built provider used as-is.
/// 2. `config.provider_name` with `config.model` (default model otherwise).
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set.
/// 4. Gemini when `GEMINI_API_KEY` is present, since the default model is a
///    Gemini model.
/// 5. `ProviderFactory::from_env` auto-detection.
///
/// Called before any OCR or normalization work starts, so missing
/// credentials abort the stage up front.
pub fn resolve_client(config: &PipelineConfig) -> Result<ProviderClient, TarifarioError> {
    if let Some(ref provider) = config.provider {
        return Ok(ProviderClient::new(Arc::clone(provider)));
    }

    if let Some(ref name) = config.provider_name {
        return create_provider(name, config.model_or_default()).map(ProviderClient::new);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model).map(ProviderClient::new);
        }
    }

    if std::env::var("GEMINI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_provider("gemini", config.model_or_default()).map(ProviderClient::new);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| TarifarioError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY (or OPENAI_API_KEY, ANTHROPIC_API_KEY) in config/.env.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(ProviderClient::new(llm_provider))
}

// ── Retry loop ───────────────────────────────────────────────────────────

/// Retry schedule shared by both LLM stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_ms: config.rate_limit_backoff_ms,
        }
    }

    /// Wait before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(attempt as u64))
    }
}

/// Outcome of [`complete_with_retry`] when every attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure {
    pub attempts: u32,
    pub error: LlmCallError,
}

/// Call `client`, retrying rate-limit and transient failures.
///
/// `label` only feeds log lines (`BCP/doc p3`, `BCP/batch_001.txt`).
pub async fn complete_with_retry<C: LlmClient>(
    client: &C,
    request: LlmRequest,
    policy: RetryPolicy,
    label: &str,
) -> Result<LlmReply, RetryFailure> {
    let start = Instant::now();
    let mut attempt = 1;
    loop {
        match client.complete(request.clone()).await {
            Ok(reply) => {
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    label,
                    reply.input_tokens,
                    reply.output_tokens,
                    start.elapsed()
                );
                return Ok(reply);
            }
            Err(error) if error.is_retryable() && attempt < policy.max_attempts => {
                let wait = policy.delay(attempt);
                warn!(
                    "{}: attempt {}/{} failed ({}), retrying in {:?}",
                    label, attempt, policy.max_attempts, error, wait
                );
                sleep(wait).await;
                attempt += 1;
            }
            Err(error) => {
                warn!("{}: giving up after {} attempt(s): {}", label, attempt, error);
                return Err(RetryFailure {
                    attempts: attempt,
                    error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed script of outcomes, one per call.
    struct Scripted {
        script: Mutex<Vec<Result<LlmReply, LlmCallError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(mut script: Vec<Result<LlmReply, LlmCallError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            }
        }
    }

    impl LlmClient for Scripted {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmReply, LlmCallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(LlmCallError::Fatal { detail: "script exhausted".into() }))
        }
    }

    fn request() -> LlmRequest {
        LlmRequest {
            system: None,
            prompt: "p".into(),
            images: vec![],
            temperature: 0.0,
            max_tokens: 16,
        }
    }

    fn ok(text: &str) -> Result<LlmReply, LlmCallError> {
        Ok(LlmReply {
            content: text.into(),
            ..Default::default()
        })
    }

    const FAST: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        backoff_ms: 1,
    };

    #[test]
    fn backoff_is_linear() {
        let p = RetryPolicy {
            max_attempts: 3,
            backoff_ms: 10_000,
        };
        assert_eq!(p.delay(1), Duration::from_secs(10));
        assert_eq!(p.delay(2), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn rate_limit_then_success() {
        let client = Scripted::new(vec![
            Err(LlmCallError::RateLimited { detail: "429".into() }),
            ok("| a | b |"),
        ]);
        let reply = complete_with_retry(&client, request(), FAST, "t").await.unwrap();
        assert_eq!(reply.content, "| a | b |");
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_is_not_retried() {
        let client = Scripted::new(vec![
            Err(LlmCallError::Fatal { detail: "bad key".into() }),
            ok("never"),
        ]);
        let err = complete_with_retry(&client, request(), FAST, "t").await.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_stop_at_max_attempts() {
        let client = Scripted::new(vec![
            Err(LlmCallError::Transient { detail: "503".into() }),
            Err(LlmCallError::Transient { detail: "503".into() }),
            Err(LlmCallError::Transient { detail: "503".into() }),
            ok("late"),
        ]);
        let err = complete_with_retry(&client, request(), FAST, "t").await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(matches!(err.error, LlmCallError::Transient { .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }
}
