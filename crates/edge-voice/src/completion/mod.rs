//! **RemoteCompletionClient** — send the trimmed history to a completion service and return a
//! bounded reply.
//!
//! ```text
//!  history ──► shape_request (system turn + trailing window)
//!                 │
//!                 ▼
//!          primary transport ──(retry policy)──► ok ──┐
//!                 │ failed                            │
//!                 ▼                                   ├──► normalize_reply ──► Reply
//!          fallback transport ─(retry policy)──► ok ──┘
//!                 │ failed
//!                 ▼
//!          CompletionError (last status + body excerpt)
//! ```

mod retry;
mod transport;

pub use retry::{Backoff, RetryPolicy};
pub use transport::{render_chatml, ChatCompletions, EdgeEndpoint, TextGeneration, Transport};

use crate::error::{CompletionError, VoiceError, VoiceResult};
use crate::history::{shape_request, ConversationTurn};
use crate::text::normalize_reply;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are EDGE AI, a concise helpful assistant.";

/// What the controller needs from a completion backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Complete `history` (the full transcript) into a normalized, non-empty reply.
    async fn complete(&self, history: &[ConversationTurn]) -> Result<String, CompletionError>;
}

/// Configuration for the completion client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Completion endpoint URL (default: http://127.0.0.1:8000/api/chat)
    pub endpoint: String,

    /// Optional model name forwarded to the endpoint
    pub model: Option<String>,

    /// Instruction text sent as the single system turn
    pub system_prompt: String,

    /// Trailing turns transmitted per request (default: 12)
    pub history_window: usize,

    /// Reply word cap (default: 80)
    pub max_words: usize,

    /// Total attempts per transport (default: 3)
    pub max_attempts: u32,

    /// First backoff delay, doubled per retry (default: 800ms)
    pub base_delay_ms: u64,

    /// Upper bound of random jitter per retry (default: 200ms)
    pub jitter_ms: u64,

    /// Per-request timeout (default: 60s)
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000/api/chat".to_string(),
            model: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_window: 12,
            max_words: 80,
            max_attempts: 3,
            base_delay_ms: 800,
            jitter_ms: 200,
            timeout_secs: 60,
        }
    }
}

impl CompletionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_jitter: Duration::from_millis(self.jitter_ms),
            seed: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A normalized reply and the transport that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub mode: &'static str,
}

pub struct RemoteCompletionClient {
    primary: Box<dyn Transport>,
    fallback: Option<Box<dyn Transport>>,
    policy: RetryPolicy,
    system_prompt: String,
    window: usize,
    max_words: Option<usize>,
}

impl RemoteCompletionClient {
    pub fn new(primary: Box<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            primary,
            fallback: None,
            policy,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            window: 12,
            max_words: Some(80),
        }
    }

    /// Client for the edge endpoint described by `config`.
    pub fn from_config(config: &CompletionConfig) -> VoiceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| VoiceError::Config(format!("http client: {}", e)))?;
        let primary = EdgeEndpoint::new(http, config.endpoint.clone(), config.model.clone());
        Ok(Self::new(Box::new(primary), config.retry_policy())
            .with_system_prompt(config.system_prompt.clone())
            .with_window(config.history_window)
            .with_max_words(Some(config.max_words)))
    }

    /// One-shot protocol fallback, tried when the primary transport gives up.
    pub fn with_fallback(mut self, fallback: Box<dyn Transport>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// `None` leaves replies uncapped (trimmed only).
    pub fn with_max_words(mut self, max_words: Option<usize>) -> Self {
        self.max_words = max_words;
        self
    }

    /// Send `history` and return the normalized reply.
    pub async fn send(&self, history: &[ConversationTurn]) -> Result<Reply, CompletionError> {
        let messages = shape_request(&self.system_prompt, history, self.window);

        let primary = self.primary.as_ref();
        let (raw, mode) = match self
            .policy
            .run(primary.mode(), |_| primary.attempt(&messages))
            .await
        {
            Ok(raw) => (raw, primary.mode()),
            Err(err) => {
                let Some(fallback) = self.fallback.as_deref() else {
                    return Err(err);
                };
                warn!(
                    "{} transport failed ({}); falling back to {}",
                    primary.mode(),
                    err,
                    fallback.mode()
                );
                let raw = self
                    .policy
                    .run(fallback.mode(), |_| fallback.attempt(&messages))
                    .await?;
                (raw, fallback.mode())
            }
        };

        let text = normalize_reply(&raw, self.max_words.unwrap_or(usize::MAX));
        if text.is_empty() {
            return Err(CompletionError::InvalidResponse("empty reply".to_string()));
        }
        info!("💬 reply via {} ({} chars)", mode, text.len());
        Ok(Reply { text, mode })
    }
}

#[async_trait]
impl CompletionService for RemoteCompletionClient {
    async fn complete(&self, history: &[ConversationTurn]) -> Result<String, CompletionError> {
        self.send(history).await.map(|reply| reply.text)
    }
}
