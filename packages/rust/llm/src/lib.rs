//! Text-generation service abstraction for modeldoc.
//!
//! Stages never talk to a provider directly: they hold a
//! `dyn TextGenerator` and classify failures through [`GenerateError`].
//! - [`OpenRouterClient`]: OpenAI-compatible chat-completions over HTTP
//! - [`UnavailableGenerator`]: always fails; drives heuristic-only runs
//! - [`retry`]: bounded exponential backoff for transient failures

mod openrouter;
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;
use modeldoc_shared::ModelDocError;
use serde::{Deserialize, Serialize};

pub use openrouter::OpenRouterClient;
pub use retry::{Attempted, RetryPolicy, with_retry};

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// Per-call generation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_output_tokens: 4096,
        }
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// One successful generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: Option<UsageStats>,
    /// Model that actually served the request, when reported.
    pub model: Option<String>,
    pub latency_ms: u64,
}

impl Generation {
    /// A generation with text only; used by generators without accounting.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            model: None,
            latency_ms: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a generation call failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerateError {
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication rejected (HTTP {status})")]
    Auth { status: u16 },

    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("provider returned no text")]
    Empty,

    #[error("text generation unavailable: {0}")]
    Unavailable(String),
}

impl GenerateError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Server { .. }
                | Self::Timeout(_)
                | Self::Transport(_)
                | Self::Empty
        )
    }
}

impl From<GenerateError> for ModelDocError {
    fn from(err: GenerateError) -> Self {
        match err {
            GenerateError::Transport(msg) => ModelDocError::Network(msg),
            other => ModelDocError::Generation(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A service that turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `prompt`.
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, GenerateError>;

    /// Model identifier recorded in run metadata.
    fn model_id(&self) -> &str;
}

/// A generator that is never available. Every stage falls back to its
/// heuristic payload.
#[derive(Debug, Clone)]
pub struct UnavailableGenerator {
    reason: String,
}

impl UnavailableGenerator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Default for UnavailableGenerator {
    fn default() -> Self {
        Self::new("offline mode")
    }
}

#[async_trait]
impl TextGenerator for UnavailableGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<Generation, GenerateError> {
        Err(GenerateError::Unavailable(self.reason.clone()))
    }

    fn model_id(&self) -> &str {
        "offline"
    }
}
