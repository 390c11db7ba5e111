//! OpenAI-compatible chat-completions client (OpenRouter by default).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use modeldoc_shared::{AppConfig, ModelDocError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use crate::{GenerateError, GenerateOptions, Generation, TextGenerator, UsageStats};

/// User-Agent string for generation requests.
const USER_AGENT: &str = concat!("modeldoc/", env!("CARGO_PKG_VERSION"));

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Chat-completions client for any OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenRouterClient {
    /// Build a client for `{base_url}/chat/completions`.
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> modeldoc_shared::Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| ModelDocError::config(format!("invalid llm.base_url `{base_url}`: {e}")))?;
        let endpoint = format!("{}/chat/completions", base.as_str().trim_end_matches('/'));

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ModelDocError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
            model: model.into(),
            timeout,
        })
    }

    /// Build a client from the `[llm]` config section and its API key env var.
    pub fn from_config(config: &AppConfig) -> modeldoc_shared::Result<Self> {
        let key = modeldoc_shared::api_key(config)?;
        Self::new(
            &config.llm.base_url,
            key,
            config.llm.model.clone(),
            Duration::from_secs(config.llm.timeout_secs),
        )
    }

    /// Override the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> GenerateError {
        let message: String = body.chars().take(MAX_ERROR_BODY).collect();
        match status.as_u16() {
            429 => GenerateError::RateLimited { retry_after },
            401 | 403 => GenerateError::Auth {
                status: status.as_u16(),
            },
            408 => GenerateError::Timeout(Duration::ZERO),
            code if status.is_server_error() => GenerateError::Server {
                status: code,
                message,
            },
            code => GenerateError::Rejected {
                status: code,
                message,
            },
        }
    }

    fn map_transport(&self, err: reqwest::Error) -> GenerateError {
        if err.is_timeout() {
            GenerateError::Timeout(self.timeout)
        } else {
            GenerateError::Transport(err.to_string())
        }
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Turn a 200 response body into a [`Generation`].
fn parse_body(body: &str, latency_ms: u64) -> Result<Generation, GenerateError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| GenerateError::InvalidResponse(format!("malformed JSON body: {e}")))?;

    if let Some(error) = parsed.error {
        let code = error
            .code
            .as_ref()
            .and_then(serde_json::Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(500);
        return Err(match code {
            429 => GenerateError::RateLimited { retry_after: None },
            401 | 403 => GenerateError::Auth { status: code },
            c if c >= 500 => GenerateError::Server {
                status: c,
                message: error.message,
            },
            c => GenerateError::Rejected {
                status: c,
                message: error.message,
            },
        });
    }

    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|t| !t.trim().is_empty())
        .ok_or(GenerateError::Empty)?;

    Ok(Generation {
        text,
        usage: parsed.usage.map(|u| UsageStats {
            tokens_in: u.prompt_tokens,
            tokens_out: u.completion_tokens,
        }),
        model: parsed.model,
        latency_ms,
    })
}

#[async_trait]
impl TextGenerator for OpenRouterClient {
    #[instrument(skip_all, fields(model = %self.model, prompt_chars = prompt.len()))]
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, GenerateError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: options.temperature,
            max_tokens: options.max_output_tokens,
        };

        let start = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.map_err(|e| self.map_transport(e))?;
        let latency_ms = start.elapsed().as_millis() as u64;

        if !status.is_success() {
            debug!(%status, latency_ms, "generation request failed");
            return Err(Self::classify_status(status, retry_after, &body));
        }

        let generation = parse_body(&body, latency_ms)?;
        debug!(
            latency_ms,
            tokens_out = generation.usage.map(|u| u.tokens_out).unwrap_or(0),
            "generation complete"
        );
        Ok(generation)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
