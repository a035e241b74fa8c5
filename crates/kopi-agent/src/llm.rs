//! Reasoning provider client.
//!
//! Supports the **Gemini generateContent API** and **OpenAI-compatible Chat
//! Completions endpoints** in non-streaming mode.  The client implements
//! [`ReasoningService`], the seam the planner and tool adapters consume, so
//! tests can substitute a scripted fake without touching the network.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::{debug, warn};

use kopi_tools::backend::{BackendError, ReasoningService};

use crate::error::{AgentError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default Gemini API base URL.
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default OpenAI API base URL.
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ---------------------------------------------------------------------------
// Provider enum
// ---------------------------------------------------------------------------

/// Identifies which reasoning provider the client should target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasoningProvider {
    /// Gemini generateContent API.
    Gemini,
    /// OpenAI Chat Completions API (also covers OpenAI-compatible endpoints).
    OpenAI,
}

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to a single reasoning provider endpoint.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// Which provider this configuration targets.
    pub provider: ReasoningProvider,
    /// API key for authentication.
    pub api_key: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Per-request timeout.
    pub request_timeout: std::time::Duration,
}

impl LlmClientConfig {
    /// Create a configuration for the Gemini API.
    pub fn gemini(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: ReasoningProvider::Gemini,
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_owned(),
            model: model.into(),
            request_timeout: std::time::Duration::from_secs(20),
        }
    }

    /// Create a configuration for the OpenAI API.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: ReasoningProvider::OpenAI,
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_owned(),
            model: model.into(),
            request_timeout: std::time::Duration::from_secs(20),
        }
    }

    /// Create a configuration for any OpenAI-compatible API (e.g. Ollama,
    /// Together, vLLM).
    pub fn openai_compatible(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            provider: ReasoningProvider::OpenAI,
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            request_timeout: std::time::Duration::from_secs(20),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A reasoning client that communicates with either the Gemini
/// generateContent API or an OpenAI-compatible Chat Completions API.
///
/// Only non-streaming mode is used: the controller always needs the complete
/// response before it can validate and act on it.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: LlmClientConfig,
    http: reqwest::Client,
}

impl LlmClient {
    /// Create a new client with the given configuration.
    pub fn new(config: LlmClientConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            let provider_name = match config.provider {
                ReasoningProvider::Gemini => "gemini",
                ReasoningProvider::OpenAI => "openai",
            };
            return Err(AgentError::MissingApiKey {
                provider: provider_name.into(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AgentError::ReasoningRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { config, http })
    }

    /// Send a prompt and return the model's text reply.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        match self.config.provider {
            ReasoningProvider::Gemini => self.generate_gemini(prompt).await,
            ReasoningProvider::OpenAI => self.generate_openai(prompt).await,
        }
    }

    // -----------------------------------------------------------------------
    // Gemini implementation
    // -----------------------------------------------------------------------

    async fn generate_gemini(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        debug!(model = %self.config.model, "gemini request");
        let resp = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            warn!(%status, "gemini request failed");
            return Err(AgentError::ReasoningRequestFailed {
                reason: format!("API returned {status}: {text}"),
            });
        }

        let v: Value =
            serde_json::from_str(&text).map_err(|e| AgentError::ReasoningParseFailed {
                reason: format!("invalid JSON response: {e}"),
            })?;
        parse_gemini_response(&v)
    }

    // -----------------------------------------------------------------------
    // OpenAI implementation
    // -----------------------------------------------------------------------

    async fn generate_openai(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": prompt }]
        });

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", self.config.api_key);
        let auth = HeaderValue::from_str(&bearer).map_err(|e| {
            AgentError::ReasoningRequestFailed {
                reason: format!("invalid api key header: {e}"),
            }
        })?;
        headers.insert(AUTHORIZATION, auth);

        debug!(model = %self.config.model, "openai request");
        let resp = self
            .http
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            warn!(%status, "openai request failed");
            return Err(AgentError::ReasoningRequestFailed {
                reason: format!("API returned {status}: {text}"),
            });
        }

        let v: Value =
            serde_json::from_str(&text).map_err(|e| AgentError::ReasoningParseFailed {
                reason: format!("invalid JSON response: {e}"),
            })?;
        parse_openai_response(&v)
    }
}

#[async_trait]
impl ReasoningService for LlmClient {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, BackendError> {
        self.generate(prompt)
            .await
            .map_err(|e| BackendError::Failed(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn parse_gemini_response(v: &Value) -> Result<String> {
    let text = v["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .ok_or_else(|| AgentError::ReasoningParseFailed {
            reason: "no text in first candidate".into(),
        })?;
    Ok(text.to_owned())
}

fn parse_openai_response(v: &Value) -> Result<String> {
    let text = v["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| AgentError::ReasoningParseFailed {
            reason: "no content in first choice".into(),
        })?;
    Ok(text.to_owned())
}
