// src/llm.rs
//! Model backends behind the `Summarizer` trait. Selection is driven by the
//! configured model string: `ollama/<model>` talks to a local Ollama server,
//! anything else goes to an OpenAI-compatible chat-completions endpoint.
//! Transport failures and rate limits surface as transient errors so the
//! orchestrator can retry; everything else is fatal for that call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const ENV_OLLAMA_HOST: &str = "OLLAMA_HOST";
pub const ENV_API_KEY: &str = "DISTIL_API_KEY";
pub const ENV_API_BASE: &str = "DISTIL_API_BASE";

const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
    /// Worth retrying: timeouts, connection failures, 429, 5xx.
    Transient,
    /// Not worth retrying: bad request, missing credentials, empty output.
    Fatal,
}

#[derive(Debug, Error)]
#[error("model call failed ({kind:?}): {message}")]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub message: String,
}

impl ModelError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::Fatal,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ModelErrorKind::Transient
    }
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, system: &str, prompt: &str) -> Result<String, ModelError>;
    /// Model identifier for diagnostics and the document footer.
    fn model(&self) -> &str;
}

pub type DynSummarizer = Arc<dyn Summarizer>;

/// Build a backend from the configured model string.
pub fn backend_from_model(model: &str, timeout: Duration) -> DynSummarizer {
    match model.strip_prefix("ollama/") {
        Some(rest) => Arc::new(OllamaBackend::new(rest, timeout)),
        None => Arc::new(OpenAiCompatBackend::new(model, timeout)),
    }
}

fn build_http(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("distil/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()
        .expect("reqwest client")
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> ModelError {
    let message = format!("backend returned {status}: {}", body.chars().take(200).collect::<String>());
    if status.as_u16() == 429 || status.is_server_error() {
        ModelError::transient(message)
    } else {
        ModelError::fatal(message)
    }
}

fn classify_send_error(e: reqwest::Error) -> ModelError {
    // Timeouts and connection problems are transient by definition.
    ModelError::transient(format!("request failed: {e}"))
}

// ------------------------------------------------------------
// Ollama chat API
// ------------------------------------------------------------

pub struct OllamaBackend {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(model: &str, timeout: Duration) -> Self {
        let base_url =
            std::env::var(ENV_OLLAMA_HOST).unwrap_or_else(|_| DEFAULT_OLLAMA_HOST.to_string());
        Self {
            http: build_http(timeout),
            base_url,
            model: model.to_string(),
        }
    }

    pub fn with_base_url(model: &str, base_url: &str, timeout: Duration) -> Self {
        Self {
            http: build_http(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatMsg<'a> {
    role: &'a str,
    content: &'a str,
}

#[async_trait]
impl Summarizer for OllamaBackend {
    async fn summarize(&self, system: &str, prompt: &str) -> Result<String, ModelError> {
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<ChatMsg<'a>>,
            stream: bool,
        }
        #[derive(Deserialize)]
        struct Resp {
            message: RespMsg,
        }
        #[derive(Deserialize)]
        struct RespMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                ChatMsg {
                    role: "system",
                    content: system,
                },
                ChatMsg {
                    role: "user",
                    content: prompt,
                },
            ],
            stream: false,
        };

        let resp = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&req)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ModelError::fatal(format!("unexpected response shape: {e}")))?;
        let content = body.message.content.trim().to_string();
        if content.is_empty() {
            return Err(ModelError::fatal("backend returned empty content"));
        }
        Ok(content)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ------------------------------------------------------------
// OpenAI-compatible chat completions
// ------------------------------------------------------------

pub struct OpenAiCompatBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatBackend {
    pub fn new(model: &str, timeout: Duration) -> Self {
        let api_key = std::env::var(ENV_API_KEY).unwrap_or_default();
        let base_url =
            std::env::var(ENV_API_BASE).unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        Self {
            http: build_http(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Summarizer for OpenAiCompatBackend {
    async fn summarize(&self, system: &str, prompt: &str) -> Result<String, ModelError> {
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<ChatMsg<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        if self.api_key.is_empty() {
            return Err(ModelError::fatal(format!(
                "{ENV_API_KEY} is not set for model '{}'",
                self.model
            )));
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                ChatMsg {
                    role: "system",
                    content: system,
                },
                ChatMsg {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.2,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ModelError::fatal(format!("unexpected response shape: {e}")))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(ModelError::fatal("backend returned empty content"));
        }
        Ok(content)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ------------------------------------------------------------
// Mock backend for tests and local dry runs
// ------------------------------------------------------------

/// Deterministic backend: echoes a fixed reply. Tests that need failure
/// injection implement `Summarizer` themselves.
#[derive(Clone)]
pub struct MockSummarizer {
    pub fixed: String,
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, _system: &str, _prompt: &str) -> Result<String, ModelError> {
        Ok(self.fixed.clone())
    }

    fn model(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_string_routes_to_ollama() {
        let backend = backend_from_model("ollama/mistral:latest", Duration::from_secs(5));
        assert_eq!(backend.model(), "mistral:latest");
    }

    #[test]
    fn status_classification() {
        assert!(classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(reqwest::StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify_status(reqwest::StatusCode::BAD_REQUEST, "").is_transient());
        assert!(!classify_status(reqwest::StatusCode::UNAUTHORIZED, "").is_transient());
    }

    #[tokio::test]
    async fn mock_returns_its_fixed_reply() {
        let mock = MockSummarizer {
            fixed: "canned summary".to_string(),
        };
        let out = mock.summarize("system", "prompt").await.unwrap();
        assert_eq!(out, "canned summary");
        assert_eq!(mock.model(), "mock");
    }
}
