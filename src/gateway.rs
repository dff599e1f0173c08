//! AI Gateway
//!
//! Wraps the two hosted completion calls the assistant needs behind one
//! interface: a streamed free-text answer grounded on the manual, and a
//! single structured troubleshooting step. Errors are translated once here
//! and never retried.

mod prompts;

use crate::conversation::{Message, Sender};
use crate::llm::{
    GeminiService, LlmError, LlmMessage, LlmRequest, LlmService, LoggingService, ResponseFormat,
    SystemContent,
};
use crate::state_machine::StepOutcome;
use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, LazyLock, OnceLock};
use std::time::Duration;
use thiserror::Error;

pub use prompts::{grounding_instruction, troubleshooting_instruction};

const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Gateway failures, each with a distinct user-facing description
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("the AI credential is not configured (set GEMINI_API_KEY)")]
    Configuration,
    #[error("{0}")]
    Transport(#[from] LlmError),
    #[error("the assistant returned an empty response")]
    EmptyResponse,
    #[error("the assistant returned a response in an unexpected format")]
    MalformedResponse(#[source] serde_json::Error),
}

/// One structured troubleshooting step as produced by the model
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct TroubleshootingResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub question: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: Vec<String>,
    #[serde(default)]
    pub solution: Option<String>,
}

/// Models sometimes send `null` for the fields they leave unused
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl TroubleshootingResponse {
    /// A present, non-blank `solution` is terminal regardless of the other fields
    pub fn into_outcome(self) -> StepOutcome {
        match self.solution {
            Some(solution) if !solution.trim().is_empty() => StepOutcome::Solution { solution },
            _ => StepOutcome::Question {
                question: self.question,
                options: self.options,
            },
        }
    }
}

/// Interface the conversation engine talks to
#[async_trait]
pub trait AiGateway: Send + Sync {
    /// Stream a free-text answer, calling `on_fragment` for every non-empty
    /// fragment in arrival order
    async fn stream_answer(
        &self,
        prompt: &str,
        manual_text: &str,
        image_count: usize,
        on_fragment: &mut (dyn for<'f> FnMut(&'f str) + Send),
    ) -> Result<(), GatewayError>;

    /// Ask for the next troubleshooting step given the conversation so far
    async fn structured_step(
        &self,
        prompt: &str,
        manual_text: &str,
        history: &[Message],
    ) -> Result<TroubleshootingResponse, GatewayError>;
}

#[async_trait]
impl<T: AiGateway + ?Sized> AiGateway for Arc<T> {
    async fn stream_answer(
        &self,
        prompt: &str,
        manual_text: &str,
        image_count: usize,
        on_fragment: &mut (dyn for<'f> FnMut(&'f str) + Send),
    ) -> Result<(), GatewayError> {
        (**self)
            .stream_answer(prompt, manual_text, image_count, on_fragment)
            .await
    }

    async fn structured_step(
        &self,
        prompt: &str,
        manual_text: &str,
        history: &[Message],
    ) -> Result<TroubleshootingResponse, GatewayError> {
        (**self).structured_step(prompt, manual_text, history).await
    }
}

/// Configuration for the hosted AI backend
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: Option<String>,
    pub model: String,
    /// Alternative API base, e.g. a proxy
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("API_KEY"))
                .ok(),
            model: std::env::var("GEMINI_MODEL").unwrap_or(defaults.model),
            base_url: std::env::var("GEMINI_BASE_URL").ok(),
            timeout: std::env::var("GEMINI_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.timeout, Duration::from_secs),
        }
    }
}

/// Gateway backed by Gemini
///
/// Constructed once at start-up and shared by handle. The backend client is
/// only built on first use, so a missing credential surfaces as
/// [`GatewayError::Configuration`] on the first AI turn rather than at boot.
pub struct GeminiGateway {
    config: GatewayConfig,
    backend: OnceLock<Arc<dyn LlmService>>,
}

impl GeminiGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            backend: OnceLock::new(),
        }
    }

    /// Use an already constructed provider
    #[allow(dead_code)] // Used in tests
    pub fn with_backend(config: GatewayConfig, backend: Arc<dyn LlmService>) -> Self {
        let backend_cell = OnceLock::new();
        let _ = backend_cell.set(backend);
        Self {
            config,
            backend: backend_cell,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn backend(&self) -> Result<Arc<dyn LlmService>, GatewayError> {
        if let Some(backend) = self.backend.get() {
            return Ok(backend.clone());
        }

        let api_key = self
            .config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(GatewayError::Configuration)?;

        let service = GeminiService::new(
            api_key,
            &self.config.model,
            self.config.base_url.as_deref(),
            self.config.timeout,
        )?;
        let service: Arc<dyn LlmService> = Arc::new(LoggingService::new(Arc::new(service)));

        tracing::info!(model = %self.config.model, "AI backend initialized");
        Ok(self.backend.get_or_init(|| service).clone())
    }
}

#[async_trait]
impl AiGateway for GeminiGateway {
    async fn stream_answer(
        &self,
        prompt: &str,
        manual_text: &str,
        image_count: usize,
        on_fragment: &mut (dyn for<'f> FnMut(&'f str) + Send),
    ) -> Result<(), GatewayError> {
        let backend = self.backend()?;
        let request = LlmRequest::text(grounding_instruction(manual_text, image_count), prompt);

        let mut stream = backend.stream(&request).await?;
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            if !fragment.is_empty() {
                on_fragment(&fragment);
            }
        }
        Ok(())
    }

    async fn structured_step(
        &self,
        prompt: &str,
        manual_text: &str,
        history: &[Message],
    ) -> Result<TroubleshootingResponse, GatewayError> {
        let backend = self.backend()?;
        let request = LlmRequest {
            system: vec![SystemContent::new(troubleshooting_instruction(manual_text))],
            messages: history_turns(history, prompt),
            response_format: ResponseFormat::Json,
            max_tokens: None,
        };

        let response = backend.complete(&request).await?;
        parse_step(response.text.as_deref())
    }
}

/// Map the transcript to role-tagged turns, ending with the new prompt
pub fn history_turns(history: &[Message], prompt: &str) -> Vec<LlmMessage> {
    history
        .iter()
        .filter_map(|msg| match msg.sender {
            Sender::User => Some(LlmMessage::user(msg.text.clone())),
            Sender::Ai => Some(LlmMessage::model(msg.text.clone())),
            Sender::System => None,
        })
        .chain(std::iter::once(LlmMessage::user(prompt)))
        .collect()
}

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```(?:json)?\s*\n?(.*?)\n?\s*```$").expect("code fence pattern is valid")
});

/// Remove a surrounding ```json fence, if any
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    CODE_FENCE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|inner| !inner.is_empty())
        .unwrap_or(trimmed)
}

/// Decode the raw text of a structured step
pub fn parse_step(raw: Option<&str>) -> Result<TroubleshootingResponse, GatewayError> {
    let raw = raw
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .ok_or(GatewayError::EmptyResponse)?;

    serde_json::from_str(strip_code_fence(raw)).map_err(GatewayError::MalformedResponse)
}
