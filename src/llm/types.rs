//! Common types for provider interactions

use futures::stream::BoxStream;

use super::LlmError;

/// Provider request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: Vec<SystemContent>,
    pub messages: Vec<LlmMessage>,
    pub response_format: ResponseFormat,
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// Single-turn free-text request
    pub fn text(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: vec![SystemContent::new(system)],
            messages: vec![LlmMessage::user(prompt)],
            response_format: ResponseFormat::Text,
            max_tokens: None,
        }
    }
}

/// System instruction block
#[derive(Debug, Clone)]
pub struct SystemContent {
    pub text: String,
}

impl SystemContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Message in conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmMessage {
    pub role: MessageRole,
    pub text: String,
}

impl LlmMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Model,
            text: text.into(),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Model,
}

/// What shape the provider is asked to answer in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    /// A single JSON document
    Json,
}

/// One-shot provider response
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    /// Concatenated text parts; `None` when the provider returned no text at all
    pub text: Option<String>,
    pub usage: Usage,
}

/// Incremental text fragments in arrival order
pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

/// Usage statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
