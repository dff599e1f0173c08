//! Conversation log entries

use crate::manual::ImageContent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
    System,
}

/// Interaction mode for the next prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    #[default]
    Qa,
    Troubleshooting,
}

/// A choice offered by a troubleshooting step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageOption {
    /// Label shown to the user
    pub text: String,
    /// Value fed back as the next prompt
    pub payload: String,
}

impl MessageOption {
    /// Option whose label doubles as its payload
    pub fn from_label(label: impl Into<String>) -> Self {
        let text = label.into();
        Self {
            payload: text.clone(),
            text,
        }
    }
}

/// One entry in the conversation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender: Sender,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageContent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<MessageOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_final_step: Option<bool>,
}

impl Message {
    fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            text: text.into(),
            images: None,
            options: None,
            is_final_step: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self::new(Sender::Ai, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Sender::System, text)
    }

    #[allow(dead_code)] // Used in tests
    pub fn has_options(&self) -> bool {
        self.options.as_ref().is_some_and(|o| !o.is_empty())
    }
}
