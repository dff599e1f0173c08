//! API request and response types

use crate::conversation::{ChatMode, ManualSummary};
use crate::db::{Role, User};
use serde::{Deserialize, Serialize};

/// Request to submit a free-text prompt
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
    /// Defaults to the session's current mode
    #[serde(default)]
    pub mode: Option<ChatMode>,
}

/// Request to switch the interaction mode
#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: ChatMode,
}

/// Query for a manual upload
#[derive(Debug, Deserialize)]
pub struct ManualQuery {
    pub file_name: String,
}

/// Response for chat actions
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    /// Whether a reply is being generated in the background
    pub queued: bool,
}

#[derive(Debug, Serialize)]
pub struct ModeResponse {
    pub mode: ChatMode,
}

#[derive(Debug, Serialize)]
pub struct ManualResponse {
    pub manual: ManualSummary,
}

/// Signed-in user and what they may do
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user: Option<User>,
    pub can_upload: bool,
    pub can_manage_users: bool,
    pub grantable_roles: Vec<Role>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}
