//! Conversation state types

use crate::conversation::{ChatMode, MessageOption};
use serde::{Deserialize, Serialize};

/// Dialogue state owned by the conversation engine
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConvState {
    /// Ready for a new prompt
    #[default]
    Idle,

    /// Streaming a free-text answer
    Answering,

    /// Waiting for a structured troubleshooting step
    Diagnosing,

    /// The last reply offered choices; only one of them is accepted next
    AwaitingChoice { options: Vec<MessageOption> },

    /// The last reply was a final solution. New prompts start a fresh
    /// diagnostic thread on top of the same transcript.
    Resolved,
}

impl ConvState {
    /// A turn is in flight
    pub fn is_busy(&self) -> bool {
        matches!(self, ConvState::Answering | ConvState::Diagnosing)
    }

    #[allow(dead_code)] // Used in tests
    pub fn pending_options(&self) -> Option<&[MessageOption]> {
        match self {
            ConvState::AwaitingChoice { options } => Some(options),
            _ => None,
        }
    }
}

/// Facts about the session the transition function needs but does not own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvContext {
    pub manual_loaded: bool,
    pub mode: ChatMode,
}

impl ConvContext {
    pub fn new(manual_loaded: bool, mode: ChatMode) -> Self {
        Self {
            manual_loaded,
            mode,
        }
    }
}
