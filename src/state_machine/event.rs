//! Events that can occur in a conversation

use crate::conversation::{ChatMode, MessageOption};

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // User events
    UserPrompt {
        text: String,
        mode: ChatMode,
    },
    OptionChosen {
        option: MessageOption,
    },

    // Gateway events
    /// The streamed answer finished; `text` is the full accumulated reply
    AnswerComplete {
        text: String,
    },
    StepComplete {
        outcome: StepOutcome,
    },
    TurnFailed {
        reason: String,
    },
}

/// Decoded troubleshooting step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Question {
        question: String,
        options: Vec<String>,
    },
    Solution {
        solution: String,
    },
}
