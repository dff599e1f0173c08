//! Effects produced by state transitions

use crate::conversation::MessageOption;

/// Effects to be executed by the conversation engine after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    AppendSystemMessage { text: String },

    AppendUserMessage { text: String },

    /// Empty AI message that the rest of the turn fills in
    AppendPlaceholder,

    /// Stream a free-text answer into the placeholder
    StreamAnswer { prompt: String },

    /// Ask for one structured step. `include_choice` keeps the just-appended
    /// user message in the history sent along with the prompt.
    RequestStep { prompt: String, include_choice: bool },

    /// Complete the placeholder and attach cited images
    FinalizeReply {
        text: String,
        options: Option<Vec<MessageOption>>,
        is_final_step: Option<bool>,
    },

    /// Overwrite the placeholder with a failure description
    FailReply { text: String },
}

impl Effect {
    pub fn system(text: impl Into<String>) -> Self {
        Effect::AppendSystemMessage { text: text.into() }
    }

    /// Talks to the AI gateway
    #[allow(dead_code)] // Used in tests
    pub fn is_gateway_call(&self) -> bool {
        matches!(self, Effect::StreamAnswer { .. } | Effect::RequestStep { .. })
    }
}
