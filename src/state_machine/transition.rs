//! Pure state transition function

use super::{ConvContext, ConvState, Effect, Event, StepOutcome};
use crate::conversation::{ChatMode, MessageOption};
use thiserror::Error;

pub const LOAD_MANUAL_PROMPT: &str = "Please load a manual to get started.";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Reasons a submission is not admitted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("A reply is still in progress, wait for it to finish")]
    Busy,
    #[error("Choose one of the offered options to continue")]
    AwaitingChoice,
    #[error("No options are pending")]
    NotAwaitingChoice,
    #[error("Option is not one of the pending choices: {0}")]
    UnknownOption(String),
    #[error("Options can only be chosen in troubleshooting mode")]
    WrongMode,
    #[error("Prompt is empty")]
    EmptyPrompt,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs and performs no
/// I/O. Rejections leave the caller's state untouched.
pub fn transition(
    state: &ConvState,
    context: &ConvContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    // Missing manual fails soft before anything else is checked
    if matches!(event, Event::UserPrompt { .. } | Event::OptionChosen { .. })
        && !context.manual_loaded
    {
        return Ok(TransitionResult::new(state.clone()).with_effect(Effect::system(LOAD_MANUAL_PROMPT)));
    }

    match (state, event) {
        // ============================================================
        // User input
        // ============================================================
        (s, Event::UserPrompt { .. } | Event::OptionChosen { .. }) if s.is_busy() => {
            Err(TransitionError::Busy)
        }

        (ConvState::AwaitingChoice { .. }, Event::UserPrompt { .. }) => {
            Err(TransitionError::AwaitingChoice)
        }

        (ConvState::Idle | ConvState::Resolved, Event::UserPrompt { text, mode }) => {
            if text.trim().is_empty() {
                return Err(TransitionError::EmptyPrompt);
            }
            Ok(start_turn(text.clone(), text, mode, false))
        }

        (ConvState::AwaitingChoice { options }, Event::OptionChosen { option }) => {
            if context.mode != ChatMode::Troubleshooting {
                return Err(TransitionError::WrongMode);
            }
            if !options.contains(&option) {
                return Err(TransitionError::UnknownOption(option.text));
            }
            let MessageOption { text, payload } = option;
            Ok(start_turn(text, payload, ChatMode::Troubleshooting, true))
        }

        (_, Event::OptionChosen { .. }) => Err(TransitionError::NotAwaitingChoice),

        // ============================================================
        // Turn completion
        // ============================================================
        (ConvState::Answering, Event::AnswerComplete { text }) => {
            Ok(TransitionResult::new(ConvState::Idle).with_effect(Effect::FinalizeReply {
                text,
                options: None,
                is_final_step: None,
            }))
        }

        (ConvState::Diagnosing, Event::StepComplete { outcome }) => Ok(complete_step(outcome)),

        (ConvState::Answering | ConvState::Diagnosing, Event::TurnFailed { reason }) => {
            Ok(TransitionResult::new(ConvState::Idle).with_effect(Effect::FailReply {
                text: format!("Sorry, an error occurred: {reason}"),
            }))
        }

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {state:?} with {event:?}"
        ))),
    }
}

/// Admit a turn: user message, placeholder, then the gateway call
fn start_turn(display: String, prompt: String, mode: ChatMode, include_choice: bool) -> TransitionResult {
    let (state, request) = match mode {
        ChatMode::Qa => (ConvState::Answering, Effect::StreamAnswer { prompt }),
        ChatMode::Troubleshooting => (
            ConvState::Diagnosing,
            Effect::RequestStep {
                prompt,
                include_choice,
            },
        ),
    };

    TransitionResult::new(state).with_effects([
        Effect::AppendUserMessage { text: display },
        Effect::AppendPlaceholder,
        request,
    ])
}

fn complete_step(outcome: StepOutcome) -> TransitionResult {
    match outcome {
        StepOutcome::Solution { solution } => {
            TransitionResult::new(ConvState::Resolved).with_effect(Effect::FinalizeReply {
                text: solution,
                options: None,
                is_final_step: Some(true),
            })
        }
        StepOutcome::Question { question, options } => {
            let options: Vec<MessageOption> =
                options.iter().map(|o| MessageOption::from_label(o)).collect();
            let (state, attached) = if options.is_empty() {
                (ConvState::Idle, None)
            } else {
                (
                    ConvState::AwaitingChoice {
                        options: options.clone(),
                    },
                    Some(options),
                )
            };
            TransitionResult::new(state).with_effect(Effect::FinalizeReply {
                text: question,
                options: attached,
                is_final_step: Some(false),
            })
        }
    }
}
