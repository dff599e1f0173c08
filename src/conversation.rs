//! Conversation engine
//!
//! Owns the message log, the interaction mode and the troubleshooting state.
//! Every submission goes through the pure [`transition`] function; the engine
//! executes the resulting effects, calls the AI gateway and feeds the outcome
//! back in as another event.
//!
//! A turn is split into an admission step ([`ConversationEngine::begin_prompt`],
//! [`ConversationEngine::begin_option`]) that runs under the lock and returns a
//! [`PendingTurn`], and [`ConversationEngine::run_turn`] which talks to the
//! gateway without holding the lock. At most one turn is in flight at a time.
//! The HTTP layer spawns `run_turn` so it can answer before the reply is done;
//! [`ConversationEngine::submit_prompt`] and [`ConversationEngine::submit_option`]
//! chain both steps in place and are what the engine tests drive.

mod message;
#[cfg(test)]
pub(crate) mod testing;

pub use message::{ChatMode, Message, MessageOption, Sender};

use crate::gateway::AiGateway;
use crate::manual::{resolve_images, DocumentError, ManualContent, ManualStore};
use crate::state_machine::{transition, ConvContext, ConvState, Effect, Event, TransitionError};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notifications for connected clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageAppended { message: Message },
    /// Placeholder filled in (streamed text, final reply or failure)
    MessageUpdated { message: Message },
    StateChange { state: ConvState },
    /// Log replaced wholesale (manual loaded, load failed, logout)
    Reset { messages: Vec<Message> },
}

/// Summary of the loaded manual
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualSummary {
    pub file_name: String,
    pub image_count: usize,
}

/// Point-in-time copy of the engine's observable state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub messages: Vec<Message>,
    pub mode: ChatMode,
    pub state: ConvState,
    pub busy: bool,
    pub manual: Option<ManualSummary>,
}

/// An admitted turn waiting for its gateway call
#[derive(Debug)]
pub struct PendingTurn {
    generation: u64,
    placeholder_id: String,
    manual: Arc<ManualContent>,
    request: TurnRequest,
}

#[derive(Debug)]
enum TurnRequest {
    Stream { prompt: String },
    Step { prompt: String, history: Vec<Message> },
}

struct Inner {
    manual: ManualStore,
    messages: Vec<Message>,
    mode: ChatMode,
    state: ConvState,
    /// Bumped whenever the log is replaced; stale turns compare against it
    generation: u64,
}

impl Inner {
    fn context(&self) -> ConvContext {
        ConvContext::new(self.manual.is_loaded(), self.mode)
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}

pub struct ConversationEngine<G> {
    gateway: G,
    inner: Mutex<Inner>,
    events: broadcast::Sender<ChatEvent>,
}

impl<G: AiGateway> ConversationEngine<G> {
    pub fn new(gateway: G) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            gateway,
            inner: Mutex::new(Inner {
                manual: ManualStore::new(),
                messages: Vec::new(),
                mode: ChatMode::default(),
                state: ConvState::Idle,
                generation: 0,
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    // ============================================================
    // Queries
    // ============================================================

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn state(&self) -> ConvState {
        self.lock().state.clone()
    }

    pub fn mode(&self) -> ChatMode {
        self.lock().mode
    }

    pub fn is_busy(&self) -> bool {
        self.lock().state.is_busy()
    }

    pub fn manual(&self) -> Option<Arc<ManualContent>> {
        self.lock().manual.current()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        let inner = self.lock();
        ConversationSnapshot {
            messages: inner.messages.clone(),
            mode: inner.mode,
            state: inner.state.clone(),
            busy: inner.state.is_busy(),
            manual: inner.manual.current().map(|m| ManualSummary {
                file_name: m.file_name.clone(),
                image_count: m.image_count(),
            }),
        }
    }

    // ============================================================
    // Session lifecycle
    // ============================================================

    /// Switching mode keeps the history; it only affects the next prompt
    pub fn set_mode(&self, mode: ChatMode) {
        let mut inner = self.lock();
        if inner.mode != mode {
            tracing::info!(?mode, "Chat mode changed");
            inner.mode = mode;
        }
    }

    /// Replace the manual and start a fresh log
    pub fn load_manual(&self, content: ManualContent) -> Result<(), TransitionError> {
        let announcement = format!(
            "Manual \"{}\" loaded successfully. Found {} images.",
            content.file_name,
            content.image_count()
        );
        tracing::info!(
            file_name = %content.file_name,
            images = content.image_count(),
            "Loading manual"
        );
        self.replace_log(Some(content), Some(announcement), true)
    }

    /// A failed upload also discards the previous manual
    pub fn report_load_failure(&self, error: &DocumentError) -> Result<(), TransitionError> {
        tracing::warn!(error = %error, "Manual load failed");
        self.replace_log(None, Some(format!("Error: {error}. Try another file.")), true)
    }

    /// Logout: forget the manual and the log, abandoning any turn in flight
    pub fn reset(&self) {
        tracing::info!("Conversation reset");
        // Only fails when busy sessions are rejected
        let _ = self.replace_log(None, None, false);
    }

    fn replace_log(
        &self,
        manual: Option<ManualContent>,
        announcement: Option<String>,
        reject_when_busy: bool,
    ) -> Result<(), TransitionError> {
        let mut inner = self.lock();
        if reject_when_busy && inner.state.is_busy() {
            return Err(TransitionError::Busy);
        }

        match manual {
            Some(content) => {
                inner.manual.load(content);
            }
            None => inner.manual.clear(),
        }
        inner.messages = announcement.into_iter().map(Message::system).collect();
        inner.generation += 1;
        let state_changed = inner.state != ConvState::Idle;
        inner.state = ConvState::Idle;

        let messages = inner.messages.clone();
        drop(inner);

        self.emit(ChatEvent::Reset { messages });
        if state_changed {
            self.emit(ChatEvent::StateChange {
                state: ConvState::Idle,
            });
        }
        Ok(())
    }

    // ============================================================
    // Turns
    // ============================================================

    /// Submit free text and run the turn to completion
    #[allow(dead_code)] // Test-side entry point, see module docs
    pub async fn submit_prompt(&self, text: &str, mode: ChatMode) -> Result<(), TransitionError> {
        if let Some(turn) = self.begin_prompt(text, mode)? {
            self.run_turn(turn).await;
        }
        Ok(())
    }

    /// Choose one of the pending options and run the turn to completion
    #[allow(dead_code)] // Test-side entry point, see module docs
    pub async fn submit_option(&self, option: MessageOption) -> Result<(), TransitionError> {
        if let Some(turn) = self.begin_option(option)? {
            self.run_turn(turn).await;
        }
        Ok(())
    }

    /// Admit a prompt. `Ok(None)` means the submission was answered locally
    /// (no manual loaded) and no gateway call is needed.
    pub fn begin_prompt(&self, text: &str, mode: ChatMode) -> Result<Option<PendingTurn>, TransitionError> {
        self.begin(Event::UserPrompt {
            text: text.to_string(),
            mode,
        })
    }

    pub fn begin_option(&self, option: MessageOption) -> Result<Option<PendingTurn>, TransitionError> {
        self.begin(Event::OptionChosen { option })
    }

    fn begin(&self, event: Event) -> Result<Option<PendingTurn>, TransitionError> {
        let mut inner = self.lock();
        let result = match transition(&inner.state, &inner.context(), event) {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(error = %e, state = ?inner.state, "Submission rejected");
                return Err(e);
            }
        };

        let state_changed = result.new_state != inner.state;
        inner.state = result.new_state;
        let mut events = Vec::new();
        let mut placeholder_id = None;
        let mut request = None;

        for effect in result.effects {
            match effect {
                Effect::AppendSystemMessage { text } => {
                    events.push(append(&mut inner, Message::system(text)));
                }
                Effect::AppendUserMessage { text } => {
                    events.push(append(&mut inner, Message::user(text)));
                }
                Effect::AppendPlaceholder => {
                    let placeholder = Message::ai("");
                    placeholder_id = Some(placeholder.id.clone());
                    events.push(append(&mut inner, placeholder));
                }
                Effect::StreamAnswer { prompt } => {
                    request = Some(TurnRequest::Stream { prompt });
                }
                Effect::RequestStep {
                    prompt,
                    include_choice,
                } => {
                    // Everything before the placeholder, minus the new user
                    // message unless it is the chosen option
                    let mut end = inner.messages.len().saturating_sub(1);
                    if !include_choice {
                        end = end.saturating_sub(1);
                    }
                    let history = inner.messages[..end]
                        .iter()
                        .filter(|m| m.sender != Sender::System)
                        .cloned()
                        .collect();
                    request = Some(TurnRequest::Step { prompt, history });
                }
                other => {
                    tracing::warn!(effect = ?other, "Unexpected effect on admission");
                }
            }
        }
        if state_changed {
            events.push(ChatEvent::StateChange {
                state: inner.state.clone(),
            });
        }

        let turn = match (request, placeholder_id, inner.manual.current()) {
            (Some(request), Some(placeholder_id), Some(manual)) => Some(PendingTurn {
                generation: inner.generation,
                placeholder_id,
                manual,
                request,
            }),
            _ => None,
        };
        drop(inner);

        for event in events {
            self.emit(event);
        }
        if let Some(turn) = &turn {
            tracing::info!(placeholder_id = %turn.placeholder_id, "Turn started");
        }
        Ok(turn)
    }

    /// Run an admitted turn through the gateway and record the outcome
    pub async fn run_turn(&self, turn: PendingTurn) {
        let event = match &turn.request {
            TurnRequest::Stream { prompt } => {
                let mut accumulated = String::new();
                let mut on_fragment = |fragment: &str| {
                    accumulated.push_str(fragment);
                    self.write_partial(&turn, &accumulated);
                };
                let result = self
                    .gateway
                    .stream_answer(
                        prompt,
                        &turn.manual.text,
                        turn.manual.image_count(),
                        &mut on_fragment,
                    )
                    .await;
                match result {
                    Ok(()) => Event::AnswerComplete { text: accumulated },
                    Err(e) => Event::TurnFailed {
                        reason: e.to_string(),
                    },
                }
            }
            TurnRequest::Step { prompt, history } => {
                match self
                    .gateway
                    .structured_step(prompt, &turn.manual.text, history)
                    .await
                {
                    Ok(step) => Event::StepComplete {
                        outcome: step.into_outcome(),
                    },
                    Err(e) => Event::TurnFailed {
                        reason: e.to_string(),
                    },
                }
            }
        };

        if let Event::TurnFailed { reason } = &event {
            tracing::error!(placeholder_id = %turn.placeholder_id, error = %reason, "Turn failed");
        }
        self.complete(&turn, event);
    }

    /// Overwrite the placeholder with the text received so far
    fn write_partial(&self, turn: &PendingTurn, text: &str) {
        let mut inner = self.lock();
        if inner.generation != turn.generation {
            return;
        }
        let Some(message) = inner.message_mut(&turn.placeholder_id) else {
            return;
        };
        message.text = text.to_string();
        let message = message.clone();
        drop(inner);
        self.emit(ChatEvent::MessageUpdated { message });
    }

    fn complete(&self, turn: &PendingTurn, event: Event) {
        let mut inner = self.lock();
        if inner.generation != turn.generation {
            tracing::info!(placeholder_id = %turn.placeholder_id, "Discarding result of abandoned turn");
            return;
        }

        let result = match transition(&inner.state, &inner.context(), event) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Turn completion rejected");
                return;
            }
        };
        inner.state = result.new_state;

        let mut updated = None;
        for effect in result.effects {
            let Some(message) = inner.message_mut(&turn.placeholder_id) else {
                break;
            };
            match effect {
                Effect::FinalizeReply {
                    text,
                    options,
                    is_final_step,
                } => {
                    let images = resolve_images(&text, &turn.manual);
                    message.text = text;
                    message.options = options;
                    message.is_final_step = is_final_step;
                    message.images = (!images.is_empty()).then_some(images);
                }
                Effect::FailReply { text } => {
                    message.text = text;
                }
                other => {
                    tracing::warn!(effect = ?other, "Unexpected effect on completion");
                    continue;
                }
            }
            updated = Some(message.clone());
        }
        let state = inner.state.clone();
        drop(inner);

        if let Some(message) = updated {
            self.emit(ChatEvent::MessageUpdated { message });
        }
        self.emit(ChatEvent::StateChange { state });
        tracing::info!(placeholder_id = %turn.placeholder_id, "Turn finished");
    }
}

fn append(inner: &mut Inner, message: Message) -> ChatEvent {
    inner.messages.push(message.clone());
    ChatEvent::MessageAppended { message }
}
