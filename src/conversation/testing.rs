//! Mock gateway and engine tests
//!
//! The mock replays scripted replies without any network I/O.

use super::*;
use crate::gateway::{GatewayError, TroubleshootingResponse};
use crate::llm::LlmError;
use crate::manual::ImageContent;
use crate::state_machine::transition::LOAD_MANUAL_PROMPT;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Notify;

// ============================================================================
// Mock Gateway
// ============================================================================

/// A gateway call as seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Stream {
        prompt: String,
        manual_text: String,
        image_count: usize,
    },
    Step {
        prompt: String,
        history: Vec<Message>,
    },
}

/// Gateway that replays queued scripts
#[derive(Default)]
pub struct MockGateway {
    streams: Mutex<VecDeque<(Vec<String>, Option<GatewayError>)>>,
    steps: Mutex<VecDeque<Result<TroubleshootingResponse, GatewayError>>>,
    /// Record of all calls made
    pub calls: Mutex<Vec<GatewayCall>>,
    /// When set, every call waits for a permit before replying
    gate: Option<Arc<Notify>>,
    /// Notified when a call starts
    pub call_started: Arc<Notify>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Queue a stream that yields `fragments` and then ends normally
    pub fn queue_stream(&self, fragments: &[&str]) {
        self.streams
            .lock()
            .unwrap()
            .push_back((fragments.iter().map(ToString::to_string).collect(), None));
    }

    /// Queue a stream that yields `fragments` and then fails
    pub fn queue_stream_error(&self, fragments: &[&str], error: GatewayError) {
        self.streams
            .lock()
            .unwrap()
            .push_back((fragments.iter().map(ToString::to_string).collect(), Some(error)));
    }

    pub fn queue_question(&self, question: &str, options: &[&str]) {
        self.queue_step(Ok(TroubleshootingResponse {
            question: question.to_string(),
            options: options.iter().map(ToString::to_string).collect(),
            solution: None,
        }));
    }

    pub fn queue_solution(&self, solution: &str) {
        self.queue_step(Ok(TroubleshootingResponse {
            question: String::new(),
            options: vec![],
            solution: Some(solution.to_string()),
        }));
    }

    pub fn queue_step(&self, step: Result<TroubleshootingResponse, GatewayError>) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn recorded_calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    async fn wait_for_gate(&self) {
        self.call_started.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl AiGateway for MockGateway {
    async fn stream_answer(
        &self,
        prompt: &str,
        manual_text: &str,
        image_count: usize,
        on_fragment: &mut (dyn for<'f> FnMut(&'f str) + Send),
    ) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(GatewayCall::Stream {
            prompt: prompt.to_string(),
            manual_text: manual_text.to_string(),
            image_count,
        });
        self.wait_for_gate().await;

        let script = self.streams.lock().unwrap().pop_front();
        let (fragments, error) = script.unwrap_or_else(|| {
            (
                vec![],
                Some(GatewayError::Transport(LlmError::network("No mock stream queued"))),
            )
        });
        for fragment in fragments.iter().filter(|f| !f.is_empty()) {
            on_fragment(fragment);
        }
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn structured_step(
        &self,
        prompt: &str,
        _manual_text: &str,
        history: &[Message],
    ) -> Result<TroubleshootingResponse, GatewayError> {
        self.calls.lock().unwrap().push(GatewayCall::Step {
            prompt: prompt.to_string(),
            history: history.to_vec(),
        });
        self.wait_for_gate().await;

        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::EmptyResponse))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_image_manual() -> ManualContent {
        ManualContent {
            text: "Hold RESET for five seconds. Front panel: [image 1]. Fuse: [image 2].".into(),
            images: vec![
                ImageContent {
                    src: "data:image/png;base64,AAAA".into(),
                    description: "Front panel".into(),
                },
                ImageContent {
                    src: "data:image/png;base64,BBBB".into(),
                    description: "Fuse box".into(),
                },
            ],
            file_name: "heater.docx".into(),
        }
    }

    fn engine_with_manual() -> (ConversationEngine<Arc<MockGateway>>, Arc<MockGateway>) {
        let gateway = Arc::new(MockGateway::new());
        let engine = ConversationEngine::new(gateway.clone());
        engine.load_manual(two_image_manual()).unwrap();
        (engine, gateway)
    }

    fn last(engine: &ConversationEngine<Arc<MockGateway>>) -> Message {
        engine.messages().last().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_load_manual_announces_and_resets() {
        let (engine, gateway) = engine_with_manual();
        gateway.queue_stream(&["Hi"]);
        engine.submit_prompt("Hello", ChatMode::Qa).await.unwrap();
        assert_eq!(engine.messages().len(), 3);

        engine.load_manual(two_image_manual()).unwrap();
        let messages = engine.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, Sender::System);
        assert_eq!(
            messages[0].text,
            "Manual \"heater.docx\" loaded successfully. Found 2 images."
        );
    }

    #[tokio::test]
    async fn test_missing_manual_appends_one_system_message() {
        let gateway = Arc::new(MockGateway::new());
        let engine = ConversationEngine::new(gateway.clone());

        engine.submit_prompt("How do I reset it?", ChatMode::Qa).await.unwrap();
        engine
            .submit_prompt("It is broken", ChatMode::Troubleshooting)
            .await
            .unwrap();

        let messages = engine.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages
            .iter()
            .all(|m| m.sender == Sender::System && m.text == LOAD_MANUAL_PROMPT));
        assert!(gateway.recorded_calls().is_empty());
    }

    #[tokio::test]
    async fn test_streamed_answer_resolves_images() {
        let (engine, gateway) = engine_with_manual();
        gateway.queue_stream(&["See ", "[image 1]", " for detail."]);

        engine
            .submit_prompt("Where is the panel?", ChatMode::Qa)
            .await
            .unwrap();

        let reply = last(&engine);
        assert_eq!(reply.sender, Sender::Ai);
        assert_eq!(reply.text, "See [image 1] for detail.");
        assert_eq!(reply.images, Some(vec![two_image_manual().images[0].clone()]));
        assert!(reply.options.is_none());
        assert!(reply.is_final_step.is_none());
        assert_eq!(engine.state(), ConvState::Idle);

        match &gateway.recorded_calls()[..] {
            [GatewayCall::Stream {
                prompt,
                manual_text,
                image_count,
            }] => {
                assert_eq!(prompt, "Where is the panel?");
                assert_eq!(manual_text, &two_image_manual().text);
                assert_eq!(*image_count, 2);
            }
            other => panic!("unexpected calls: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_placeholder_overwritten_in_arrival_order() {
        let (engine, gateway) = engine_with_manual();
        gateway.queue_stream(&["See ", "[image 1]", " for detail."]);
        let mut events = engine.subscribe();

        engine.submit_prompt("Where?", ChatMode::Qa).await.unwrap();

        let mut updates = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ChatEvent::MessageUpdated { message } = event {
                updates.push(message.text);
            }
        }
        assert_eq!(
            updates,
            vec![
                "See ",
                "See [image 1]",
                "See [image 1] for detail.",
                "See [image 1] for detail.",
            ]
        );
    }

    #[tokio::test]
    async fn test_answer_without_citations_has_no_images_field() {
        let (engine, gateway) = engine_with_manual();
        gateway.queue_stream(&["Hold RESET. See [image 9]."]);

        engine.submit_prompt("Reset?", ChatMode::Qa).await.unwrap();
        assert!(last(&engine).images.is_none());
    }

    #[tokio::test]
    async fn test_prompt_rejected_while_turn_in_flight() {
        let (engine, gateway) = engine_with_manual();
        gateway.queue_stream(&["done"]);

        let turn = engine.begin_prompt("first", ChatMode::Qa).unwrap().unwrap();
        assert!(engine.is_busy());
        let len = engine.messages().len();

        let err = engine.submit_prompt("second", ChatMode::Qa).await.unwrap_err();
        assert_eq!(err, TransitionError::Busy);
        let err = engine
            .submit_prompt("second", ChatMode::Troubleshooting)
            .await
            .unwrap_err();
        assert_eq!(err, TransitionError::Busy);
        assert_eq!(engine.messages().len(), len);

        engine.run_turn(turn).await;
        assert!(!engine.is_busy());
        assert_eq!(gateway.recorded_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_submission_rejected_while_gated() {
        let gate = Arc::new(Notify::new());
        let gateway = Arc::new(MockGateway::gated(gate.clone()));
        gateway.queue_stream(&["slow answer"]);
        let engine = Arc::new(ConversationEngine::new(gateway.clone()));
        engine.load_manual(two_image_manual()).unwrap();

        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.submit_prompt("first", ChatMode::Qa).await })
        };
        gateway.call_started.notified().await;

        assert!(engine.is_busy());
        assert_eq!(
            engine.submit_prompt("second", ChatMode::Qa).await,
            Err(TransitionError::Busy)
        );
        assert_eq!(
            engine.load_manual(two_image_manual()),
            Err(TransitionError::Busy)
        );

        gate.notify_one();
        task.await.unwrap().unwrap();
        assert!(!engine.is_busy());
        assert_eq!(last(&engine).text, "slow answer");
    }

    #[tokio::test]
    async fn test_question_yields_options_and_awaits_choice() {
        let (engine, gateway) = engine_with_manual();
        gateway.queue_question("Is the light blinking?", &["Yes", "No", "Not sure"]);

        engine
            .submit_prompt("It does not heat", ChatMode::Troubleshooting)
            .await
            .unwrap();

        let reply = last(&engine);
        assert_eq!(reply.text, "Is the light blinking?");
        assert_eq!(reply.is_final_step, Some(false));
        let options = reply.options.unwrap();
        assert_eq!(options.len(), 3);
        for (option, label) in options.iter().zip(["Yes", "No", "Not sure"]) {
            assert_eq!(option.text, label);
            assert_eq!(option.payload, label);
        }
        assert!(matches!(engine.state(), ConvState::AwaitingChoice { .. }));
    }

    #[tokio::test]
    async fn test_prompt_history_excludes_system_and_new_user_message() {
        let (engine, gateway) = engine_with_manual();
        gateway.queue_question("Is the light blinking?", &["Yes", "No"]);

        engine
            .submit_prompt("It does not heat", ChatMode::Troubleshooting)
            .await
            .unwrap();

        match &gateway.recorded_calls()[..] {
            [GatewayCall::Step { prompt, history }] => {
                assert_eq!(prompt, "It does not heat");
                assert!(history.is_empty());
            }
            other => panic!("unexpected calls: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_option_sends_payload_with_choice_in_history() {
        let (engine, gateway) = engine_with_manual();
        gateway.queue_question("Is the light blinking?", &["Yes", "No"]);
        gateway.queue_solution("Replace the fuse, see [image 2].");

        engine
            .submit_prompt("It does not heat", ChatMode::Troubleshooting)
            .await
            .unwrap();
        engine.set_mode(ChatMode::Troubleshooting);
        engine
            .submit_option(MessageOption::from_label("Yes"))
            .await
            .unwrap();

        let calls = gateway.recorded_calls();
        let GatewayCall::Step { prompt, history } = &calls[1] else {
            panic!("expected a step call");
        };
        assert_eq!(prompt, "Yes");
        let texts: Vec<_> = history.iter().map(|m| (m.sender, m.text.as_str())).collect();
        assert_eq!(
            texts,
            vec![
                (Sender::User, "It does not heat"),
                (Sender::Ai, "Is the light blinking?"),
                (Sender::User, "Yes"),
            ]
        );

        let reply = last(&engine);
        assert_eq!(reply.text, "Replace the fuse, see [image 2].");
        assert_eq!(reply.is_final_step, Some(true));
        assert!(reply.options.is_none());
        assert_eq!(reply.images, Some(vec![two_image_manual().images[1].clone()]));
        assert_eq!(engine.state(), ConvState::Resolved);
    }

    #[tokio::test]
    async fn test_free_text_rejected_while_awaiting_choice() {
        let (engine, gateway) = engine_with_manual();
        gateway.queue_question("Is the light blinking?", &["Yes", "No"]);
        engine
            .submit_prompt("It does not heat", ChatMode::Troubleshooting)
            .await
            .unwrap();
        let len = engine.messages().len();

        let err = engine
            .submit_prompt("Actually it is fine", ChatMode::Troubleshooting)
            .await
            .unwrap_err();
        assert_eq!(err, TransitionError::AwaitingChoice);

        engine.set_mode(ChatMode::Troubleshooting);
        let err = engine
            .submit_option(MessageOption::from_label("Maybe"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::UnknownOption(_)));
        assert_eq!(engine.messages().len(), len);
    }

    #[tokio::test]
    async fn test_option_requires_troubleshooting_mode() {
        let (engine, gateway) = engine_with_manual();
        gateway.queue_question("Is the light blinking?", &["Yes"]);
        engine
            .submit_prompt("It does not heat", ChatMode::Troubleshooting)
            .await
            .unwrap();

        engine.set_mode(ChatMode::Qa);
        let err = engine
            .submit_option(MessageOption::from_label("Yes"))
            .await
            .unwrap_err();
        assert_eq!(err, TransitionError::WrongMode);
    }

    #[tokio::test]
    async fn test_question_without_options_returns_to_idle() {
        let (engine, gateway) = engine_with_manual();
        gateway.queue_question("Describe the noise it makes.", &[]);

        engine
            .submit_prompt("It is noisy", ChatMode::Troubleshooting)
            .await
            .unwrap();

        assert!(last(&engine).options.is_none());
        assert_eq!(engine.state(), ConvState::Idle);
    }

    #[tokio::test]
    async fn test_new_prompt_after_resolution_keeps_history() {
        let (engine, gateway) = engine_with_manual();
        gateway.queue_solution("Replace the fuse.");
        gateway.queue_question("Which model?", &["A", "B"]);

        engine
            .submit_prompt("No heat", ChatMode::Troubleshooting)
            .await
            .unwrap();
        assert_eq!(engine.state(), ConvState::Resolved);

        engine
            .submit_prompt("Now it smells", ChatMode::Troubleshooting)
            .await
            .unwrap();

        let calls = gateway.recorded_calls();
        let GatewayCall::Step { history, .. } = &calls[1] else {
            panic!("expected a step call");
        };
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].text, "Replace the fuse.");
        assert_eq!(history[1].is_final_step, Some(true));
        assert!(matches!(engine.state(), ConvState::AwaitingChoice { .. }));
    }

    #[tokio::test]
    async fn test_gateway_failure_becomes_visible_reply() {
        let (engine, gateway) = engine_with_manual();
        gateway.queue_step(Err(GatewayError::EmptyResponse));
        gateway.queue_stream_error(
            &["partial "],
            GatewayError::Transport(LlmError::timeout("request timed out")),
        );

        engine
            .submit_prompt("No heat", ChatMode::Troubleshooting)
            .await
            .unwrap();
        let reply = last(&engine);
        assert_eq!(
            reply.text,
            "Sorry, an error occurred: the assistant returned an empty response"
        );
        assert!(reply.options.is_none());
        assert!(reply.is_final_step.is_none());
        assert_eq!(engine.state(), ConvState::Idle);

        engine.submit_prompt("Reset?", ChatMode::Qa).await.unwrap();
        let reply = last(&engine);
        assert_eq!(reply.text, "Sorry, an error occurred: request timed out");
        assert!(reply.images.is_none());
        assert!(!engine.is_busy());
    }

    #[tokio::test]
    async fn test_malformed_and_empty_responses_are_distinct() {
        let (engine, gateway) = engine_with_manual();
        let parse_error = serde_json::from_str::<TroubleshootingResponse>("not json").unwrap_err();
        gateway.queue_step(Err(GatewayError::MalformedResponse(parse_error)));
        gateway.queue_step(Err(GatewayError::EmptyResponse));

        engine.submit_prompt("a", ChatMode::Troubleshooting).await.unwrap();
        let malformed = last(&engine).text;
        engine.submit_prompt("b", ChatMode::Troubleshooting).await.unwrap();
        let empty = last(&engine).text;

        assert_ne!(malformed, empty);
        assert!(malformed.contains("unexpected format"));
    }

    #[tokio::test]
    async fn test_reset_discards_turn_in_flight() {
        let (engine, gateway) = engine_with_manual();
        gateway.queue_stream(&["late answer"]);
        let mut events = engine.subscribe();

        let turn = engine.begin_prompt("question", ChatMode::Qa).unwrap().unwrap();
        engine.reset();
        assert!(engine.messages().is_empty());
        assert!(engine.manual().is_none());

        engine.run_turn(turn).await;
        assert!(engine.messages().is_empty());
        assert_eq!(engine.state(), ConvState::Idle);

        let mut saw_reset = false;
        while let Ok(event) = events.try_recv() {
            match event {
                ChatEvent::Reset { messages } => {
                    assert!(messages.is_empty());
                    saw_reset = true;
                }
                ChatEvent::MessageUpdated { .. } => {
                    assert!(!saw_reset, "update emitted after reset");
                }
                _ => {}
            }
        }
        assert!(saw_reset);
    }

    #[tokio::test]
    async fn test_load_failure_clears_manual() {
        let (engine, gateway) = engine_with_manual();

        let error = crate::manual::DocumentError::UnsupportedFormat {
            file_name: "notes.pdf".into(),
        };
        engine.report_load_failure(&error).unwrap();

        let messages = engine.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].text.starts_with("Error: unsupported file format"));
        assert!(messages[0].text.ends_with(". Try another file."));
        assert!(engine.manual().is_none());

        engine.submit_prompt("hello", ChatMode::Qa).await.unwrap();
        assert_eq!(last(&engine).text, LOAD_MANUAL_PROMPT);
        assert!(gateway.recorded_calls().is_empty());
    }

    #[tokio::test]
    async fn test_mode_switch_keeps_history() {
        let (engine, gateway) = engine_with_manual();
        gateway.queue_stream(&["answer"]);
        engine.submit_prompt("q", ChatMode::Qa).await.unwrap();

        engine.set_mode(ChatMode::Troubleshooting);
        assert_eq!(engine.mode(), ChatMode::Troubleshooting);
        assert_eq!(engine.messages().len(), 3);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.mode, ChatMode::Troubleshooting);
        assert_eq!(
            snapshot.manual,
            Some(ManualSummary {
                file_name: "heater.docx".into(),
                image_count: 2
            })
        );
    }
}
