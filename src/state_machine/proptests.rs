//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::transition::*;
use super::*;
use crate::conversation::{ChatMode, MessageOption};
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_mode() -> impl Strategy<Value = ChatMode> {
    prop_oneof![Just(ChatMode::Qa), Just(ChatMode::Troubleshooting)]
}

fn arb_label() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z ]{0,15}"
}

fn arb_option() -> impl Strategy<Value = MessageOption> {
    arb_label().prop_map(MessageOption::from_label)
}

fn arb_state() -> impl Strategy<Value = ConvState> {
    prop_oneof![
        Just(ConvState::Idle),
        Just(ConvState::Answering),
        Just(ConvState::Diagnosing),
        Just(ConvState::Resolved),
        prop::collection::vec(arb_option(), 1..4)
            .prop_map(|options| ConvState::AwaitingChoice { options }),
    ]
}

fn arb_outcome() -> impl Strategy<Value = StepOutcome> {
    prop_oneof![
        (arb_label(), prop::collection::vec(arb_label(), 0..5))
            .prop_map(|(question, options)| StepOutcome::Question { question, options }),
        arb_label().prop_map(|solution| StepOutcome::Solution { solution }),
    ]
}

fn arb_user_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        ("[a-z ]{0,20}", arb_mode()).prop_map(|(text, mode)| Event::UserPrompt { text, mode }),
        arb_option().prop_map(|option| Event::OptionChosen { option }),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        arb_user_event(),
        "[a-z ]{0,20}".prop_map(|text| Event::AnswerComplete { text }),
        arb_outcome().prop_map(|outcome| Event::StepComplete { outcome }),
        "[a-z ]{1,20}".prop_map(|reason| Event::TurnFailed { reason }),
    ]
}

proptest! {
    /// No user input is admitted while a turn is in flight
    #[test]
    fn prop_busy_rejects_user_input(
        state in prop_oneof![Just(ConvState::Answering), Just(ConvState::Diagnosing)],
        mode in arb_mode(),
        event in arb_user_event(),
    ) {
        let result = transition(&state, &ConvContext::new(true, mode), event);
        prop_assert!(matches!(result, Err(TransitionError::Busy)));
    }

    /// Without a manual, user input yields exactly one system message and no gateway call
    #[test]
    fn prop_missing_manual_never_calls_gateway(
        state in arb_state(),
        mode in arb_mode(),
        event in arb_user_event(),
    ) {
        let result = transition(&state, &ConvContext::new(false, mode), event).unwrap();
        prop_assert_eq!(&result.new_state, &state);
        prop_assert_eq!(result.effects.len(), 1);
        let is_system = matches!(result.effects[0], Effect::AppendSystemMessage { .. });
        prop_assert!(is_system);
    }

    /// A final step never carries options
    #[test]
    fn prop_final_step_has_no_options(outcome in arb_outcome()) {
        let result = transition(
            &ConvState::Diagnosing,
            &ConvContext::new(true, ChatMode::Troubleshooting),
            Event::StepComplete { outcome },
        ).unwrap();

        for effect in &result.effects {
            if let Effect::FinalizeReply { options, is_final_step, .. } = effect {
                if *is_final_step == Some(true) {
                    prop_assert!(options.is_none());
                    prop_assert_eq!(&result.new_state, &ConvState::Resolved);
                }
                if let Some(options) = options {
                    prop_assert!(!options.is_empty());
                }
            }
        }
    }

    /// A question with k options yields k label/payload pairs and awaits them
    #[test]
    fn prop_question_options_preserved(
        question in arb_label(),
        labels in prop::collection::vec(arb_label(), 1..6),
    ) {
        let result = transition(
            &ConvState::Diagnosing,
            &ConvContext::new(true, ChatMode::Troubleshooting),
            Event::StepComplete {
                outcome: StepOutcome::Question { question, options: labels.clone() },
            },
        ).unwrap();

        let pending = result.new_state.pending_options().map(<[MessageOption]>::to_vec);
        let expected: Vec<MessageOption> = labels.iter().map(|l| MessageOption::from_label(l)).collect();
        prop_assert_eq!(pending.as_ref(), Some(&expected));
    }

    /// Options are only ever pending after a troubleshooting step
    #[test]
    fn prop_awaiting_choice_only_from_diagnosing(
        state in arb_state(),
        mode in arb_mode(),
        event in arb_event(),
    ) {
        let from_diagnosing = state == ConvState::Diagnosing;
        if let Ok(result) = transition(&state, &ConvContext::new(true, mode), event) {
            if result.new_state != state && result.new_state.pending_options().is_some() {
                prop_assert!(from_diagnosing);
            }
        }
    }

    /// Every admitted turn appends exactly one placeholder and one gateway call
    #[test]
    fn prop_admitted_turn_shape(
        state in arb_state(),
        mode in arb_mode(),
        event in arb_user_event(),
    ) {
        if let Ok(result) = transition(&state, &ConvContext::new(true, mode), event) {
            prop_assert!(result.new_state.is_busy());
            let placeholders = result.effects.iter().filter(|e| **e == Effect::AppendPlaceholder).count();
            let calls = result.effects.iter().filter(|e| e.is_gateway_call()).count();
            prop_assert_eq!(placeholders, 1);
            prop_assert_eq!(calls, 1);
        }
    }

    /// Completions and failures always leave the machine not busy
    #[test]
    fn prop_completion_releases_turn(
        state in prop_oneof![Just(ConvState::Answering), Just(ConvState::Diagnosing)],
        event in arb_event(),
    ) {
        let is_user = matches!(event, Event::UserPrompt { .. } | Event::OptionChosen { .. });
        if let Ok(result) = transition(&state, &ConvContext::new(true, ChatMode::Troubleshooting), event) {
            prop_assert!(!is_user);
            prop_assert!(!result.new_state.is_busy());
        }
    }
}
