//! Troubleshooting dialogue state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions: the
//! conversation engine feeds events in and executes the returned effects.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::{Event, StepOutcome};
pub use state::{ConvContext, ConvState};
pub use transition::{transition, TransitionError};
