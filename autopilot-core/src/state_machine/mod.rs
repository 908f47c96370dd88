//! Explicit state machine for the PR automation lifecycle.
//!
//! The design separates:
//! - **State**: Where the PR is (`CopilotState`) plus the counters guards read (`StateContext`)
//! - **Events**: What happened (`CopilotEvent`)
//! - **Transitions**: An ordered table of guarded rules (`TRANSITIONS`)
//! - **Hooks**: What the machine wants done (`TransitionHooks`, recorded as `Effect`)
//!
//! The machine is synchronous and performs no I/O. The manager executes the
//! recorded effects against real APIs.

pub mod effect;
pub mod event;
pub mod machine;
pub mod state;
pub mod transition;

pub use effect::*;
pub use event::*;
pub use machine::*;
pub use state::*;
pub use transition::*;
