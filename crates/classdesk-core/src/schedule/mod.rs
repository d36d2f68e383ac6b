//! Session logistics notifications: debounced schedule-change notices and
//! cancellation notices.

pub mod message;
pub mod workflow;

pub use workflow::{ScheduleChangedWorkflow, SessionCancelledWorkflow};
