//! Workflow definition trait and its object-safe companion.
//!
//! Follows the same blanket-impl pattern used for other dynamic dispatch seams:
//! 1. `Workflow` is the ergonomic trait implemented by workflow types
//! 2. `WorkflowDyn` is object-safe with boxed futures
//! 3. A blanket impl makes every `Workflow` usable as `dyn WorkflowDyn<R>`

use std::future::Future;
use std::pin::Pin;

use classdesk_types::error::ErrorCategory;
use classdesk_types::event::Event;
use classdesk_types::workflow::{CancellationPolicy, StepFailure, WorkflowRun};
use serde_json::Value;

use super::context::{StepContext, StepError};
use crate::repository::workflow::WorkflowRepository;

/// Everything a failure handler needs once a run exhausted its attempts.
#[derive(Debug, Clone)]
pub struct RunFailure {
    pub run: WorkflowRun,
    pub event: Event,
    /// Message of the last error.
    pub message: String,
    pub category: ErrorCategory,
    /// Attempts consumed, including the last one.
    pub attempts: u32,
}

/// A durable workflow triggered by one event name.
///
/// The body sequences named steps through the [`StepContext`]. It may be
/// re-entered any number of times for the same run; committed steps are
/// skipped on re-entry.
pub trait Workflow: Send + Sync + 'static {
    /// Registered workflow name, stored on every run.
    fn name(&self) -> &'static str;

    /// Event name this workflow subscribes to.
    fn trigger(&self) -> &'static str;

    fn cancellation(&self) -> CancellationPolicy {
        CancellationPolicy::None
    }

    fn run<R: WorkflowRepository + 'static>(
        &self,
        ctx: &StepContext<R>,
        event: &Event,
    ) -> impl Future<Output = Result<Value, StepError>> + Send;

    /// Invoked once after the last attempt failed.
    ///
    /// Must be idempotent: a crash after the handler ran but before its
    /// completion was recorded invokes it again.
    fn on_failure(
        &self,
        _failure: &RunFailure,
    ) -> impl Future<Output = Result<(), StepFailure>> + Send {
        async { Ok(()) }
    }
}

/// Object-safe version of [`Workflow`] with boxed futures.
pub trait WorkflowDyn<R: WorkflowRepository + 'static>: Send + Sync {
    fn name(&self) -> &'static str;

    fn trigger(&self) -> &'static str;

    fn cancellation(&self) -> CancellationPolicy;

    fn run_boxed<'a>(
        &'a self,
        ctx: &'a StepContext<R>,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>>;

    fn on_failure_boxed<'a>(
        &'a self,
        failure: &'a RunFailure,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepFailure>> + Send + 'a>>;
}

/// Blanket implementation: any `Workflow` automatically implements `WorkflowDyn`.
impl<R: WorkflowRepository + 'static, W: Workflow> WorkflowDyn<R> for W {
    fn name(&self) -> &'static str {
        Workflow::name(self)
    }

    fn trigger(&self) -> &'static str {
        Workflow::trigger(self)
    }

    fn cancellation(&self) -> CancellationPolicy {
        Workflow::cancellation(self)
    }

    fn run_boxed<'a>(
        &'a self,
        ctx: &'a StepContext<R>,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>> {
        Box::pin(Workflow::run(self, ctx, event))
    }

    fn on_failure_boxed<'a>(
        &'a self,
        failure: &'a RunFailure,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepFailure>> + Send + 'a>> {
        Box::pin(Workflow::on_failure(self, failure))
    }
}
