//! Durable workflow engine.
//!
//! - [`step_store`]: memoized step outcomes keyed by (run id, step name)
//! - [`cancellation`]: last-writer-wins run tokens per correlation key
//! - [`context`]: the step gate handed to workflow bodies
//! - [`executor`]: run resolution and single-attempt execution
//! - [`retry`]: bounded retries and the one-shot failure handler
//! - [`batch`]: chunked processing with inter-chunk sleeps
//! - [`engine`]: bus subscription and the worker loop

pub mod batch;
pub mod cancellation;
pub mod context;
pub mod definition;
pub mod engine;
pub mod executor;
pub mod retry;
pub mod step_store;

pub use batch::{BatchItem, BatchProcessor, BatchProgress, BatchSummary};
pub use context::{StepContext, StepError};
pub use definition::{RunFailure, Workflow, WorkflowDyn};
pub use engine::WorkflowEngine;
