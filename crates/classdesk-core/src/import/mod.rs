//! Bulk CSV member import: staging service and the batched import workflow.

pub mod service;
pub mod workflow;

pub use service::{ImportError, ImportService, is_valid_email};
pub use workflow::ProcessImportWorkflow;
