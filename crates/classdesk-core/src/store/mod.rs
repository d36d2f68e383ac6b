//! In-memory implementations of the repository traits.
//!
//! Used by the engine and workflow test suites and by embedders that want a
//! process-local engine without SQLite.

mod domain;
mod workflow;

pub use domain::InMemoryDomainStore;
pub use workflow::InMemoryWorkflowRepository;
