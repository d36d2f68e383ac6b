//! AI grading: analyzer port, the analysis workflow and its service.

pub mod analyzer;
pub mod service;
pub mod workflow;

pub use analyzer::{AnalyzerError, GradingAnalyzer, parse_analysis};
pub use service::{GradingError, GradingService};
pub use workflow::AnalyzeSubmissionWorkflow;
