//! HTTP grading analyzer.
//!
//! [`HttpGradingAnalyzer`] implements
//! [`GradingAnalyzer`](classdesk_core::grading::analyzer::GradingAnalyzer)
//! against an Anthropic-compatible Messages API.

pub mod client;
pub mod types;

pub use client::HttpGradingAnalyzer;
