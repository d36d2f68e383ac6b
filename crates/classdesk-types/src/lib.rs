//! Shared domain types for Classdesk.
//!
//! This crate contains the types used across the background-workflow engine:
//! workflow runs and step records, durable events and their payloads, the
//! grading / CSV import / scheduling entities driven by workflows, the error
//! taxonomy, and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod grading;
pub mod import;
pub mod notification;
pub mod schedule;
pub mod workflow;
