//! Workflow engine, Classdesk workflows and repository trait definitions.
//!
//! This crate defines the "ports" (repository, analyzer and mailer traits)
//! that the infrastructure layer implements, plus the durable execution
//! engine that runs workflows on top of them. It depends only on
//! `classdesk-types` -- never on `classdesk-infra` or any database/IO crate.

pub mod event;
pub mod grading;
pub mod import;
pub mod notify;
pub mod repository;
pub mod schedule;
pub mod store;
pub mod workflow;
