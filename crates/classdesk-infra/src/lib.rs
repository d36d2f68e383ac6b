//! Infrastructure layer for Classdesk.
//!
//! Contains implementations of the ports defined in `classdesk-core`:
//! SQLite storage for the workflow engine and the domain tables, the HTTP
//! grading analyzer, mail providers, CSV upload parsing, and the
//! `config.toml` loader.

pub mod config;
pub mod csv_upload;
pub mod grading;
pub mod mail;
pub mod sqlite;

