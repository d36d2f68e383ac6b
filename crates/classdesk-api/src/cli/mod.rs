//! CLI command definitions for the `classdesk` binary.
//!
//! Uses clap derive macros. Commands are grouped by domain
//! (`classdesk grading trigger`, `classdesk import start`, ...).

pub mod grading;
pub mod import;
pub mod output;
pub mod publish;
pub mod runs;
pub mod session;
pub mod worker;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Durable background workflows for Classdesk.
#[derive(Parser)]
#[command(name = "classdesk", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "CLASSDESK_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the workflow worker until Ctrl+C or SIGTERM.
    Worker,

    /// Publish a raw event (validated against its payload contract).
    Publish {
        /// Event name, e.g. "grading/analyze-submission".
        name: String,

        /// JSON payload (camelCase fields).
        #[arg(long)]
        payload: String,

        /// Run the subscribed workflow in this process and wait for it.
        #[arg(long)]
        wait: bool,
    },

    /// AI grading of submissions.
    Grading {
        #[command(subcommand)]
        action: grading::GradingCommand,
    },

    /// Bulk CSV member import.
    Import {
        #[command(subcommand)]
        action: import::ImportCommand,
    },

    /// Class session changes and cancellations.
    Session {
        #[command(subcommand)]
        action: session::SessionCommand,
    },

    /// Inspect workflow runs.
    Runs {
        #[command(subcommand)]
        action: runs::RunsCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
