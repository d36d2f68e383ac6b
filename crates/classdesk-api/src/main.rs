//! Classdesk CLI and workflow worker entry point.
//!
//! Binary name: `classdesk`
//!
//! Parses CLI arguments, initializes logging, database and services, then
//! dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use classdesk_observe::{LogFormat, TracingOptions, init_tracing, shutdown_tracing};
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The worker logs at info by default; one-shot commands stay quiet.
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 if matches!(cli.command, Commands::Worker) => "info",
        0 => "warn",
        1 => "info,classdesk=debug",
        _ => "trace",
    };

    init_tracing(&TracingOptions {
        filter: filter.to_string(),
        format: if cli.log_json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
        otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "classdesk", &mut std::io::stdout());
        return Ok(());
    }

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init().await?;
    let json = cli.json;

    match cli.command {
        Commands::Worker => cli::worker::run_worker(&state, cli.quiet || json).await?,

        Commands::Publish {
            name,
            payload,
            wait,
        } => cli::publish::handle_publish(&state, &name, &payload, wait, json).await?,

        Commands::Grading { action } => {
            cli::grading::handle_grading_command(action, &state, json).await?;
        }

        Commands::Import { action } => {
            cli::import::handle_import_command(action, &state, json).await?;
        }

        Commands::Session { action } => {
            cli::session::handle_session_command(action, &state, json).await?;
        }

        Commands::Runs { action } => {
            cli::runs::handle_runs_command(action, &state, json).await?;
        }

        Commands::Completions { .. } => {
            tracing::debug!("completions handled before state initialization");
        }
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
