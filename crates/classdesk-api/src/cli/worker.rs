//! `classdesk worker`: the long-running workflow process.

use anyhow::Result;
use console::style;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

pub async fn run_worker(state: &AppState, quiet: bool) -> Result<()> {
    state.register_workflows()?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        crate::shutdown_signal().await;
        tracing::info!("shutdown signal received");
        trigger.cancel();
    });

    if !quiet {
        println!(
            "  {} Classdesk worker running (data: {})",
            style("⚡").bold(),
            style(state.data_dir.display()).cyan()
        );
        println!("  {}", style("Press Ctrl+C to stop").dim());
    }

    state.engine.run_worker(shutdown).await?;

    if !quiet {
        println!("\n  Worker stopped.");
    }
    Ok(())
}
