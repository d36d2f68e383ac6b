//! `classdesk runs`: inspect workflow runs and their memoized steps.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use classdesk_core::repository::workflow::WorkflowRepository;
use classdesk_types::workflow::{StepOutcome, StepRecord};

use super::output::{print_json, run_status_symbol, runs_table};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum RunsCommand {
    /// List recent runs, newest first.
    #[command(alias = "ls")]
    List {
        /// Only runs for this correlation key (submission, import or session ID).
        #[arg(long)]
        key: Option<String>,

        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show a run with its step log.
    Show { run_id: Uuid },
}

pub async fn handle_runs_command(cmd: RunsCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        RunsCommand::List { key, limit } => handle_list(state, key.as_deref(), limit, json).await,
        RunsCommand::Show { run_id } => handle_show(state, &run_id, json).await,
    }
}

async fn handle_list(state: &AppState, key: Option<&str>, limit: u32, json: bool) -> Result<()> {
    let repo = &state.workflow_repo;
    let runs = match key {
        Some(key) => repo.list_runs_by_key(key, limit).await?,
        None => repo.list_recent_runs(limit).await?,
    };

    if json {
        return print_json(&runs);
    }
    if runs.is_empty() {
        println!();
        println!("  No workflow runs yet.");
        println!();
        return Ok(());
    }
    println!("{}", runs_table(&runs));
    Ok(())
}

async fn handle_show(state: &AppState, run_id: &Uuid, json: bool) -> Result<()> {
    let run = state
        .engine
        .get_run(run_id)
        .await?
        .with_context(|| format!("run {run_id} not found"))?;
    let steps = state.workflow_repo.list_steps(run_id).await?;

    if json {
        return print_json(&serde_json::json!({ "run": run, "steps": steps }));
    }

    println!();
    println!(
        "  {} {} {}",
        run_status_symbol(run.status),
        style(&run.workflow_name).bold(),
        style(run.id).dim()
    );
    println!("  Event:   {} ({})", run.event_name, run.event_id);
    println!("  Key:     {}", run.correlation_key);
    println!("  Status:  {}", run.status);
    println!("  Attempt: {}", run.attempt);
    println!("  Started: {}", run.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(error) = &run.error {
        println!("  Error:   {}", style(error).red());
    }
    println!();

    if steps.is_empty() {
        println!("  No steps recorded.");
        println!();
        return Ok(());
    }
    println!("{}", steps_table(&steps));
    Ok(())
}

fn steps_table(steps: &[StepRecord]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Step").fg(Color::White),
        Cell::new("Outcome").fg(Color::White),
        Cell::new("Detail").fg(Color::White),
        Cell::new("Completed").fg(Color::White),
    ]);

    for step in steps {
        let (outcome, detail, color) = match &step.outcome {
            StepOutcome::Success { value } => ("ok", truncate(&value.to_string(), 60), Color::Green),
            StepOutcome::Failure { message, category } => (
                "failed",
                format!("[{}] {}", category.as_str(), truncate(message, 50)),
                Color::Red,
            ),
        };
        table.add_row(vec![
            Cell::new(&step.step_name),
            Cell::new(outcome).fg(color),
            Cell::new(detail),
            Cell::new(step.completed_at.format("%H:%M:%S%.3f")),
        ]);
    }
    table
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use classdesk_types::error::ErrorCategory;
    use classdesk_types::workflow::StepFailure;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 10), "héllo");
        assert_eq!(truncate("héllo wörld", 5), "héllo…");
    }

    #[test]
    fn steps_table_shows_failures_with_category() {
        let run_id = Uuid::now_v7();
        let steps = vec![
            StepRecord::success(run_id, "load-submission", serde_json::json!({"id": 1})),
            StepRecord::failure(
                run_id,
                "analyze",
                &StepFailure::categorized("upstream timed out", ErrorCategory::ApiTimeout),
            ),
        ];
        let rendered = steps_table(&steps).to_string();
        assert!(rendered.contains("load-submission"));
        assert!(rendered.contains("[api_timeout]"));
    }
}
