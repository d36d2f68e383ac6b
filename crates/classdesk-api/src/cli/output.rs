//! Shared terminal output helpers.

use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde::Serialize;

use classdesk_types::workflow::{RunStatus, RunStatusView, WorkflowRun};

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn status_color(status: &str) -> Color {
    match status.to_ascii_lowercase().as_str() {
        "running" | "processing" | "analyzing" => Color::Yellow,
        "completed" => Color::Green,
        "partial" | "pending" => Color::Cyan,
        "failed" => Color::Red,
        _ => Color::Grey,
    }
}

/// Print a polling view (status, error, terminal flag).
pub fn print_status_view(title: &str, view: &RunStatusView) {
    println!();
    println!("  {} {}", style("*").cyan().bold(), style(title).bold());
    println!("  Status:   {}", style(&view.status).bold());
    if let Some(category) = view.error_category {
        println!("  Category: {}", style(category.as_str()).red());
    }
    if let Some(error) = &view.error {
        println!("  Error:    {}", style(error).red());
    }
    println!(
        "  Terminal: {}",
        if view.terminal { "yes" } else { "no (still in progress)" }
    );
    println!();
}

pub fn runs_table(runs: &[WorkflowRun]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Run ID").fg(Color::White),
        Cell::new("Workflow").fg(Color::White),
        Cell::new("Key").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Attempt").fg(Color::White),
        Cell::new("Updated").fg(Color::White),
    ]);

    for run in runs {
        let status = run.status.as_str();
        table.add_row(vec![
            Cell::new(run.id),
            Cell::new(&run.workflow_name),
            Cell::new(&run.correlation_key),
            Cell::new(status).fg(status_color(status)),
            Cell::new(run.attempt),
            Cell::new(run.updated_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    table
}

pub fn run_status_symbol(status: RunStatus) -> console::StyledObject<&'static str> {
    match status {
        RunStatus::Running => style("~").yellow(),
        RunStatus::Completed => style("✓").green(),
        RunStatus::Cancelled => style("-").dim(),
        RunStatus::Failed => style("✗").red(),
    }
}
