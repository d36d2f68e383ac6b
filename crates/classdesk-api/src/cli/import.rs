//! `classdesk import`: stage a member CSV, start or retry provisioning,
//! inspect progress and per-row outcomes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use classdesk_infra::csv_upload::parse_csv;
use classdesk_types::import::{CsvImportLog, CsvImportRowLog, RowStatus};

use super::output::{print_json, print_status_view};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ImportCommand {
    /// Validate a CSV file (name,email,role) and stage it as a pending import.
    Stage {
        file: PathBuf,

        #[arg(long)]
        center: Uuid,

        /// User requesting the import.
        #[arg(long)]
        user: Uuid,
    },

    /// Start provisioning the VALID rows of a staged import.
    Start {
        import_id: Uuid,

        #[arg(long)]
        user: Uuid,

        /// Only these row IDs (default: every VALID row).
        #[arg(long, value_delimiter = ',')]
        rows: Vec<Uuid>,

        /// Run the import in this process and wait for it.
        #[arg(long)]
        wait: bool,
    },

    /// Re-run the FAILED rows of a finished import.
    Retry {
        import_id: Uuid,

        #[arg(long)]
        user: Uuid,

        #[arg(long)]
        wait: bool,
    },

    /// Show import status and counters.
    Status { import_id: Uuid },

    /// List per-row outcomes.
    Rows {
        import_id: Uuid,

        /// Only rows with this status (e.g. FAILED).
        #[arg(long)]
        status: Option<String>,
    },
}

pub async fn handle_import_command(cmd: ImportCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        ImportCommand::Stage { file, center, user } => {
            handle_stage(state, &file, &center, &user, json).await
        }
        ImportCommand::Start {
            import_id,
            user,
            rows,
            wait,
        } => {
            if wait {
                state.register_workflows()?;
            }
            let selection = (!rows.is_empty()).then_some(rows);
            let event = state.import_service.start(&import_id, selection, &user).await?;
            finish(state, &import_id, &event.id, wait, json).await
        }
        ImportCommand::Retry {
            import_id,
            user,
            wait,
        } => {
            if wait {
                state.register_workflows()?;
            }
            let event = state.import_service.retry_failed(&import_id, &user).await?;
            finish(state, &import_id, &event.id, wait, json).await
        }
        ImportCommand::Status { import_id } => handle_status(state, &import_id, json).await,
        ImportCommand::Rows { import_id, status } => {
            handle_rows(state, &import_id, status.as_deref(), json).await
        }
    }
}

async fn handle_stage(
    state: &AppState,
    file: &Path,
    center_id: &Uuid,
    user_id: &Uuid,
    json: bool,
) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let rows = parse_csv(bytes.as_slice())
        .with_context(|| format!("failed to parse {}", file.display()))?;

    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.display().to_string());

    let log = state
        .import_service
        .stage(center_id, user_id, &file_name, rows)
        .await?;

    if json {
        return print_json(&log);
    }

    println!();
    println!(
        "  {} Staged import {} from '{}'",
        style("*").green().bold(),
        style(log.id).cyan(),
        log.file_name
    );
    println!("  Rows: {} total, {} valid", log.total_rows, log.valid_rows);
    println!(
        "  {}",
        style("Review with `classdesk import rows`, then `classdesk import start`.").dim()
    );
    println!();
    Ok(())
}

async fn finish(
    state: &AppState,
    import_id: &Uuid,
    event_id: &Uuid,
    wait: bool,
    json: bool,
) -> Result<()> {
    if wait {
        state.engine.drain().await;
        return handle_status(state, import_id, json).await;
    }

    if json {
        return print_json(&serde_json::json!({
            "import_id": import_id,
            "event_id": event_id,
            "queued": true,
        }));
    }
    println!();
    println!(
        "  {} Import {} queued",
        style("*").green().bold(),
        style(import_id).cyan()
    );
    println!("  {}", style("Poll with `classdesk import status`.").dim());
    println!();
    Ok(())
}

async fn handle_status(state: &AppState, import_id: &Uuid, json: bool) -> Result<()> {
    let log = state.import_service.log(import_id).await?;
    if json {
        return print_json(&serde_json::json!({
            "import": log,
            "status": log.status_view(),
        }));
    }
    print_status_view(&format!("Import {}", log.id), &log.status_view());
    print_counters(&log);
    Ok(())
}

fn print_counters(log: &CsvImportLog) {
    println!(
        "  Rows: {} total, {} valid, {} imported, {} failed",
        log.total_rows, log.valid_rows, log.imported_count, log.failed_count
    );
    println!();
}

async fn handle_rows(
    state: &AppState,
    import_id: &Uuid,
    status: Option<&str>,
    json: bool,
) -> Result<()> {
    let filter: Option<RowStatus> = status
        .map(|s| s.to_ascii_uppercase().parse::<RowStatus>())
        .transpose()
        .map_err(anyhow::Error::msg)?;

    let rows: Vec<CsvImportRowLog> = state
        .import_service
        .rows(import_id)
        .await?
        .into_iter()
        .filter(|r| filter.is_none_or(|f| r.status == f))
        .collect();

    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("  No rows.");
        return Ok(());
    }

    println!("{}", rows_table(&rows));
    Ok(())
}

fn rows_table(rows: &[CsvImportRowLog]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("#").fg(Color::White),
        Cell::new("Name").fg(Color::White),
        Cell::new("Email").fg(Color::White),
        Cell::new("Role").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Error").fg(Color::White),
        Cell::new("Row ID").fg(Color::White),
    ]);

    for row in rows {
        let color = match row.status {
            RowStatus::Valid | RowStatus::Imported => Color::Green,
            RowStatus::Failed | RowStatus::Error => Color::Red,
            RowStatus::DuplicateInCsv | RowStatus::DuplicateInCenter => Color::Yellow,
        };
        table.add_row(vec![
            Cell::new(row.row_number),
            Cell::new(&row.name),
            Cell::new(&row.email),
            Cell::new(&row.role),
            Cell::new(row.status).fg(color),
            Cell::new(row.error.as_deref().unwrap_or("")),
            Cell::new(row.id),
        ]);
    }
    table
}
