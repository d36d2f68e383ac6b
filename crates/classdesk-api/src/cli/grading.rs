//! `classdesk grading`: submit work, request analysis, poll the job.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use console::style;
use uuid::Uuid;

use classdesk_types::grading::{Submission, SubmissionStatus};

use super::output::{print_json, print_status_view};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum GradingCommand {
    /// Store a submission from a file.
    Submit {
        /// File holding the submission text.
        file: PathBuf,

        #[arg(long)]
        center: Uuid,

        #[arg(long)]
        student: Uuid,

        /// Exercise title shown to the analyzer.
        #[arg(long)]
        title: String,
    },

    /// Request (or re-request) AI analysis of a submission.
    Trigger {
        submission_id: Uuid,

        #[arg(long)]
        center: Uuid,

        /// Run the analysis in this process and wait for it.
        #[arg(long)]
        wait: bool,
    },

    /// Show the grading job status of a submission.
    Status { submission_id: Uuid },

    /// Show the stored analysis of a submission.
    Show { submission_id: Uuid },
}

pub async fn handle_grading_command(cmd: GradingCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        GradingCommand::Submit {
            file,
            center,
            student,
            title,
        } => handle_submit(state, &file, center, student, title, json).await,
        GradingCommand::Trigger {
            submission_id,
            center,
            wait,
        } => handle_trigger(state, &submission_id, &center, wait, json).await,
        GradingCommand::Status { submission_id } => handle_status(state, &submission_id, json).await,
        GradingCommand::Show { submission_id } => handle_show(state, &submission_id, json).await,
    }
}

async fn handle_submit(
    state: &AppState,
    file: &Path,
    center_id: Uuid,
    student_id: Uuid,
    exercise_title: String,
    json: bool,
) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    let submission = Submission {
        id: Uuid::now_v7(),
        center_id,
        student_id,
        exercise_title,
        content,
        status: SubmissionStatus::Submitted,
    };
    state.grading_repo.save_submission(&submission).await?;

    if json {
        return print_json(&submission);
    }
    println!();
    println!(
        "  {} Stored submission {}",
        style("*").green().bold(),
        style(submission.id).cyan()
    );
    println!("  Exercise: {}", submission.exercise_title);
    println!();
    Ok(())
}

async fn handle_trigger(
    state: &AppState,
    submission_id: &Uuid,
    center_id: &Uuid,
    wait: bool,
    json: bool,
) -> Result<()> {
    if wait {
        state.register_workflows()?;
    }
    let job = state
        .grading_service
        .trigger_analysis(submission_id, center_id)
        .await?;

    if wait {
        state.engine.drain().await;
        return handle_status(state, submission_id, json).await;
    }

    if json {
        return print_json(&job);
    }
    println!();
    println!(
        "  {} Analysis requested for submission {}",
        style("*").green().bold(),
        style(submission_id).cyan()
    );
    println!("  Job: {} [{}]", job.id, job.status);
    println!(
        "  {}",
        style("Poll with `classdesk grading status`.").dim()
    );
    println!();
    Ok(())
}

async fn handle_status(state: &AppState, submission_id: &Uuid, json: bool) -> Result<()> {
    let view = state.grading_service.status(submission_id).await?;
    if json {
        return print_json(&view);
    }
    print_status_view(&format!("Grading job for {submission_id}"), &view);
    Ok(())
}

async fn handle_show(state: &AppState, submission_id: &Uuid, json: bool) -> Result<()> {
    let analysis = state
        .grading_service
        .analysis(submission_id)
        .await?
        .with_context(|| format!("no analysis stored for submission {submission_id}"))?;

    if json {
        return print_json(&analysis);
    }
    println!();
    println!("  Score: {}", style(format!("{:.0}/100", analysis.score)).bold());
    println!();
    println!("  {}", analysis.feedback);
    if !analysis.strengths.is_empty() {
        println!();
        println!("  {}", style("Strengths").green().bold());
        for item in &analysis.strengths {
            println!("    + {item}");
        }
    }
    if !analysis.improvements.is_empty() {
        println!();
        println!("  {}", style("To improve").yellow().bold());
        for item in &analysis.improvements {
            println!("    - {item}");
        }
    }
    println!();
    Ok(())
}
