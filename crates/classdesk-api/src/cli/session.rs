//! `classdesk session`: maintain class sessions and emit the logistics
//! events that drive change and cancellation notices.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use console::style;
use uuid::Uuid;

use classdesk_core::repository::directory::SessionDirectory;
use classdesk_types::event::{SessionCancelled, SessionScheduleChanged};
use classdesk_types::schedule::SessionSnapshot;

use super::publish::report_event;
use super::output::print_json;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum SessionCommand {
    /// Create a session, or reschedule an existing one.
    ///
    /// Rescheduling publishes a schedule-changed event; recipients are
    /// notified once the debounce window passes without further changes.
    Save {
        /// Session ID (omit to create a new session).
        #[arg(long)]
        id: Option<Uuid>,

        #[arg(long)]
        center: Uuid,

        #[arg(long)]
        class: Uuid,

        #[arg(long)]
        class_name: String,

        /// RFC 3339 start time, e.g. 2026-03-02T13:00:00Z.
        #[arg(long)]
        start: DateTime<Utc>,

        #[arg(long)]
        end: DateTime<Utc>,

        #[arg(long)]
        room: Option<String>,

        #[arg(long)]
        wait: bool,
    },

    /// Cancel (delete) a session and notify its class.
    Cancel {
        session_id: Uuid,

        #[arg(long)]
        wait: bool,
    },

    /// Enroll a member in a class.
    Enroll {
        #[arg(long)]
        class: Uuid,

        #[arg(long)]
        user: Uuid,
    },
}

pub async fn handle_session_command(cmd: SessionCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        SessionCommand::Save {
            id,
            center,
            class,
            class_name,
            start,
            end,
            room,
            wait,
        } => {
            if end <= start {
                bail!("session must end after it starts");
            }
            let snapshot = SessionSnapshot {
                session_id: id.unwrap_or_else(Uuid::now_v7),
                center_id: center,
                class_id: class,
                class_name,
                start_time: start,
                end_time: end,
                room,
            };
            handle_save(state, snapshot, wait, json).await
        }
        SessionCommand::Cancel { session_id, wait } => {
            handle_cancel(state, &session_id, wait, json).await
        }
        SessionCommand::Enroll { class, user } => {
            state.directory.add_class_member(&class, &user).await?;
            if json {
                return print_json(&serde_json::json!({ "class_id": class, "user_id": user }));
            }
            println!("  {} Enrolled {user} in class {class}", style("*").green().bold());
            Ok(())
        }
    }
}

async fn handle_save(state: &AppState, snapshot: SessionSnapshot, wait: bool, json: bool) -> Result<()> {
    let previous = state.directory.get_session(&snapshot.session_id).await?;
    state.directory.save_session(&snapshot).await?;

    let Some(previous) = previous else {
        if json {
            return print_json(&snapshot);
        }
        println!(
            "  {} Created session {}",
            style("*").green().bold(),
            style(snapshot.session_id).cyan()
        );
        return Ok(());
    };

    if !previous.differs_from(snapshot.start_time, snapshot.end_time, snapshot.room.as_deref()) {
        if json {
            return print_json(&snapshot);
        }
        println!("  Session {} unchanged.", snapshot.session_id);
        return Ok(());
    }

    if wait {
        state.register_workflows()?;
    }
    let event = state
        .engine
        .publish_payload(&SessionScheduleChanged {
            session_id: snapshot.session_id,
            center_id: snapshot.center_id,
            class_id: snapshot.class_id,
            previous_start: previous.start_time,
            previous_end: previous.end_time,
            new_start: snapshot.start_time,
            new_end: snapshot.end_time,
            previous_room: previous.room,
            new_room: snapshot.room.clone(),
        })
        .await?;
    report_event(state, &event, wait, json).await
}

async fn handle_cancel(state: &AppState, session_id: &Uuid, wait: bool, json: bool) -> Result<()> {
    let session = state
        .directory
        .get_session(session_id)
        .await?
        .with_context(|| format!("session {session_id} not found"))?;

    if wait {
        state.register_workflows()?;
    }
    state.directory.delete_session(session_id).await?;
    let event = state
        .engine
        .publish_payload(&SessionCancelled {
            session_id: session.session_id,
            center_id: session.center_id,
            class_id: session.class_id,
            original_start: session.start_time,
            original_end: session.end_time,
            room: session.room,
            is_bulk: false,
            deleted_count: 1,
        })
        .await?;
    report_event(state, &event, wait, json).await
}
