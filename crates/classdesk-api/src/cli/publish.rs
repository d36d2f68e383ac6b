//! `classdesk publish`: send an event by name.
//!
//! The payload is decoded into the event's typed contract first, so a
//! malformed payload is rejected here instead of failing inside a run.

use anyhow::{Context, Result, bail};
use console::style;

use classdesk_types::event::{
    AnalyzeSubmission, Event, EventPayload, ProcessImport, SessionCancelled,
    SessionScheduleChanged, names,
};

use super::output::print_json;
use crate::state::AppState;

async fn publish_typed<P: EventPayload>(
    state: &AppState,
    payload: serde_json::Value,
) -> Result<Event> {
    let typed: P = serde_json::from_value(payload)
        .with_context(|| format!("payload does not match the '{}' contract", P::NAME))?;
    Ok(state.engine.publish_payload(&typed).await?)
}

pub async fn publish_event(state: &AppState, name: &str, payload: serde_json::Value) -> Result<Event> {
    match name {
        names::ANALYZE_SUBMISSION => publish_typed::<AnalyzeSubmission>(state, payload).await,
        names::PROCESS_IMPORT => publish_typed::<ProcessImport>(state, payload).await,
        names::SESSION_SCHEDULE_CHANGED => {
            publish_typed::<SessionScheduleChanged>(state, payload).await
        }
        names::SESSION_CANCELLED => publish_typed::<SessionCancelled>(state, payload).await,
        other => bail!("unknown event '{other}'"),
    }
}

/// Print where a published event went and, with `wait`, the run it produced.
pub async fn report_event(state: &AppState, event: &Event, wait: bool, json: bool) -> Result<()> {
    if wait {
        state.engine.drain().await;
    }
    let run = state.engine.latest_run(&event.correlation_key).await?;

    if json {
        return print_json(&serde_json::json!({
            "event": event,
            "run": run,
        }));
    }

    println!();
    println!(
        "  {} Published {} ({})",
        style("*").green().bold(),
        style(&event.name).cyan(),
        event.id
    );
    println!("  Key: {}", event.correlation_key);
    match (&run, wait) {
        (Some(run), true) => {
            println!("  Run: {} [{}]", run.id, run.status);
            if let Some(error) = &run.error {
                println!("  Error: {}", style(error).red());
            }
        }
        _ => println!(
            "  {}",
            style("Queued; a running `classdesk worker` will pick it up.").dim()
        ),
    }
    println!();
    Ok(())
}

pub async fn handle_publish(
    state: &AppState,
    name: &str,
    payload: &str,
    wait: bool,
    json: bool,
) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("payload is not valid JSON")?;
    if wait {
        state.register_workflows()?;
    }
    let event = publish_event(state, name, payload).await?;
    report_event(state, &event, wait, json).await
}
