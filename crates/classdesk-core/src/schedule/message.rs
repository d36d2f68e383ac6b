//! Plain-text notification emails for schedule changes and cancellations.

use chrono::{DateTime, Utc};
use classdesk_types::event::SessionCancelled;
use classdesk_types::notification::{EmailMessage, Recipient};
use classdesk_types::schedule::SessionSnapshot;
use uuid::Uuid;

fn slot(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format!(
        "{} {} - {} UTC",
        start.format("%a %d %b %Y"),
        start.format("%H:%M"),
        end.format("%H:%M")
    )
}

fn room_line(room: Option<&str>) -> String {
    match room {
        Some(room) => format!("Room: {room}\n"),
        None => String::new(),
    }
}

/// Idempotency key of one recipient's email within one run.
pub fn idempotency_key(run_id: Uuid, recipient: &Recipient) -> String {
    format!("{run_id}:{}", recipient.email.to_lowercase())
}

/// Change notice built from the session's current state.
pub fn schedule_changed(
    run_id: Uuid,
    recipient: &Recipient,
    session: &SessionSnapshot,
    previous_start: DateTime<Utc>,
    previous_end: DateTime<Utc>,
) -> EmailMessage {
    let body = format!(
        "Hi {},\n\nThe schedule of {} has changed.\n\nPreviously: {}\nNow: {}\n{}",
        recipient.name,
        session.class_name,
        slot(previous_start, previous_end),
        slot(session.start_time, session.end_time),
        room_line(session.room.as_deref()),
    );
    EmailMessage::new(
        &recipient.email,
        format!("Schedule change: {}", session.class_name),
        body,
        idempotency_key(run_id, recipient),
    )
}

pub fn session_cancelled(run_id: Uuid, recipient: &Recipient, event: &SessionCancelled) -> EmailMessage {
    let (subject, what) = if event.is_bulk {
        (
            "Sessions cancelled".to_string(),
            format!(
                "{} upcoming sessions of your class have been cancelled, starting with {}.",
                event.deleted_count,
                slot(event.original_start, event.original_end)
            ),
        )
    } else {
        (
            "Session cancelled".to_string(),
            format!(
                "The session on {} has been cancelled.",
                slot(event.original_start, event.original_end)
            ),
        )
    };
    let body = format!(
        "Hi {},\n\n{what}\n{}",
        recipient.name,
        room_line(event.room.as_deref())
    );
    EmailMessage::new(&recipient.email, subject, body, idempotency_key(run_id, recipient))
}
