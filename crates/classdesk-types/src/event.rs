//! Durable events and the typed payload contracts that trigger workflows.
//!
//! Every event carries a correlation key: the domain identifier (submission,
//! import, session) used to group and supersede related runs. Payloads
//! serialize camelCase.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event names accepted by the bus.
pub mod names {
    pub const ANALYZE_SUBMISSION: &str = "grading/analyze-submission";
    pub const PROCESS_IMPORT: &str = "csv-import/process-batch";
    pub const SESSION_SCHEDULE_CHANGED: &str = "logistics/session.schedule-changed";
    pub const SESSION_CANCELLED: &str = "logistics/session.cancelled";
}

/// An event accepted for asynchronous processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// UUIDv7 event ID; redeliveries reuse it.
    pub id: Uuid,
    pub name: String,
    pub correlation_key: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        name: impl Into<String>,
        payload: serde_json::Value,
        correlation_key: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            correlation_key: correlation_key.into(),
            payload,
            received_at: Utc::now(),
        }
    }

    /// Build an event from a typed payload, deriving name and key.
    pub fn from_payload<P: EventPayload>(payload: &P) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            P::NAME,
            serde_json::to_value(payload)?,
            payload.correlation_key(),
        ))
    }

    /// Decode the payload into its typed contract.
    pub fn decode<P: EventPayload>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// A typed event contract.
pub trait EventPayload: Serialize + DeserializeOwned + Send + Sync {
    /// Event name this payload is published under.
    const NAME: &'static str;

    fn correlation_key(&self) -> String;
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// `grading/analyze-submission`, keyed by submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeSubmission {
    pub job_id: Uuid,
    pub submission_id: Uuid,
    pub center_id: Uuid,
}

impl EventPayload for AnalyzeSubmission {
    const NAME: &'static str = names::ANALYZE_SUBMISSION;

    fn correlation_key(&self) -> String {
        self.submission_id.to_string()
    }
}

/// `csv-import/process-batch`, keyed by import log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessImport {
    pub import_log_id: Uuid,
    pub selected_row_ids: Vec<Uuid>,
    pub center_id: Uuid,
    pub requesting_user_id: Uuid,
    #[serde(default)]
    pub is_retry: bool,
}

impl EventPayload for ProcessImport {
    const NAME: &'static str = names::PROCESS_IMPORT;

    fn correlation_key(&self) -> String {
        self.import_log_id.to_string()
    }
}

/// `logistics/session.schedule-changed`, keyed by session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionScheduleChanged {
    pub session_id: Uuid,
    pub center_id: Uuid,
    pub class_id: Uuid,
    pub previous_start: DateTime<Utc>,
    pub previous_end: DateTime<Utc>,
    pub new_start: DateTime<Utc>,
    pub new_end: DateTime<Utc>,
    #[serde(default)]
    pub previous_room: Option<String>,
    #[serde(default)]
    pub new_room: Option<String>,
}

impl EventPayload for SessionScheduleChanged {
    const NAME: &'static str = names::SESSION_SCHEDULE_CHANGED;

    fn correlation_key(&self) -> String {
        self.session_id.to_string()
    }
}

/// `logistics/session.cancelled`, keyed by session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCancelled {
    pub session_id: Uuid,
    pub center_id: Uuid,
    pub class_id: Uuid,
    pub original_start: DateTime<Utc>,
    pub original_end: DateTime<Utc>,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub is_bulk: bool,
    #[serde(default)]
    pub deleted_count: u32,
}

impl EventPayload for SessionCancelled {
    const NAME: &'static str = names::SESSION_CANCELLED;

    fn correlation_key(&self) -> String {
        self.session_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_payload_derives_name_and_key() {
        let payload = AnalyzeSubmission {
            job_id: Uuid::now_v7(),
            submission_id: Uuid::now_v7(),
            center_id: Uuid::now_v7(),
        };
        let event = Event::from_payload(&payload).unwrap();
        assert_eq!(event.name, "grading/analyze-submission");
        assert_eq!(event.correlation_key, payload.submission_id.to_string());
        assert_eq!(event.decode::<AnalyzeSubmission>().unwrap(), payload);
    }

    #[test]
    fn payloads_serialize_camel_case() {
        let payload = ProcessImport {
            import_log_id: Uuid::nil(),
            selected_row_ids: vec![],
            center_id: Uuid::nil(),
            requesting_user_id: Uuid::nil(),
            is_retry: true,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("importLogId").is_some());
        assert!(json.get("selectedRowIds").is_some());
        assert_eq!(json["isRetry"], true);
    }

    #[test]
    fn cancelled_payload_defaults_optional_fields() {
        let json = serde_json::json!({
            "sessionId": Uuid::nil(),
            "centerId": Uuid::nil(),
            "classId": Uuid::nil(),
            "originalStart": "2026-03-02T09:00:00Z",
            "originalEnd": "2026-03-02T10:00:00Z",
        });
        let payload: SessionCancelled = serde_json::from_value(json).unwrap();
        assert!(!payload.is_bulk);
        assert_eq!(payload.deleted_count, 0);
        assert!(payload.room.is_none());
    }

    #[test]
    fn decode_rejects_foreign_payload() {
        let event = Event::new(names::SESSION_CANCELLED, serde_json::json!({"x": 1}), "k");
        assert!(event.decode::<SessionCancelled>().is_err());
    }
}
