//! Class session snapshots read by the notification workflows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current state of a scheduled class session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub center_id: Uuid,
    pub class_id: Uuid,
    pub class_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

impl SessionSnapshot {
    /// Whether the session still differs from the given earlier slot.
    pub fn differs_from(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        room: Option<&str>,
    ) -> bool {
        self.start_time != start || self.end_time != end || self.room.as_deref() != room
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            session_id: Uuid::nil(),
            center_id: Uuid::nil(),
            class_id: Uuid::nil(),
            class_name: "Algebra I".into(),
            start_time: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap(),
            room: Some("B12".into()),
        }
    }

    #[test]
    fn unchanged_slot_does_not_differ() {
        let s = snapshot();
        assert!(!s.differs_from(s.start_time, s.end_time, Some("B12")));
    }

    #[test]
    fn room_or_time_change_differs() {
        let s = snapshot();
        assert!(s.differs_from(s.start_time, s.end_time, Some("A01")));
        assert!(s.differs_from(s.start_time, s.end_time, None));
        let earlier = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        assert!(s.differs_from(earlier, s.end_time, Some("B12")));
    }
}
