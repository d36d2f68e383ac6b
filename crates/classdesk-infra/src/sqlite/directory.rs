//! SQLite member and session directory.
//!
//! Members are unique per (center, email), compared case-insensitively.
//! Class recipients are the members linked to a class.

use classdesk_core::repository::directory::{MemberDirectory, SessionDirectory};
use classdesk_types::error::RepositoryError;
use classdesk_types::import::{Member, MemberRole, NewMember};
use classdesk_types::notification::Recipient;
use classdesk_types::schedule::SessionSnapshot;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_enum, parse_uuid, query_error};

/// SQLite-backed implementation of `MemberDirectory` and `SessionDirectory`.
pub struct SqliteDirectory {
    pool: DatabasePool,
}

impl SqliteDirectory {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a class session.
    pub async fn save_session(&self, session: &SessionSnapshot) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO class_sessions (id, center_id, class_id, class_name, start_time, end_time, room)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (id) DO UPDATE SET
                 class_name = excluded.class_name,
                 start_time = excluded.start_time,
                 end_time = excluded.end_time,
                 room = excluded.room"#,
        )
        .bind(session.session_id.to_string())
        .bind(session.center_id.to_string())
        .bind(session.class_id.to_string())
        .bind(&session.class_name)
        .bind(format_datetime(&session.start_time))
        .bind(format_datetime(&session.end_time))
        .bind(&session.room)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    pub async fn delete_session(&self, session_id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM class_sessions WHERE id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    /// Enroll a member in a class.
    pub async fn add_class_member(&self, class_id: &Uuid, user_id: &Uuid) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO class_members (class_id, user_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(class_id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }
}

fn member_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Member, RepositoryError> {
    let get = |column: &str| -> Result<String, RepositoryError> {
        row.try_get::<String, _>(column).map_err(query_error)
    };
    Ok(Member {
        user_id: parse_uuid(&get("user_id")?)?,
        center_id: parse_uuid(&get("center_id")?)?,
        name: get("name")?,
        email: get("email")?,
        role: parse_enum::<MemberRole>(&get("role")?)?,
    })
}

// ---------------------------------------------------------------------------
// MemberDirectory impl
// ---------------------------------------------------------------------------

impl MemberDirectory for SqliteDirectory {
    async fn find_member_by_email(
        &self,
        center_id: &Uuid,
        email: &str,
    ) -> Result<Option<Member>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, center_id, name, email, role FROM members WHERE center_id = ? AND email = ?",
        )
        .bind(center_id.to_string())
        .bind(email)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        row.as_ref().map(member_from_row).transpose()
    }

    async fn get_member(&self, user_id: &Uuid) -> Result<Option<Member>, RepositoryError> {
        let row = sqlx::query("SELECT user_id, center_id, name, email, role FROM members WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.as_ref().map(member_from_row).transpose()
    }

    async fn provision_member(
        &self,
        center_id: &Uuid,
        member: &NewMember,
    ) -> Result<Member, RepositoryError> {
        let email = member.email.trim().to_lowercase();

        // An existing member for (center, email) wins.
        sqlx::query(
            r#"INSERT INTO members (user_id, center_id, name, email, role)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT (center_id, email) DO NOTHING"#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(center_id.to_string())
        .bind(&member.name)
        .bind(&email)
        .bind(member.role.as_str())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        let row = sqlx::query(
            "SELECT user_id, center_id, name, email, role FROM members WHERE center_id = ? AND email = ?",
        )
        .bind(center_id.to_string())
        .bind(&email)
        .fetch_one(&self.pool.writer)
        .await
        .map_err(query_error)?;

        member_from_row(&row)
    }
}

// ---------------------------------------------------------------------------
// SessionDirectory impl
// ---------------------------------------------------------------------------

impl SessionDirectory for SqliteDirectory {
    async fn get_session(
        &self,
        session_id: &Uuid,
    ) -> Result<Option<SessionSnapshot>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, center_id, class_id, class_name, start_time, end_time, room FROM class_sessions WHERE id = ?",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let get = |column: &str| -> Result<String, RepositoryError> {
            row.try_get::<String, _>(column).map_err(query_error)
        };

        Ok(Some(SessionSnapshot {
            session_id: parse_uuid(&get("id")?)?,
            center_id: parse_uuid(&get("center_id")?)?,
            class_id: parse_uuid(&get("class_id")?)?,
            class_name: get("class_name")?,
            start_time: parse_datetime(&get("start_time")?)?,
            end_time: parse_datetime(&get("end_time")?)?,
            room: row.try_get("room").map_err(query_error)?,
        }))
    }

    async fn list_class_recipients(
        &self,
        class_id: &Uuid,
    ) -> Result<Vec<Recipient>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT m.user_id, m.name, m.email
               FROM class_members cm
               JOIN members m ON m.user_id = cm.user_id
               WHERE cm.class_id = ?
               ORDER BY m.email ASC"#,
        )
        .bind(class_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut recipients = Vec::with_capacity(rows.len());
        for row in &rows {
            let user_id: String = row.try_get("user_id").map_err(query_error)?;
            recipients.push(Recipient {
                user_id: parse_uuid(&user_id)?,
                name: row.try_get("name").map_err(query_error)?,
                email: row.try_get("email").map_err(query_error)?,
            });
        }
        Ok(recipients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    async fn test_directory() -> SqliteDirectory {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        SqliteDirectory::new(DatabasePool::new(&url).await.unwrap())
    }

    fn new_member(name: &str, email: &str) -> NewMember {
        NewMember {
            name: name.into(),
            email: email.into(),
            role: MemberRole::Student,
        }
    }

    #[tokio::test]
    async fn provisioning_is_idempotent_per_center_email() {
        let directory = test_directory().await;
        let center = Uuid::now_v7();

        let first = directory
            .provision_member(&center, &new_member("Ada", "Ada@Example.com"))
            .await
            .unwrap();
        let again = directory
            .provision_member(&center, &new_member("Ada L.", "ada@example.com"))
            .await
            .unwrap();

        assert_eq!(first.user_id, again.user_id);
        assert_eq!(first.email, "ada@example.com");
        assert_eq!(again.name, "Ada");

        let found = directory
            .find_member_by_email(&center, "ADA@example.com")
            .await
            .unwrap();
        assert_eq!(found.map(|m| m.user_id), Some(first.user_id));

        // Other centers are separate.
        let elsewhere = directory
            .provision_member(&Uuid::now_v7(), &new_member("Ada", "ada@example.com"))
            .await
            .unwrap();
        assert_ne!(elsewhere.user_id, first.user_id);
    }

    #[tokio::test]
    async fn sessions_and_recipients() {
        let directory = test_directory().await;
        let center = Uuid::now_v7();
        let class_id = Uuid::now_v7();

        let session = SessionSnapshot {
            session_id: Uuid::now_v7(),
            center_id: center,
            class_id,
            class_name: "Algebra I".into(),
            start_time: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2026, 3, 2, 10, 30, 0).unwrap(),
            room: Some("B12".into()),
        };
        directory.save_session(&session).await.unwrap();
        assert_eq!(
            directory.get_session(&session.session_id).await.unwrap(),
            Some(session.clone())
        );

        for (name, email) in [("Grace", "grace@example.com"), ("Ada", "ada@example.com")] {
            let member = directory
                .provision_member(&center, &new_member(name, email))
                .await
                .unwrap();
            directory.add_class_member(&class_id, &member.user_id).await.unwrap();
        }

        let recipients = directory.list_class_recipients(&class_id).await.unwrap();
        let emails: Vec<&str> = recipients.iter().map(|r| r.email.as_str()).collect();
        assert_eq!(emails, vec!["ada@example.com", "grace@example.com"]);

        assert!(directory.delete_session(&session.session_id).await.unwrap());
        assert!(directory.get_session(&session.session_id).await.unwrap().is_none());
    }
}
