//! Directory traits for the collaborators workflows read from: center
//! members and class sessions.

use classdesk_types::error::RepositoryError;
use classdesk_types::import::{Member, NewMember};
use classdesk_types::notification::Recipient;
use classdesk_types::schedule::SessionSnapshot;
use uuid::Uuid;

/// Center membership lookups and provisioning.
pub trait MemberDirectory: Send + Sync {
    /// Case-insensitive lookup of a member by email within a center.
    fn find_member_by_email(
        &self,
        center_id: &Uuid,
        email: &str,
    ) -> impl std::future::Future<Output = Result<Option<Member>, RepositoryError>> + Send;

    fn get_member(
        &self,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Member>, RepositoryError>> + Send;

    /// Create a member, or return the existing one for (center, email).
    fn provision_member(
        &self,
        center_id: &Uuid,
        member: &NewMember,
    ) -> impl std::future::Future<Output = Result<Member, RepositoryError>> + Send;
}

/// Class session lookups for notifications.
pub trait SessionDirectory: Send + Sync {
    fn get_session(
        &self,
        session_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<SessionSnapshot>, RepositoryError>> + Send;

    /// Students and teachers of a class.
    fn list_class_recipients(
        &self,
        class_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Recipient>, RepositoryError>> + Send;
}
