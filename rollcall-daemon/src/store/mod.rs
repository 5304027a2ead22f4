//! Storage abstraction for registration state.
//!
//! Durable data (group configs and member records) sits behind
//! [`GroupConfigStore`] and [`MemberStore`], implemented by [`MemoryStore`]
//! and [`SqliteStore`]. Ephemeral data (pending submissions and PINs) sits
//! behind [`SubmissionStore`] and [`PinStore`]. [`RegistrationStore`]
//! composes a durable backend with the ephemeral stores and implements all
//! four as a single [`Store`].

pub mod composite;
pub mod memory;
pub mod sqlite;

pub use composite::{EphemeralSettings, RegistrationStore};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use rollcall_auth::{Pin, PinError};
use rollcall_core::{
    ChannelId, GroupId, GroupRegistrationConfig, MemberProfile, PendingSubmission, UserId,
};
use tokio_util::sync::CancellationToken;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Missing or expired.
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    /// No unused PIN could be found in time.
    #[error("verification code space exhausted")]
    Exhausted,

    #[error("operation cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<PinError> for StoreError {
    fn from(err: PinError) -> Self {
        match err {
            PinError::InvalidFormat | PinError::NotFound => StoreError::NotFound,
            PinError::Exhausted => StoreError::Exhausted,
            PinError::Cancelled => StoreError::Cancelled,
        }
    }
}

/// Communities that opted in to registration.
#[async_trait]
pub trait GroupConfigStore: Send + Sync {
    /// Fails with [`StoreError::AlreadyExists`] if the group is configured.
    async fn init_group(&self, config: &GroupRegistrationConfig) -> Result<(), StoreError>;

    async fn group_config(&self, group: GroupId) -> Result<GroupRegistrationConfig, StoreError>;

    async fn set_admin_channel(
        &self,
        group: GroupId,
        channel: Option<ChannelId>,
    ) -> Result<(), StoreError>;

    /// Delete the config and every member record of the group.
    async fn delete_group(&self, group: GroupId) -> Result<(), StoreError>;
}

/// Registered members.
#[async_trait]
pub trait MemberStore: Send + Sync {
    async fn member(&self, group: GroupId, user: UserId) -> Result<MemberProfile, StoreError>;

    /// Fails with [`StoreError::AlreadyExists`] if the pair is registered.
    /// This is the authoritative at-most-once guard.
    async fn register_member(&self, profile: &MemberProfile) -> Result<(), StoreError>;

    async fn unregister_member(&self, group: GroupId, user: UserId) -> Result<(), StoreError>;
}

/// Durable backend: group configs plus members.
pub trait DurableStore: GroupConfigStore + MemberStore {}

impl<T: GroupConfigStore + MemberStore + ?Sized> DurableStore for T {}

/// In-progress form data, kept for a limited time.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn save_submission(
        &self,
        group: GroupId,
        user: UserId,
        submission: &PendingSubmission,
    ) -> Result<(), StoreError>;

    async fn restore_submission(
        &self,
        group: GroupId,
        user: UserId,
    ) -> Result<PendingSubmission, StoreError>;

    async fn discard_submission(&self, group: GroupId, user: UserId) -> Result<(), StoreError>;
}

/// Verification PINs bound to pending submissions.
#[async_trait]
pub trait PinStore: Send + Sync {
    async fn issue_pin(&self, group: GroupId, user: UserId) -> Result<Pin, StoreError>;

    /// Consume `pin` and return the submission it verifies. A PIN whose
    /// submission expired is reported as [`StoreError::NotFound`].
    async fn validate_pin(
        &self,
        group: GroupId,
        user: UserId,
        pin: Pin,
    ) -> Result<PendingSubmission, StoreError>;
}

/// Everything the registration workflow needs from storage.
pub trait Store: DurableStore + SubmissionStore + PinStore {
    /// A handle sharing all state whose cancellable operations stop when
    /// `cancel` fires.
    fn scoped(&self, cancel: CancellationToken) -> Arc<dyn Store>;
}
