//! Facade composing a durable backend with the ephemeral stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rollcall_auth::pin::DEFAULT_ISSUE_TIMEOUT;
use rollcall_auth::{EphemeralStore, Janitor, Pin, PinRegistry};
use rollcall_core::{
    ChannelId, GroupId, GroupRegistrationConfig, MemberProfile, PendingSubmission, UserId,
};
use tokio_util::sync::CancellationToken;

use super::{
    DurableStore, GroupConfigStore, MemberStore, PinStore, Store, StoreError, SubmissionStore,
};

/// How long pending submissions and PINs live.
pub const DEFAULT_SUBMISSION_TTL: Duration = Duration::from_secs(60 * 60);

/// Lifetimes of ephemeral registration data.
#[derive(Debug, Clone, Copy)]
pub struct EphemeralSettings {
    /// Lifetime of pending submissions and PINs.
    pub submission_ttl: Duration,
    /// Time budget for finding an unused PIN.
    pub pin_issue_timeout: Duration,
}

impl Default for EphemeralSettings {
    fn default() -> Self {
        Self {
            submission_ttl: DEFAULT_SUBMISSION_TTL,
            pin_issue_timeout: DEFAULT_ISSUE_TIMEOUT,
        }
    }
}

type Submissions = EphemeralStore<(GroupId, UserId), PendingSubmission>;

/// The [`Store`] used by the daemon.
///
/// Clones share state. Ephemeral data lives only in this process.
#[derive(Clone)]
pub struct RegistrationStore {
    durable: Arc<dyn DurableStore>,
    submissions: Arc<Submissions>,
    pins: PinRegistry,
}

impl RegistrationStore {
    pub fn new(durable: Arc<dyn DurableStore>, janitor: &Janitor, settings: EphemeralSettings) -> Self {
        Self {
            durable,
            submissions: EphemeralStore::with_janitor(settings.submission_ttl, janitor),
            pins: PinRegistry::new(janitor.clone(), settings.submission_ttl)
                .with_issue_timeout(settings.pin_issue_timeout),
        }
    }

    /// Release ephemeral state and stop background sweeping of it.
    pub async fn close(&self) {
        self.pins.close().await;
        self.submissions.close().await;
    }
}

impl std::fmt::Debug for RegistrationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationStore")
            .field("submissions", &self.submissions)
            .field("pins", &self.pins)
            .finish()
    }
}

#[async_trait]
impl GroupConfigStore for RegistrationStore {
    async fn init_group(&self, config: &GroupRegistrationConfig) -> Result<(), StoreError> {
        self.durable.init_group(config).await
    }

    async fn group_config(&self, group: GroupId) -> Result<GroupRegistrationConfig, StoreError> {
        self.durable.group_config(group).await
    }

    async fn set_admin_channel(
        &self,
        group: GroupId,
        channel: Option<ChannelId>,
    ) -> Result<(), StoreError> {
        self.durable.set_admin_channel(group, channel).await
    }

    async fn delete_group(&self, group: GroupId) -> Result<(), StoreError> {
        self.durable.delete_group(group).await
    }
}

#[async_trait]
impl MemberStore for RegistrationStore {
    async fn member(&self, group: GroupId, user: UserId) -> Result<MemberProfile, StoreError> {
        self.durable.member(group, user).await
    }

    async fn register_member(&self, profile: &MemberProfile) -> Result<(), StoreError> {
        self.durable.register_member(profile).await
    }

    async fn unregister_member(&self, group: GroupId, user: UserId) -> Result<(), StoreError> {
        self.durable.unregister_member(group, user).await
    }
}

#[async_trait]
impl SubmissionStore for RegistrationStore {
    async fn save_submission(
        &self,
        group: GroupId,
        user: UserId,
        submission: &PendingSubmission,
    ) -> Result<(), StoreError> {
        self.submissions.set((group, user), submission.clone());
        Ok(())
    }

    async fn restore_submission(
        &self,
        group: GroupId,
        user: UserId,
    ) -> Result<PendingSubmission, StoreError> {
        self.submissions
            .get(&(group, user))
            .ok_or(StoreError::NotFound)
    }

    async fn discard_submission(&self, group: GroupId, user: UserId) -> Result<(), StoreError> {
        self.submissions.remove(&(group, user));
        Ok(())
    }
}

#[async_trait]
impl PinStore for RegistrationStore {
    async fn issue_pin(&self, group: GroupId, user: UserId) -> Result<Pin, StoreError> {
        Ok(self.pins.issue(group, user).await?)
    }

    async fn validate_pin(
        &self,
        group: GroupId,
        user: UserId,
        pin: Pin,
    ) -> Result<PendingSubmission, StoreError> {
        self.pins.validate(group, user, pin)?;
        self.restore_submission(group, user).await
    }
}

impl Store for RegistrationStore {
    fn scoped(&self, cancel: CancellationToken) -> Arc<dyn Store> {
        Arc::new(Self {
            pins: self.pins.with_cancellation(cancel),
            ..self.clone()
        })
    }
}
