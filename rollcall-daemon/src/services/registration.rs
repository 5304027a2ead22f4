//! Member registration workflow.
//!
//! Each entry point handles one interaction for one (group, user) pair and
//! drives [`RegistrationState`] forward. Interactions in groups that never
//! enabled registration are ignored (`Ok(None)`).

use std::sync::Arc;

use rollcall_auth::{EmailHosts, EmailVerifier, Pin, VerifyError};
use rollcall_core::{
    ChannelId, Email, GroupId, GroupRegistrationConfig, MemberMetadata, MemberProfile,
    PendingSubmission, RegistrationError, RegistrationEvent, RegistrationState, UserId,
};

use super::rate_limit::PinAttemptLimiter;
use super::scheduler::{ConfirmationJob, ConfirmationScheduler};
use crate::interaction::{InteractionResponse, InteractionToken, Message, Modal};
use crate::platform::{notify_admins, Platform};
use crate::store::{Store, StoreError};

/// Shown for any PIN that does not verify the caller's submission.
pub const INCORRECT_PIN_MESSAGE: &str = "incorrect PIN code given, try again";

/// Shown when the verify button is pressed without a live submission.
pub const NOT_STARTED_MESSAGE: &str = "you haven't started registering yet";

/// Result of a workflow entry point. `None` means the interaction is ignored.
pub type Reply = Result<Option<InteractionResponse>, RegistrationError>;

/// Drives registrations.
#[derive(Clone)]
pub struct RegistrationService {
    store: Arc<dyn Store>,
    platform: Arc<dyn Platform>,
    email_hosts: EmailHosts,
    verifier: Option<Arc<dyn EmailVerifier>>,
    scheduler: Option<ConfirmationScheduler>,
    pin_limiter: PinAttemptLimiter,
}

impl RegistrationService {
    /// Create a service that registers members directly on form submission.
    pub fn new(store: Arc<dyn Store>, platform: Arc<dyn Platform>) -> Self {
        Self {
            store,
            platform,
            email_hosts: EmailHosts::default(),
            verifier: None,
            scheduler: None,
            pin_limiter: PinAttemptLimiter::default(),
        }
    }

    /// Restrict accepted email hosts. An empty list accepts any host.
    pub fn with_email_hosts(mut self, hosts: EmailHosts) -> Self {
        self.email_hosts = hosts;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn EmailVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Require PIN verification: form submissions are answered with a
    /// deferred acknowledgement and the PIN is mailed by `scheduler`.
    pub fn with_scheduler(mut self, scheduler: ConfirmationScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_pin_limiter(mut self, limiter: PinAttemptLimiter) -> Self {
        self.pin_limiter = limiter;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn scheduler(&self) -> Option<&ConfirmationScheduler> {
        self.scheduler.as_ref()
    }

    /// Admin channel of `group`, if any. Lookup failures read as `None`.
    pub async fn admin_channel(&self, group: GroupId) -> Option<ChannelId> {
        self.store
            .group_config(group)
            .await
            .ok()
            .and_then(|config| config.admin_channel_id)
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// The register button was pressed: show the form.
    pub async fn register_button(&self, group: GroupId, user: UserId) -> Reply {
        if self.load_config(group).await?.is_none() {
            return Ok(None);
        }
        self.ensure_unregistered(group, user).await?;

        let prefill = match self.store.restore_submission(group, user).await {
            Ok(submission) => Some(submission),
            Err(StoreError::NotFound) => None,
            Err(e) => {
                tracing::warn!(group = %group, user = %user, error = %e, "Cannot restore submission");
                None
            }
        };

        Ok(Some(
            Modal::registration(&self.email_hosts, prefill.as_ref()).into(),
        ))
    }

    /// The registration form was submitted.
    pub async fn submit_form(
        &self,
        token: &InteractionToken,
        group: GroupId,
        user: UserId,
        form: &PendingSubmission,
    ) -> Reply {
        let Some(config) = self.load_config(group).await? else {
            return Ok(None);
        };
        self.ensure_unregistered(group, user).await?;

        let submission = form.normalized();
        if let Err(e) = self.store.save_submission(group, user, &submission).await {
            tracing::warn!(group = %group, user = %user, error = %e, "Cannot save submission");
        }
        let state = RegistrationState::Unregistered.apply(RegistrationEvent::FormSubmitted)?;

        let metadata = submission.to_metadata()?;
        self.check_email(&metadata.email).await?;

        let Some(scheduler) = &self.scheduler else {
            return self.persist(&config, user, metadata, state).await;
        };

        let state = state.apply(RegistrationEvent::VerificationScheduled)?;
        scheduler
            .schedule(ConfirmationJob {
                token: token.clone(),
                group_id: group,
                user_id: user,
                admin_channel_id: config.admin_channel_id,
                submission,
            })
            .map_err(|e| RegistrationError::internal("cannot schedule confirmation email", e))?;

        tracing::debug!(group = %group, user = %user, ?state, "Awaiting email verification");
        Ok(Some(InteractionResponse::Deferred))
    }

    /// The verify button was pressed: show the PIN form.
    pub async fn verify_button(&self, group: GroupId, user: UserId) -> Reply {
        if self.load_config(group).await?.is_none() {
            return Ok(None);
        }
        self.ensure_unregistered(group, user).await?;

        match self.store.restore_submission(group, user).await {
            Ok(_) => Ok(Some(Modal::pin_entry().into())),
            Err(StoreError::NotFound) => {
                Err(RegistrationError::Validation(NOT_STARTED_MESSAGE.into()))
            }
            Err(e) => Err(RegistrationError::internal("cannot restore submission", e)),
        }
    }

    /// The PIN form was submitted.
    pub async fn submit_pin(&self, group: GroupId, user: UserId, input: &str) -> Reply {
        let Some(config) = self.load_config(group).await? else {
            return Ok(None);
        };
        if self.scheduler.is_none() {
            return Err(RegistrationError::internal(
                "PIN submitted",
                "email verification is not enabled",
            ));
        }
        self.ensure_unregistered(group, user).await?;

        self.pin_limiter
            .check(group, user)
            .map_err(|e| RegistrationError::Validation(e.to_string()))?;

        let pin = Pin::parse(input).map_err(|_| incorrect_pin())?;
        let submission = match self.store.validate_pin(group, user, pin).await {
            Ok(submission) => submission,
            Err(StoreError::NotFound) => {
                tracing::debug!(group = %group, user = %user, "Incorrect PIN");
                return Err(incorrect_pin());
            }
            Err(e) => {
                tracing::warn!(group = %group, user = %user, error = %e, "Cannot validate PIN");
                notify_admins(
                    Arc::clone(&self.platform),
                    group,
                    config.admin_channel_id,
                    format!("Cannot validate PIN of <@{user}>: {e}"),
                );
                return Err(incorrect_pin());
            }
        };

        let metadata = submission.to_metadata()?;
        self.persist(&config, user, metadata, RegistrationState::PendingVerification)
            .await
    }

    // ========================================================================
    // Steps
    // ========================================================================

    async fn load_config(
        &self,
        group: GroupId,
    ) -> Result<Option<GroupRegistrationConfig>, RegistrationError> {
        match self.store.group_config(group).await {
            Ok(config) => Ok(Some(config)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(RegistrationError::internal("cannot load group config", e)),
        }
    }

    async fn ensure_unregistered(&self, group: GroupId, user: UserId) -> Result<(), RegistrationError> {
        match self.store.member(group, user).await {
            Ok(_) => Err(RegistrationError::AlreadyExists),
            Err(StoreError::NotFound) => Ok(()),
            Err(e) => Err(RegistrationError::internal("cannot look up member", e)),
        }
    }

    async fn check_email(&self, email: &Email) -> Result<(), RegistrationError> {
        self.email_hosts
            .check(email)
            .map_err(|e| RegistrationError::Validation(e.to_string()))?;

        let Some(verifier) = &self.verifier else {
            return Ok(());
        };
        match verifier.verify(email).await {
            Ok(()) => Ok(()),
            Err(VerifyError::Rejected(reason)) => Err(RegistrationError::Validation(reason)),
            Err(e) => Err(RegistrationError::internal("cannot verify email", e)),
        }
    }

    /// Write the member record, then apply its side effects.
    async fn persist(
        &self,
        config: &GroupRegistrationConfig,
        user: UserId,
        metadata: MemberMetadata,
        state: RegistrationState,
    ) -> Reply {
        let group = config.group_id;
        let profile = MemberProfile::new(group, user, metadata);

        match self.store.register_member(&profile).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists) => {
                let state = state.apply(RegistrationEvent::DuplicateDetected)?;
                tracing::debug!(group = %group, user = %user, ?state, "Duplicate registration");
                return Err(RegistrationError::AlreadyExists);
            }
            Err(e) => return Err(RegistrationError::internal("cannot save member", e)),
        }
        let state = state.apply(RegistrationEvent::Persisted)?;

        self.platform
            .grant_role(group, user, config.role_id)
            .await
            .map_err(|e| RegistrationError::internal("cannot grant member role", e))?;

        let nickname = profile.metadata.nickname();
        if let Err(e) = self.platform.set_display_name(group, user, &nickname).await {
            tracing::warn!(group = %group, user = %user, error = %e, "Cannot set display name");
            notify_admins(
                Arc::clone(&self.platform),
                group,
                config.admin_channel_id,
                format!("Cannot set the nickname of <@{user}> to {nickname:?}: {e}"),
            );
        }

        match self.store.discard_submission(group, user).await {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => {
                tracing::warn!(group = %group, user = %user, error = %e, "Cannot discard submission")
            }
        }

        tracing::info!(
            group = %group,
            user = %user,
            email = %profile.metadata.email,
            ?state,
            "Member registered"
        );
        Ok(Some(Message::text(config.success_message()).into()))
    }
}

impl std::fmt::Debug for RegistrationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationService")
            .field("email_hosts", &self.email_hosts)
            .field("verifier", &self.verifier.is_some())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

fn incorrect_pin() -> RegistrationError {
    RegistrationError::Validation(INCORRECT_PIN_MESSAGE.into())
}
