//! Confirmation email scheduler.
//!
//! Sending mail is too slow for the platform's response deadline, so form
//! submissions that need verification are answered with a deferred
//! acknowledgement and the send runs here. Every job delivers exactly one
//! follow-up: the PIN prompt on success, an error otherwise. Jobs cancelled
//! by shutdown still answer with the internal error.

use std::sync::Arc;
use std::time::Duration;

use rollcall_core::{ChannelId, Email, GroupId, PendingSubmission, RegistrationError, UserId};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::interaction::{InteractionToken, Message};
use crate::mail::{Confirmation, ConfirmationMailer, MailError};
use crate::platform::{notify_admins, Messenger, PlatformError};
use crate::store::{Store, StoreError};

/// Default budget for issuing the PIN and sending the email.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);
/// Default pause between follow-up attempts.
pub const DEFAULT_FOLLOW_UP_INTERVAL: Duration = Duration::from_millis(250);
/// Default total budget for delivering a follow-up.
pub const DEFAULT_FOLLOW_UP_BUDGET: Duration = Duration::from_secs(3);
/// Upper bound on the follow-up budget of jobs cancelled by shutdown.
pub const SHUTDOWN_FOLLOW_UP_BUDGET: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub send_timeout: Duration,
    pub follow_up_interval: Duration,
    pub follow_up_budget: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            send_timeout: DEFAULT_SEND_TIMEOUT,
            follow_up_interval: DEFAULT_FOLLOW_UP_INTERVAL,
            follow_up_budget: DEFAULT_FOLLOW_UP_BUDGET,
        }
    }
}

/// A submission awaiting its confirmation email.
#[derive(Debug, Clone)]
pub struct ConfirmationJob {
    pub token: InteractionToken,
    pub group_id: GroupId,
    pub user_id: UserId,
    pub admin_channel_id: Option<ChannelId>,
    pub submission: PendingSubmission,
}

#[derive(Debug, thiserror::Error)]
enum SendError {
    #[error("cannot issue PIN: {0}")]
    Pin(#[from] StoreError),

    #[error("cannot send confirmation email: {0}")]
    Mail(#[from] MailError),

    #[error("confirmation email timed out after {0:?}")]
    Timeout(Duration),

    #[error("confirmation email cancelled by shutdown")]
    Cancelled,
}

/// Error returned by [`ConfirmationScheduler::schedule`] after shutdown began.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("confirmation scheduler is closed")]
pub struct SchedulerClosed;

struct Inner {
    store: Arc<dyn Store>,
    mailer: Arc<dyn ConfirmationMailer>,
    messenger: Arc<dyn Messenger>,
    settings: SchedulerSettings,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// Runs confirmation sends in the background. Cheap to clone.
#[derive(Clone)]
pub struct ConfirmationScheduler {
    inner: Arc<Inner>,
}

impl ConfirmationScheduler {
    /// Create a scheduler. PIN issuance runs on a store handle bound to the
    /// scheduler's own cancellation scope.
    pub fn new(
        store: Arc<dyn Store>,
        mailer: Arc<dyn ConfirmationMailer>,
        messenger: Arc<dyn Messenger>,
        settings: SchedulerSettings,
    ) -> Self {
        let cancel = CancellationToken::new();
        Self {
            inner: Arc::new(Inner {
                store: store.scoped(cancel.clone()),
                mailer,
                messenger,
                settings,
                cancel,
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Start the send for `job` and return immediately.
    pub fn schedule(&self, job: ConfirmationJob) -> Result<(), SchedulerClosed> {
        if self.inner.tracker.is_closed() {
            return Err(SchedulerClosed);
        }
        tracing::debug!(group = %job.group_id, user = %job.user_id, "Scheduling confirmation email");

        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move { run_job(inner, job).await });
        Ok(())
    }

    /// Number of jobs still running.
    pub fn pending(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Refuse new jobs and wait up to `grace` for outstanding sends to
    /// finish. Sends still running after that are cancelled; their users get
    /// the internal-error follow-up.
    ///
    /// Returns how many jobs were cancelled.
    pub async fn close(&self, grace: Duration) -> usize {
        self.inner.tracker.close();

        if tokio::time::timeout(grace, self.inner.tracker.wait()).await.is_ok() {
            tracing::debug!("Confirmation scheduler drained");
            return 0;
        }

        let abandoned = self.inner.tracker.len();
        tracing::warn!(abandoned, "Confirmation jobs still running after shutdown grace, cancelling");
        self.inner.cancel.cancel();

        let follow_up_deadline = SHUTDOWN_FOLLOW_UP_BUDGET + self.inner.settings.follow_up_interval;
        if tokio::time::timeout(follow_up_deadline, self.inner.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.inner.tracker.len(),
                "Cancelled confirmation jobs did not finish their follow-ups"
            );
        }
        abandoned
    }
}

impl std::fmt::Debug for ConfirmationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationScheduler")
            .field("pending", &self.pending())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

async fn run_job(inner: Arc<Inner>, job: ConfirmationJob) {
    let group = job.group_id;
    let user = job.user_id;
    let timeout = inner.settings.send_timeout;

    let outcome = tokio::select! {
        _ = inner.cancel.cancelled() => Err(SendError::Cancelled),
        result = tokio::time::timeout(timeout, send(&inner, &job)) => {
            result.unwrap_or(Err(SendError::Timeout(timeout)))
        }
    };

    let mut budget = inner.settings.follow_up_budget;
    let message = match outcome {
        Ok(()) => {
            tracing::info!(group = %group, user = %user, "Confirmation email sent");
            Message::verify_prompt()
        }
        Err(SendError::Cancelled | SendError::Pin(StoreError::Cancelled)) => {
            tracing::warn!(group = %group, user = %user, "Confirmation email cancelled by shutdown");
            budget = budget.min(SHUTDOWN_FOLLOW_UP_BUDGET);
            Message::internal_error()
        }
        Err(SendError::Pin(StoreError::Exhausted)) => {
            tracing::warn!(group = %group, user = %user, "No free PIN available");
            Message::error(RegistrationError::Allocation)
        }
        Err(e) => {
            tracing::error!(group = %group, user = %user, error = %e, "Confirmation email failed");
            notify_admins(
                Arc::clone(&inner.messenger),
                group,
                job.admin_channel_id,
                format!("Cannot send confirmation email to <@{user}>: {e}"),
            );
            Message::internal_error()
        }
    };

    if let Err(e) = follow_up_with_retry(
        inner.messenger.as_ref(),
        &job.token,
        &message,
        inner.settings.follow_up_interval,
        budget,
    )
    .await
    {
        tracing::error!(group = %group, user = %user, error = %e, "Cannot deliver follow-up");
    }
}

async fn send(inner: &Inner, job: &ConfirmationJob) -> Result<(), SendError> {
    let pin = inner.store.issue_pin(job.group_id, job.user_id).await?;

    let confirmation = Confirmation {
        group_id: job.group_id,
        user_id: job.user_id,
        email: Email::new(job.submission.email.trim()),
        name: format!("{} {}", job.submission.first_name, job.submission.last_name)
            .trim()
            .to_string(),
        pin,
    };
    inner.mailer.send_confirmation(&confirmation).await?;
    Ok(())
}

/// Deliver a follow-up, retrying every `interval` until it succeeds or
/// `budget` is spent. Returns the last error on failure.
pub async fn follow_up_with_retry<M>(
    messenger: &M,
    token: &InteractionToken,
    message: &Message,
    interval: Duration,
    budget: Duration,
) -> Result<(), PlatformError>
where
    M: Messenger + ?Sized,
{
    let deadline = Instant::now() + budget;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let error = match tokio::time::timeout(remaining, messenger.follow_up(token, message)).await
        {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(_) => PlatformError::Request("follow-up timed out".into()),
        };

        if Instant::now() + interval >= deadline {
            tracing::debug!(attempts, "Follow-up budget exhausted");
            return Err(error);
        }
        tracing::debug!(attempts, error = %error, "Cannot follow up, trying again");
        tokio::time::sleep(interval).await;
    }
}
