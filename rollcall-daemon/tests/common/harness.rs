//! Test harness for registration E2E tests.
//!
//! Wires the real services and dispatcher to recording fakes of the chat
//! platform and the mailer. No network, no filesystem.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rollcall_auth::{EmailHosts, EmailVerifier, Janitor, Pin, VerifyError};
use rollcall_core::{
    ChannelId, Email, GroupId, GroupRegistrationConfig, PendingSubmission, RoleId, UserId,
};
use rollcall_daemon::dispatch::Dispatcher;
use rollcall_daemon::interaction::{
    AdminCommand, Interaction, InteractionKind, InteractionResponse, InteractionToken, Message,
};
use rollcall_daemon::mail::{Confirmation, ConfirmationMailer, MailError};
use rollcall_daemon::platform::{MemberActions, Messenger, PlatformError};
use rollcall_daemon::services::{
    AdminService, ConfirmationScheduler, PinAttemptLimiter, RegistrationService, SchedulerSettings,
};
use rollcall_daemon::store::{
    DurableStore, EphemeralSettings, MemoryStore, RegistrationStore, SqliteStore, Store,
};

pub const GROUP: GroupId = GroupId(1000);
pub const CHANNEL: ChannelId = ChannelId(2000);
pub const ADMIN_CHANNEL: ChannelId = ChannelId(2001);
pub const ROLE: RoleId = RoleId(3000);
pub const ADMIN: UserId = UserId(1);

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Fakes
// ============================================================================

/// Platform that records every side effect. Failures are switchable.
#[derive(Default)]
pub struct RecordingPlatform {
    pub grants: Mutex<Vec<(GroupId, UserId, RoleId)>>,
    pub revokes: Mutex<Vec<(GroupId, UserId, RoleId)>>,
    pub nicknames: Mutex<Vec<(GroupId, UserId, String)>>,
    pub follow_ups: Mutex<Vec<(InteractionToken, Message)>>,
    pub channel_messages: Mutex<Vec<(ChannelId, Message)>>,

    pub fail_grant: AtomicBool,
    pub fail_nickname: AtomicBool,
    pub panic_on_grant: AtomicBool,
    /// Number of follow-ups to reject before accepting.
    pub follow_up_failures: AtomicUsize,
    pub grant_delay: Mutex<Duration>,
}

impl RecordingPlatform {
    pub fn follow_up_for(&self, token: &InteractionToken) -> Option<Message> {
        self.follow_ups
            .lock()
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, m)| m.clone())
    }

    pub fn messages_in(&self, channel: ChannelId) -> Vec<Message> {
        self.channel_messages
            .lock()
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl MemberActions for RecordingPlatform {
    async fn grant_role(&self, group: GroupId, user: UserId, role: RoleId) -> Result<(), PlatformError> {
        let delay = *self.grant_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.panic_on_grant.load(Ordering::SeqCst) {
            panic!("role grant exploded");
        }
        if self.fail_grant.load(Ordering::SeqCst) {
            return Err(PlatformError::Request("missing permissions".into()));
        }
        self.grants.lock().push((group, user, role));
        Ok(())
    }

    async fn revoke_role(&self, group: GroupId, user: UserId, role: RoleId) -> Result<(), PlatformError> {
        self.revokes.lock().push((group, user, role));
        Ok(())
    }

    async fn set_display_name(&self, group: GroupId, user: UserId, name: &str) -> Result<(), PlatformError> {
        if self.fail_nickname.load(Ordering::SeqCst) {
            return Err(PlatformError::Request("cannot change owner nickname".into()));
        }
        self.nicknames.lock().push((group, user, name.to_string()));
        Ok(())
    }
}

#[async_trait]
impl Messenger for RecordingPlatform {
    async fn follow_up(&self, token: &InteractionToken, message: &Message) -> Result<(), PlatformError> {
        let rejected = self
            .follow_up_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(PlatformError::Request("unknown webhook".into()));
        }
        self.follow_ups.lock().push((token.clone(), message.clone()));
        Ok(())
    }

    async fn send(&self, channel: ChannelId, message: &Message) -> Result<(), PlatformError> {
        self.channel_messages.lock().push((channel, message.clone()));
        Ok(())
    }
}

/// Mailer that keeps every confirmation instead of sending it.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<Confirmation>>,
    pub fail: AtomicBool,
}

impl RecordingMailer {
    /// Most recent PIN mailed to `user`.
    pub fn pin_for(&self, user: UserId) -> Option<Pin> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|c| c.user_id == user)
            .map(|c| c.pin)
    }
}

#[async_trait]
impl ConfirmationMailer for RecordingMailer {
    async fn send_confirmation(&self, confirmation: &Confirmation) -> Result<(), MailError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailError::Transport("connection refused".into()));
        }
        self.sent.lock().push(confirmation.clone());
        Ok(())
    }
}

/// Verifier with a fixed answer.
pub enum StaticVerifier {
    Accept,
    Reject(String),
    Unavailable,
}

#[async_trait]
impl EmailVerifier for StaticVerifier {
    async fn verify(&self, _email: &Email) -> Result<(), VerifyError> {
        match self {
            Self::Accept => Ok(()),
            Self::Reject(reason) => Err(VerifyError::Rejected(reason.clone())),
            Self::Unavailable => Err(VerifyError::Unavailable("directory timed out".into())),
        }
    }
}

// ============================================================================
// Test daemon
// ============================================================================

pub struct TestOptions {
    pub verification: bool,
    pub sqlite: bool,
    pub email_hosts: EmailHosts,
    pub verifier: Option<Arc<dyn EmailVerifier>>,
    pub response_deadline: Duration,
    pub pin_attempts_per_minute: u32,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            verification: false,
            sqlite: false,
            email_hosts: EmailHosts::default(),
            verifier: None,
            response_deadline: Duration::from_secs(3),
            pin_attempts_per_minute: 5,
        }
    }
}

/// Fully wired daemon with recording fakes.
pub struct TestDaemon {
    pub dispatcher: Dispatcher,
    pub store: Arc<dyn Store>,
    pub platform: Arc<RecordingPlatform>,
    pub mailer: Arc<RecordingMailer>,
    pub scheduler: Option<ConfirmationScheduler>,
    janitor: Janitor,
    next_token: AtomicU64,
}

impl TestDaemon {
    /// Direct registration on an in-memory store.
    pub async fn new() -> Self {
        Self::build(TestOptions::default()).await
    }

    /// PIN verification on an in-memory store.
    pub async fn with_verification() -> Self {
        Self::build(TestOptions {
            verification: true,
            ..Default::default()
        })
        .await
    }

    pub async fn build(options: TestOptions) -> Self {
        let durable: Arc<dyn DurableStore> = if options.sqlite {
            Arc::new(
                SqliteStore::in_memory()
                    .await
                    .expect("Failed to create in-memory database"),
            )
        } else {
            Arc::new(MemoryStore::new())
        };

        let janitor = Janitor::start(Duration::from_secs(60));
        let store: Arc<dyn Store> = Arc::new(RegistrationStore::new(
            durable,
            &janitor,
            EphemeralSettings::default(),
        ));
        let platform = Arc::new(RecordingPlatform::default());
        let mailer = Arc::new(RecordingMailer::default());

        let mut registration = RegistrationService::new(Arc::clone(&store), platform.clone())
            .with_email_hosts(options.email_hosts)
            .with_pin_limiter(PinAttemptLimiter::new(options.pin_attempts_per_minute));
        if let Some(verifier) = options.verifier {
            registration = registration.with_verifier(verifier);
        }

        let scheduler = options.verification.then(|| {
            ConfirmationScheduler::new(
                Arc::clone(&store),
                mailer.clone(),
                platform.clone(),
                SchedulerSettings {
                    send_timeout: Duration::from_secs(5),
                    follow_up_interval: Duration::from_millis(20),
                    follow_up_budget: Duration::from_secs(1),
                },
            )
        });
        if let Some(scheduler) = &scheduler {
            registration = registration.with_scheduler(scheduler.clone());
        }

        let admin = AdminService::new(Arc::clone(&store), platform.clone());
        let dispatcher = Dispatcher::new(registration, admin, platform.clone())
            .with_response_deadline(options.response_deadline);

        Self {
            dispatcher,
            store,
            platform,
            mailer,
            scheduler,
            janitor,
            next_token: AtomicU64::new(1),
        }
    }

    /// Enable registration in [`GROUP`] with an admin channel.
    pub async fn init_group(&self) {
        self.store
            .init_group(&GroupRegistrationConfig {
                group_id: GROUP,
                channel_id: CHANNEL,
                role_id: ROLE,
                init_user_id: ADMIN,
                registered_message: None,
                admin_channel_id: Some(ADMIN_CHANNEL),
            })
            .await
            .expect("Failed to init group");
    }

    pub fn interaction(&self, user: UserId, kind: InteractionKind) -> Interaction {
        let n = self.next_token.fetch_add(1, Ordering::Relaxed);
        Interaction {
            token: InteractionToken::new(format!("tok-{n}")),
            group_id: GROUP,
            user_id: user,
            is_admin: user == ADMIN,
            kind,
        }
    }

    pub async fn send(&self, user: UserId, kind: InteractionKind) -> Option<InteractionResponse> {
        self.dispatcher.dispatch(self.interaction(user, kind)).await
    }

    pub async fn command(&self, user: UserId, command: AdminCommand) -> Message {
        expect_message(self.send(user, InteractionKind::Command(command)).await)
    }

    /// Submit the registration form, returning the token used and the
    /// immediate response.
    pub async fn submit_form(
        &self,
        user: UserId,
        form: PendingSubmission,
    ) -> (InteractionToken, Option<InteractionResponse>) {
        let interaction = self.interaction(user, InteractionKind::RegistrationForm(form));
        let token = interaction.token.clone();
        (token, self.dispatcher.dispatch(interaction).await)
    }

    pub async fn submit_pin(&self, user: UserId, pin: impl Into<String>) -> Message {
        expect_message(
            self.send(user, InteractionKind::PinForm { pin: pin.into() })
                .await,
        )
    }

    /// Wait until a follow-up for `token` was delivered.
    pub async fn wait_for_follow_up(&self, token: &InteractionToken) -> Message {
        wait_until(|| self.platform.follow_up_for(token)).await
    }

    /// Wait until a PIN was mailed to `user`.
    pub async fn wait_for_pin(&self, user: UserId) -> Pin {
        wait_until(|| self.mailer.pin_for(user)).await
    }

    /// Wait until a message containing `needle` arrived in `channel`.
    pub async fn wait_for_channel_message(&self, channel: ChannelId, needle: &str) -> Message {
        wait_until(|| {
            self.platform
                .messages_in(channel)
                .into_iter()
                .find(|m| m.content.contains(needle))
        })
        .await
    }

    /// Run the verification flow for `user` up to the mailed PIN.
    pub async fn start_verification(&self, user: UserId) -> Pin {
        let (token, response) = self.submit_form(user, form("ada@csu.edu", "Ada")).await;
        assert_eq!(response, Some(InteractionResponse::Deferred));
        assert_eq!(self.wait_for_follow_up(&token).await, Message::verify_prompt());
        self.wait_for_pin(user).await
    }

    pub async fn shutdown(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.close(Duration::from_secs(1)).await;
        }
        self.janitor.shutdown().await;
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn form(email: &str, first_name: &str) -> PendingSubmission {
    PendingSubmission {
        email: email.into(),
        first_name: first_name.into(),
        last_name: String::new(),
        pronouns: String::new(),
    }
}

pub fn full_form(email: &str, first: &str, last: &str, pronouns: &str) -> PendingSubmission {
    PendingSubmission {
        email: email.into(),
        first_name: first.into(),
        last_name: last.into(),
        pronouns: pronouns.into(),
    }
}

pub fn expect_message(response: Option<InteractionResponse>) -> Message {
    match response {
        Some(InteractionResponse::Message(message)) => message,
        other => panic!("expected a message, got {other:?}"),
    }
}

/// Expected content of a user-facing error.
pub fn error_text(reason: &str) -> String {
    Message::error(reason).content
}

/// A valid PIN different from `pin`.
pub fn other_pin(pin: Pin) -> Pin {
    let value = if pin.value() == Pin::MAX { 1 } else { pin.value() + 1 };
    Pin::new(value).expect("valid PIN")
}

async fn wait_until<T>(mut check: impl FnMut() -> Option<T>) -> T {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            if let Some(value) = check() {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Timed out waiting for condition")
}
