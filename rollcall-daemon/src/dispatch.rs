//! Routes interactions to services and turns their results into responses.
//!
//! Every interaction runs on its own task. A handler that panics, or that
//! misses the response deadline, fails only its own interaction.

use std::sync::Arc;
use std::time::Duration;

use rollcall_core::{GroupId, RegistrationError, UserId};
use tokio::task::JoinError;

use crate::interaction::{Interaction, InteractionKind, InteractionResponse, Message};
use crate::platform::{notify_admins, Platform};
use crate::services::{AdminService, RegistrationService, Reply};

/// Default time the platform waits for a synchronous answer.
pub const DEFAULT_RESPONSE_DEADLINE: Duration = Duration::from_secs(3);

/// Why a handler produced no result.
#[derive(Debug, thiserror::Error)]
pub enum HandlerFailure {
    #[error("bug: panic occurred: {0}")]
    Panicked(String),

    #[error("handler task was cancelled")]
    Cancelled,

    #[error("no response within {0:?}")]
    DeadlineExceeded(Duration),
}

impl From<JoinError> for HandlerFailure {
    fn from(err: JoinError) -> Self {
        if !err.is_panic() {
            return Self::Cancelled;
        }
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panicked(message)
    }
}

/// Entry point for interactions. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    registration: RegistrationService,
    admin: AdminService,
    platform: Arc<dyn Platform>,
    response_deadline: Duration,
}

impl Dispatcher {
    pub fn new(
        registration: RegistrationService,
        admin: AdminService,
        platform: Arc<dyn Platform>,
    ) -> Self {
        Self {
            registration,
            admin,
            platform,
            response_deadline: DEFAULT_RESPONSE_DEADLINE,
        }
    }

    pub fn with_response_deadline(mut self, deadline: Duration) -> Self {
        self.response_deadline = deadline;
        self
    }

    pub fn registration(&self) -> &RegistrationService {
        &self.registration
    }

    /// Handle one interaction. `None` means no response is sent.
    ///
    /// A handler still running at the deadline keeps running in the
    /// background; the caller gets the internal-error response.
    pub async fn dispatch(&self, interaction: Interaction) -> Option<InteractionResponse> {
        let group = interaction.group_id;
        let user = interaction.user_id;
        let kind = interaction.kind.name();

        tracing::debug!(group = %group, user = %user, kind, "Interaction received");

        let this = self.clone();
        let handler = tokio::spawn(async move { this.route(interaction).await });

        let reply = match tokio::time::timeout(self.response_deadline, handler).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => Err(RegistrationError::internal(
                "interaction handler failed",
                HandlerFailure::from(e),
            )),
            Err(_) => Err(RegistrationError::internal(
                "interaction handler failed",
                HandlerFailure::DeadlineExceeded(self.response_deadline),
            )),
        };

        self.respond(group, user, kind, reply).await
    }

    async fn route(&self, interaction: Interaction) -> Reply {
        let group = interaction.group_id;
        let user = interaction.user_id;

        match &interaction.kind {
            InteractionKind::Ping => Ok(Some(InteractionResponse::Pong)),
            InteractionKind::RegisterButton => self.registration.register_button(group, user).await,
            InteractionKind::VerifyButton => self.registration.verify_button(group, user).await,
            InteractionKind::RegistrationForm(form) => {
                self.registration
                    .submit_form(&interaction.token, group, user, form)
                    .await
            }
            InteractionKind::PinForm { pin } => self.registration.submit_pin(group, user, pin).await,
            InteractionKind::Command(command) => {
                let message = self.admin.execute(&interaction, command).await?;
                Ok(Some(message.into()))
            }
        }
    }

    async fn respond(
        &self,
        group: GroupId,
        user: UserId,
        kind: &'static str,
        reply: Reply,
    ) -> Option<InteractionResponse> {
        match reply {
            Ok(Some(response)) => Some(response),
            Ok(None) => {
                tracing::debug!(group = %group, user = %user, kind, "Ignoring interaction from unregistered guild");
                None
            }
            Err(e) if e.is_internal() => {
                tracing::error!(group = %group, user = %user, kind, error = %e, "Interaction failed");
                let channel = self.registration.admin_channel(group).await;
                notify_admins(
                    Arc::clone(&self.platform),
                    group,
                    channel,
                    format!("Error handling {kind} from <@{user}>: {e}"),
                );
                Some(Message::internal_error().into())
            }
            Err(e) => {
                tracing::debug!(group = %group, user = %user, kind, error = %e, "Interaction rejected");
                Some(Message::error(e.user_message()).into())
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registration", &self.registration)
            .field("response_deadline", &self.response_deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_panic_payload_is_captured() {
        let err = tokio::spawn(async { panic!("boom") }).await.unwrap_err();
        let failure = HandlerFailure::from(err);

        assert!(matches!(&failure, HandlerFailure::Panicked(msg) if msg == "boom"));
        assert_eq!(failure.to_string(), "bug: panic occurred: boom");
    }

    #[tokio::test]
    async fn test_formatted_panic_payload() {
        let code = 7;
        let err = tokio::spawn(async move { panic!("code {code}") })
            .await
            .unwrap_err();

        assert!(matches!(HandlerFailure::from(err), HandlerFailure::Panicked(msg) if msg == "code 7"));
    }

    #[tokio::test]
    async fn test_aborted_task_is_cancelled() {
        let handle = tokio::spawn(std::future::pending::<()>());
        handle.abort();
        let err = handle.await.unwrap_err();

        assert!(matches!(HandlerFailure::from(err), HandlerFailure::Cancelled));
    }
}
