//! Confirmation email delivery.

use async_trait::async_trait;
use rollcall_auth::Pin;
use rollcall_core::{Email, GroupId, UserId};

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail transport error: {0}")]
    Transport(String),

    #[error("mail rejected: {0}")]
    Rejected(String),
}

/// Content of one confirmation email.
#[derive(Debug, Clone)]
pub struct Confirmation {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub email: Email,
    /// Name the member registered with.
    pub name: String,
    pub pin: Pin,
}

/// Sends the PIN to the address being verified.
#[async_trait]
pub trait ConfirmationMailer: Send + Sync {
    async fn send_confirmation(&self, confirmation: &Confirmation) -> Result<(), MailError>;
}

/// Development mailer that writes the PIN to the log instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl ConfirmationMailer for LogMailer {
    async fn send_confirmation(&self, confirmation: &Confirmation) -> Result<(), MailError> {
        tracing::info!(
            group = %confirmation.group_id,
            user = %confirmation.user_id,
            email = %confirmation.email,
            name = %confirmation.name,
            pin = %confirmation.pin,
            "Confirmation email (log only)"
        );
        Ok(())
    }
}
