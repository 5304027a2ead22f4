//! Chat-platform side effects consumed by the workflow.

use std::sync::Arc;

use async_trait::async_trait;
use rollcall_core::{ChannelId, GroupId, RoleId, UserId};

use crate::interaction::{InteractionToken, Message};

/// Failure of a platform call.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("platform request failed: {0}")]
    Request(String),

    #[error("platform connection unavailable")]
    Unavailable,
}

/// Changes applied to a community member.
#[async_trait]
pub trait MemberActions: Send + Sync {
    async fn grant_role(&self, group: GroupId, user: UserId, role: RoleId)
        -> Result<(), PlatformError>;

    async fn revoke_role(
        &self,
        group: GroupId,
        user: UserId,
        role: RoleId,
    ) -> Result<(), PlatformError>;

    async fn set_display_name(
        &self,
        group: GroupId,
        user: UserId,
        name: &str,
    ) -> Result<(), PlatformError>;
}

/// Outbound messages.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Deliver a follow-up to an interaction that was answered with a
    /// deferred acknowledgement.
    async fn follow_up(&self, token: &InteractionToken, message: &Message)
        -> Result<(), PlatformError>;

    /// Post a message to a channel.
    async fn send(&self, channel: ChannelId, message: &Message) -> Result<(), PlatformError>;
}

/// A full platform connection.
pub trait Platform: MemberActions + Messenger {}

impl<T: MemberActions + Messenger + ?Sized> Platform for T {}

/// Post `text` to a group's admin channel without waiting for delivery.
///
/// Does nothing when the group has no admin channel. Delivery failures are
/// only logged.
pub fn notify_admins<M>(messenger: Arc<M>, group: GroupId, channel: Option<ChannelId>, text: String)
where
    M: Messenger + ?Sized + 'static,
{
    let Some(channel) = channel else {
        tracing::debug!(group = %group, "No admin channel configured, notification dropped");
        return;
    };

    tokio::spawn(async move {
        let message = Message::text(text);
        if let Err(e) = messenger.send(channel, &message).await {
            tracing::warn!(group = %group, channel = %channel, error = %e, "Cannot notify admins");
        }
    });
}

/// Platform used by offline admin commands: nothing is reachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct Offline;

#[async_trait]
impl MemberActions for Offline {
    async fn grant_role(&self, _: GroupId, _: UserId, _: RoleId) -> Result<(), PlatformError> {
        Err(PlatformError::Unavailable)
    }

    async fn revoke_role(&self, _: GroupId, _: UserId, _: RoleId) -> Result<(), PlatformError> {
        Err(PlatformError::Unavailable)
    }

    async fn set_display_name(&self, _: GroupId, _: UserId, _: &str) -> Result<(), PlatformError> {
        Err(PlatformError::Unavailable)
    }
}

#[async_trait]
impl Messenger for Offline {
    async fn follow_up(&self, _: &InteractionToken, _: &Message) -> Result<(), PlatformError> {
        Err(PlatformError::Unavailable)
    }

    async fn send(&self, _: ChannelId, _: &Message) -> Result<(), PlatformError> {
        Err(PlatformError::Unavailable)
    }
}
