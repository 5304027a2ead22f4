//! Per-community registration configuration.

use serde::{Deserialize, Serialize};

use crate::identity::{ChannelId, GroupId, RoleId, UserId};

/// Message shown after a successful registration when the community did not
/// configure its own.
pub const DEFAULT_REGISTERED_MESSAGE: &str = "You're all set!";

/// Registration settings of a community that opted in.
///
/// Absence of a config means the community never opted in and every
/// registration entry point stays silent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRegistrationConfig {
    pub group_id: GroupId,
    /// Channel where the registration prompt was posted.
    pub channel_id: ChannelId,
    /// Role granted to registered members.
    pub role_id: RoleId,
    /// Administrator who enabled registration.
    pub init_user_id: UserId,
    /// Custom success message.
    #[serde(default)]
    pub registered_message: Option<String>,
    /// Private channel for administrator notifications.
    #[serde(default)]
    pub admin_channel_id: Option<ChannelId>,
}

impl GroupRegistrationConfig {
    pub fn success_message(&self) -> &str {
        match self.registered_message.as_deref() {
            Some(msg) if !msg.trim().is_empty() => msg,
            _ => DEFAULT_REGISTERED_MESSAGE,
        }
    }
}
