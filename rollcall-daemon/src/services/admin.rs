//! Administrator commands: enabling registration and managing members.

use std::sync::Arc;

use rollcall_core::{
    ChannelId, GroupId, GroupRegistrationConfig, MemberProfile, RegistrationError, UserId,
};

use crate::interaction::{AdminCommand, Interaction, Message};
use crate::platform::{Platform, PlatformError};
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("you're not an administrator; contact the guild owner")]
    NotAdmin,

    #[error("registration is not enabled in this guild")]
    NotConfigured,

    #[error("guild is already registered; clear it first")]
    AlreadyConfigured,

    #[error("user is not registered")]
    MemberNotFound,

    #[error("cannot post the registration prompt: {0}")]
    Prompt(#[source] PlatformError),

    /// The member record is already gone when this is returned.
    #[error("member unregistered, but cannot remove their role: {0}")]
    RoleNotRevoked(#[source] PlatformError),

    #[error("cannot change nickname: {0}")]
    Nickname(#[source] PlatformError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AdminError> for RegistrationError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::Store(e) => RegistrationError::internal("admin command", e),
            other => RegistrationError::Validation(other.to_string()),
        }
    }
}

/// Executes administrator commands against the store and platform.
#[derive(Clone)]
pub struct AdminService {
    store: Arc<dyn Store>,
    platform: Arc<dyn Platform>,
}

impl AdminService {
    pub fn new(store: Arc<dyn Store>, platform: Arc<dyn Platform>) -> Self {
        Self { store, platform }
    }

    /// Enable registration for `config.group_id`.
    pub async fn init_group(&self, config: &GroupRegistrationConfig) -> Result<(), AdminError> {
        self.store.init_group(config).await.map_err(|e| match e {
            StoreError::AlreadyExists => AdminError::AlreadyConfigured,
            other => other.into(),
        })?;

        tracing::info!(
            group = %config.group_id,
            channel = %config.channel_id,
            role = %config.role_id,
            by = %config.init_user_id,
            "Registration enabled"
        );
        Ok(())
    }

    /// Enable registration and post the register button into the
    /// registration channel. Enabling is undone if the post fails.
    pub async fn init_and_announce(&self, config: &GroupRegistrationConfig) -> Result<(), AdminError> {
        self.init_group(config).await?;

        if let Err(e) = self.platform.send(config.channel_id, &Message::register_prompt()).await {
            tracing::warn!(group = %config.group_id, error = %e, "Cannot post registration prompt");
            if let Err(rollback) = self.store.delete_group(config.group_id).await {
                tracing::error!(group = %config.group_id, error = %rollback, "Cannot undo registration setup");
            }
            return Err(AdminError::Prompt(e));
        }
        Ok(())
    }

    /// Disable registration and delete every member record. Roles stay.
    pub async fn clear_group(&self, group: GroupId) -> Result<(), AdminError> {
        self.config(group).await?;
        self.store.delete_group(group).await.map_err(not_configured)?;
        tracing::info!(group = %group, "Registration cleared");
        Ok(())
    }

    pub async fn set_admin_channel(
        &self,
        group: GroupId,
        channel: Option<ChannelId>,
    ) -> Result<(), AdminError> {
        self.store
            .set_admin_channel(group, channel)
            .await
            .map_err(not_configured)?;
        tracing::info!(group = %group, channel = ?channel, "Admin channel changed");
        Ok(())
    }

    pub async fn group_config(&self, group: GroupId) -> Result<GroupRegistrationConfig, AdminError> {
        self.config(group).await
    }

    pub async fn query_member(&self, group: GroupId, user: UserId) -> Result<MemberProfile, AdminError> {
        self.config(group).await?;
        self.store.member(group, user).await.map_err(member_not_found)
    }

    /// Delete the member record, then revoke the member role.
    pub async fn unregister_member(&self, group: GroupId, user: UserId) -> Result<(), AdminError> {
        let config = self.config(group).await?;
        self.store
            .unregister_member(group, user)
            .await
            .map_err(member_not_found)?;
        tracing::info!(group = %group, user = %user, "Member unregistered");

        self.platform
            .revoke_role(group, user, config.role_id)
            .await
            .map_err(AdminError::RoleNotRevoked)
    }

    /// Re-apply the nickname derived from the member's record. Returns the
    /// nickname.
    pub async fn reset_display_name(&self, group: GroupId, user: UserId) -> Result<String, AdminError> {
        let profile = self.query_member(group, user).await?;
        let nickname = profile.metadata.nickname();

        self.platform
            .set_display_name(group, user, &nickname)
            .await
            .map_err(AdminError::Nickname)?;
        Ok(nickname)
    }

    /// Run a command sent through the event source.
    pub async fn execute(
        &self,
        interaction: &Interaction,
        command: &AdminCommand,
    ) -> Result<Message, AdminError> {
        if !interaction.is_admin {
            return Err(AdminError::NotAdmin);
        }
        let group = interaction.group_id;

        match command {
            AdminCommand::InitRegistration {
                channel_id,
                role_id,
                registered_message,
                admin_channel_id,
            } => {
                let config = GroupRegistrationConfig {
                    group_id: group,
                    channel_id: *channel_id,
                    role_id: *role_id,
                    init_user_id: interaction.user_id,
                    registered_message: registered_message.clone(),
                    admin_channel_id: *admin_channel_id,
                };
                self.init_and_announce(&config).await?;
                Ok(Message::text("Done!"))
            }
            AdminCommand::ClearRegistration => {
                self.clear_group(group).await?;
                Ok(Message::text(
                    "Done. All members have been removed from the database, but their roles stay.",
                ))
            }
            AdminCommand::SetAdminChannel { channel_id } => {
                self.set_admin_channel(group, *channel_id).await?;
                Ok(Message::text(match channel_id {
                    Some(channel) => format!("Admin notices will be sent to <#{channel}>."),
                    None => "Admin notices are disabled.".to_string(),
                }))
            }
            AdminCommand::QueryMember { user_id } => {
                let profile = self.query_member(group, *user_id).await?;
                let json = serde_json::to_string_pretty(&profile).map_err(StoreError::from)?;
                Ok(Message::text(format!("```json\n{json}\n```")))
            }
            AdminCommand::UnregisterMember { user_id } => {
                self.unregister_member(group, *user_id).await?;
                Ok(Message::text(format!("User <@{user_id}> has been unregistered.")))
            }
            AdminCommand::ResetName { user_id } => {
                self.reset_display_name(group, *user_id).await?;
                Ok(Message::text(format!("User <@{user_id}>'s nickname has been reset.")))
            }
        }
    }

    async fn config(&self, group: GroupId) -> Result<GroupRegistrationConfig, AdminError> {
        self.store.group_config(group).await.map_err(not_configured)
    }
}

fn not_configured(err: StoreError) -> AdminError {
    match err {
        StoreError::NotFound => AdminError::NotConfigured,
        other => AdminError::Store(other),
    }
}

fn member_not_found(err: StoreError) -> AdminError {
    match err {
        StoreError::NotFound => AdminError::MemberNotFound,
        other => AdminError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rollcall_auth::Janitor;
    use rollcall_core::{Email, MemberMetadata, Pronouns, RoleId};

    use crate::interaction::{InteractionKind, InteractionToken};
    use crate::platform::Offline;
    use crate::store::{EphemeralSettings, MemoryStore, RegistrationStore};

    const GROUP: GroupId = GroupId(100);

    fn service() -> AdminService {
        let janitor = Janitor::start(Duration::from_secs(3600));
        let store = RegistrationStore::new(
            Arc::new(MemoryStore::new()),
            &janitor,
            EphemeralSettings::default(),
        );
        AdminService::new(Arc::new(store), Arc::new(Offline))
    }

    fn config() -> GroupRegistrationConfig {
        GroupRegistrationConfig {
            group_id: GROUP,
            channel_id: ChannelId(10),
            role_id: RoleId(20),
            init_user_id: UserId(1),
            registered_message: None,
            admin_channel_id: None,
        }
    }

    fn profile(user: UserId) -> MemberProfile {
        MemberProfile::new(
            GROUP,
            user,
            MemberMetadata {
                email: Email::new("ada@csu.edu"),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                pronouns: Pronouns::SheHer,
            },
        )
    }

    #[tokio::test]
    async fn test_init_group_twice() {
        let admin = service();
        admin.init_group(&config()).await.unwrap();

        let err = admin.init_group(&config()).await.unwrap_err();
        assert!(matches!(err, AdminError::AlreadyConfigured));
    }

    #[tokio::test]
    async fn test_announce_failure_rolls_back() {
        let admin = service();

        let err = admin.init_and_announce(&config()).await.unwrap_err();
        assert!(matches!(err, AdminError::Prompt(PlatformError::Unavailable)));
        assert!(matches!(
            admin.group_config(GROUP).await,
            Err(AdminError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_unregister_deletes_record_even_if_role_stays() {
        let admin = service();
        admin.init_group(&config()).await.unwrap();
        admin.store.register_member(&profile(UserId(2))).await.unwrap();

        let err = admin.unregister_member(GROUP, UserId(2)).await.unwrap_err();
        assert!(matches!(err, AdminError::RoleNotRevoked(_)));

        let err = admin.query_member(GROUP, UserId(2)).await.unwrap_err();
        assert!(matches!(err, AdminError::MemberNotFound));
    }

    #[tokio::test]
    async fn test_unconfigured_group() {
        let admin = service();

        assert!(matches!(
            admin.clear_group(GROUP).await,
            Err(AdminError::NotConfigured)
        ));
        assert!(matches!(
            admin.query_member(GROUP, UserId(2)).await,
            Err(AdminError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_execute_requires_admin() {
        let admin = service();
        let interaction = Interaction {
            token: InteractionToken::new("tok"),
            group_id: GROUP,
            user_id: UserId(5),
            is_admin: false,
            kind: InteractionKind::Command(AdminCommand::ClearRegistration),
        };

        let err = admin
            .execute(&interaction, &AdminCommand::ClearRegistration)
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::NotAdmin));
        assert_eq!(
            RegistrationError::from(err).user_message(),
            "you're not an administrator; contact the guild owner"
        );
    }

    #[tokio::test]
    async fn test_query_member_renders_json() {
        let admin = service();
        admin.init_group(&config()).await.unwrap();
        admin.store.register_member(&profile(UserId(2))).await.unwrap();

        let interaction = Interaction {
            token: InteractionToken::new("tok"),
            group_id: GROUP,
            user_id: UserId(1),
            is_admin: true,
            kind: InteractionKind::Ping,
        };
        let message = admin
            .execute(&interaction, &AdminCommand::QueryMember { user_id: UserId(2) })
            .await
            .unwrap();

        assert!(message.content.starts_with("```json\n"));
        assert!(message.content.contains("ada@csu.edu"));
        assert!(message.ephemeral);
    }
}
