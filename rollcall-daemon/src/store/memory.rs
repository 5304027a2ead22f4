//! In-memory durable backend.
//!
//! Suitable for tests and single-process development. Data is lost on
//! restart.

use std::collections::HashMap;

use async_trait::async_trait;
use rollcall_core::{ChannelId, GroupId, GroupRegistrationConfig, MemberProfile, UserId};
use parking_lot::RwLock;

use super::{GroupConfigStore, MemberStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    groups: RwLock<HashMap<GroupId, GroupRegistrationConfig>>,
    members: RwLock<HashMap<(GroupId, UserId), MemberProfile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GroupConfigStore for MemoryStore {
    async fn init_group(&self, config: &GroupRegistrationConfig) -> Result<(), StoreError> {
        let mut groups = self.groups.write();
        if groups.contains_key(&config.group_id) {
            return Err(StoreError::AlreadyExists);
        }
        groups.insert(config.group_id, config.clone());
        Ok(())
    }

    async fn group_config(&self, group: GroupId) -> Result<GroupRegistrationConfig, StoreError> {
        self.groups
            .read()
            .get(&group)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn set_admin_channel(
        &self,
        group: GroupId,
        channel: Option<ChannelId>,
    ) -> Result<(), StoreError> {
        let mut groups = self.groups.write();
        let config = groups.get_mut(&group).ok_or(StoreError::NotFound)?;
        config.admin_channel_id = channel;
        Ok(())
    }

    async fn delete_group(&self, group: GroupId) -> Result<(), StoreError> {
        // Lock order: groups, then members
        let mut groups = self.groups.write();
        let mut members = self.members.write();
        if groups.remove(&group).is_none() {
            return Err(StoreError::NotFound);
        }
        members.retain(|(g, _), _| *g != group);
        Ok(())
    }
}

#[async_trait]
impl MemberStore for MemoryStore {
    async fn member(&self, group: GroupId, user: UserId) -> Result<MemberProfile, StoreError> {
        self.members
            .read()
            .get(&(group, user))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn register_member(&self, profile: &MemberProfile) -> Result<(), StoreError> {
        let mut members = self.members.write();
        let key = (profile.group_id, profile.user_id);
        if members.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        members.insert(key, profile.clone());
        Ok(())
    }

    async fn unregister_member(&self, group: GroupId, user: UserId) -> Result<(), StoreError> {
        self.members
            .write()
            .remove(&(group, user))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}
