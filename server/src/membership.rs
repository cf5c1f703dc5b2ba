/// Group membership: the oracle the router consults before a group send,
/// and the mutations exposed to the request layer.
///
/// Any member may add or remove members and delete the group; anyone may
/// leave. Non-members get a bare permission error with no detail.
use crate::auth::AccountDirectory;
use crate::db::models::Group;
use crate::db::{Database, DbPool};
use crate::error::{ChatError, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct GroupMembership {
    pool: DbPool,
    directory: Arc<dyn AccountDirectory>,
}

impl GroupMembership {
    pub fn new(pool: DbPool, directory: Arc<dyn AccountDirectory>) -> Self {
        GroupMembership { pool, directory }
    }

    /// Current member set of a group
    pub async fn get_members(&self, group_id: &str) -> Result<BTreeSet<String>> {
        Database::get_members(&self.pool, group_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("group {}", group_id)))
    }

    pub async fn is_member(&self, group_id: &str, identity: &str) -> Result<bool> {
        Ok(Database::is_member(&self.pool, group_id, identity).await?)
    }

    pub async fn get_group(&self, group_id: &str) -> Result<Group> {
        Database::get_group(&self.pool, group_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("group {}", group_id)))
    }

    /// Load a group on behalf of `actor`, who must be a member
    pub async fn authorize(&self, group_id: &str, actor: &str) -> Result<Group> {
        let group = self.get_group(group_id).await?;
        if !group.members.contains(actor) {
            return Err(ChatError::Permission);
        }
        Ok(group)
    }

    /// Create a group. The creator is always a member.
    pub async fn create(&self, name: &str, creator: &str, member_ids: &[String]) -> Result<Group> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::Validation("group name is required".to_string()));
        }

        let mut members: BTreeSet<String> = BTreeSet::new();
        for member in member_ids {
            if !self.directory.contains(member) {
                return Err(ChatError::NotFound(format!("user {}", member)));
            }
            members.insert(member.clone());
        }
        members.insert(creator.to_string());

        let group = Database::create_group(&self.pool, name, &members).await?;
        log::info!("{} created group {} with {} members", creator, group.id, group.members.len());
        Ok(group)
    }

    pub async fn groups_for(&self, identity: &str) -> Result<Vec<Group>> {
        Ok(Database::list_groups_for_member(&self.pool, identity).await?)
    }

    pub async fn add_member(&self, group_id: &str, actor: &str, identity: &str) -> Result<Group> {
        let group = self.authorize(group_id, actor).await?;
        if group.members.contains(identity) {
            return Err(ChatError::Conflict(format!("{} is already a member", identity)));
        }
        if !self.directory.contains(identity) {
            return Err(ChatError::NotFound(format!("user {}", identity)));
        }

        if !Database::add_member(&self.pool, group_id, identity).await? {
            return Err(ChatError::Conflict(format!("{} is already a member", identity)));
        }
        self.get_group(group_id).await
    }

    pub async fn remove_member(&self, group_id: &str, actor: &str, identity: &str) -> Result<Group> {
        self.authorize(group_id, actor).await?;
        Database::remove_member(&self.pool, group_id, identity).await?;
        self.get_group(group_id).await
    }

    /// Leave a group. Leaving a group one is not in is a no-op.
    pub async fn exit(&self, group_id: &str, identity: &str) -> Result<()> {
        self.get_group(group_id).await?;
        Database::remove_member(&self.pool, group_id, identity).await?;
        Ok(())
    }
}
