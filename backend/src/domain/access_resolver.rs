//! Which children a user may see.
//!
//! A user has access to a child when the child is in the user's direct
//! mapping, or when the user is a member of the child's family group.

use anyhow::Result;
use shared::{Child, RecordId};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::storage::collections::{Children, FamilyGroups, UserChildren};
use crate::storage::RecordStore;

#[derive(Clone)]
pub struct AccessResolver {
    store: RecordStore,
}

impl AccessResolver {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    /// Direct mapping union group memberships, without checking that the
    /// children still exist
    pub async fn raw_child_ids_for(&self, user_id: &str) -> Result<BTreeSet<RecordId>> {
        let mut ids: BTreeSet<RecordId> = self
            .store
            .get::<UserChildren, _>(user_id)
            .await?
            .into_iter()
            .collect();

        let groups = self.store.read::<FamilyGroups>().await?;
        ids.extend(
            groups
                .into_values()
                .filter(|g| g.has_member(user_id))
                .map(|g| g.child_id),
        );
        Ok(ids)
    }

    /// Accessible child ids that resolve to a stored child
    pub async fn child_ids_for(&self, user_id: &str) -> Result<BTreeSet<RecordId>> {
        let raw = self.raw_child_ids_for(user_id).await?;
        let children = self.store.read::<Children>().await?;

        let (present, dangling): (BTreeSet<RecordId>, BTreeSet<RecordId>) =
            raw.into_iter().partition(|id| children.contains_key(id.as_str()));
        if !dangling.is_empty() {
            debug!("Ignoring {} dangling child ids for {}", dangling.len(), user_id);
        }
        Ok(present)
    }

    /// Accessible children ordered by id
    pub async fn children_for(&self, user_id: &str) -> Result<Vec<Child>> {
        let ids = self.child_ids_for(user_id).await?;
        let mut children = self.store.read::<Children>().await?;
        Ok(ids
            .iter()
            .filter_map(|id| children.remove(id.as_str()))
            .collect())
    }

    pub async fn can_access(&self, user_id: &str, child_id: &RecordId) -> Result<bool> {
        Ok(self.child_ids_for(user_id).await?.contains(child_id))
    }

    /// The child if the user may access it; denial is logged, not an error
    pub async fn child_for(&self, user_id: &str, child_id: &RecordId) -> Result<Option<Child>> {
        if !self.can_access(user_id, child_id).await? {
            warn!("User {} has no access to child {}", user_id, child_id);
            return Ok(None);
        }
        self.store.find::<Children, _>(child_id.as_str()).await
    }
}
