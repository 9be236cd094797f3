use anyhow::Result;
use chrono::Utc;
use shared::{FamilyGroup, FamilyMember, JoinFamilyResponse, MemberRole, RecordId};
use tracing::{info, warn};

use super::access_resolver::AccessResolver;
use super::session::SessionContext;
use super::sync_service::SyncService;
use crate::storage::collections::{FamilyGroups, SelectedChildren, UserChildren};
use crate::storage::ids::next_record_id;
use crate::storage::remote::{Mutation, RemoteGateway};
use crate::storage::RecordStore;

/// Invite code alphabet: no I, O, 0 or 1
const INVITE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const INVITE_CODE_LEN: usize = 6;

/// Six characters drawn from v4 UUID randomness.
///
/// The alphabet has 32 symbols, which divides 256, so reducing a random
/// byte modulo 32 is unbiased.
pub fn generate_invite_code() -> String {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    bytes
        .iter()
        .take(INVITE_CODE_LEN)
        .map(|b| INVITE_ALPHABET[(*b as usize) % INVITE_ALPHABET.len()] as char)
        .collect()
}

enum GroupLookup {
    Found(FamilyGroup),
    Unknown,
    Unverifiable,
}

fn normalize_invite_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Family groups: one per child, joined through an invite code
#[derive(Clone)]
pub struct FamilyGroupService {
    store: RecordStore,
    gateway: RemoteGateway,
    access: AccessResolver,
    sync: SyncService,
}

impl FamilyGroupService {
    pub fn new(store: RecordStore, gateway: RemoteGateway, access: AccessResolver, sync: SyncService) -> Self {
        Self {
            store,
            gateway,
            access,
            sync,
        }
    }

    /// Create the group for a child with the owner as its sole member.
    /// A child that already has a group keeps it.
    pub async fn create_group(&self, child_id: &RecordId, owner_id: &str, owner_name: &str) -> Result<FamilyGroup> {
        if let Some(existing) = self.group_for_child(child_id).await? {
            return Ok(existing);
        }

        let now = Utc::now().to_rfc3339();
        let group_id = next_record_id("fg_");
        let group = self
            .store
            .modify::<FamilyGroups, _, _>(|groups| {
                let mut invite_code = generate_invite_code();
                while groups.values().any(|g| g.invite_code == invite_code) {
                    invite_code = generate_invite_code();
                }

                let group = FamilyGroup {
                    family_group_id: group_id.clone(),
                    child_id: child_id.clone(),
                    invite_code,
                    created_by: owner_id.to_string(),
                    created_at: now.clone(),
                    members: vec![FamilyMember {
                        user_id: owner_id.to_string(),
                        name: owner_name.to_string(),
                        role: MemberRole::Owner,
                        joined_at: now.clone(),
                    }],
                };
                groups.insert(group_id.to_string(), group.clone());
                group
            })
            .await?;

        info!("Created family group {} for child {}", group.family_group_id, child_id);
        self.sync
            .commit_local_mutation(Mutation::SaveFamilyGroup { group: group.clone() })
            .await;

        Ok(group)
    }

    pub async fn group_for_child(&self, child_id: &RecordId) -> Result<Option<FamilyGroup>> {
        let groups = self.store.read::<FamilyGroups>().await?;
        Ok(groups.into_values().find(|g| &g.child_id == child_id))
    }

    /// The child's group, if the session's user may see the child
    pub async fn family_for(&self, ctx: &SessionContext, child_id: &RecordId) -> Result<Option<FamilyGroup>> {
        if self.access.child_for(ctx.user_id(), child_id).await?.is_none() {
            return Ok(None);
        }
        self.group_for_child(child_id).await
    }

    /// Drop the child's group from the local cache. The remote copy is
    /// removed by the child's cascade delete.
    pub async fn delete_group_for_child(&self, child_id: &RecordId) -> Result<Option<FamilyGroup>> {
        self.store
            .modify::<FamilyGroups, _, _>(|groups| {
                let id = groups
                    .iter()
                    .find(|(_, g)| &g.child_id == child_id)
                    .map(|(id, _)| id.clone());
                id.and_then(|id| groups.remove(&id))
            })
            .await
    }

    /// Join the group behind an invite code.
    ///
    /// User-level problems (unknown code, remote unreachable) come back as
    /// `success: false`; this never fails with an error.
    pub async fn join_group(&self, ctx: &SessionContext, invite_code: &str) -> JoinFamilyResponse {
        let code = normalize_invite_code(invite_code);
        if code.len() != INVITE_CODE_LEN {
            return JoinFamilyResponse::failure("Invalid invite code");
        }

        match self.try_join(ctx, &code).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Join with code {} failed: {:#}", code, e);
                JoinFamilyResponse::failure("Could not process the invite code")
            }
        }
    }

    async fn try_join(&self, ctx: &SessionContext, code: &str) -> Result<JoinFamilyResponse> {
        let user_id = ctx.user_id();

        let mut group = match self.find_group(code).await? {
            GroupLookup::Found(group) => group,
            GroupLookup::Unknown => return Ok(JoinFamilyResponse::failure("Invalid invite code")),
            GroupLookup::Unverifiable => {
                return Ok(JoinFamilyResponse::failure(
                    "Could not verify the invite code, try again when online",
                ))
            }
        };

        if group.has_member(user_id) {
            info!("{} rejoined family group {}", user_id, group.family_group_id);
            self.link_child(ctx, &group.child_id).await?;
            self.sync.sync_from_remote(&self.session_after_join(ctx, &group)).await;
            return Ok(JoinFamilyResponse {
                success: true,
                message: "Reconnected to the family group".to_string(),
                family_group: Some(group),
            });
        }

        let member = FamilyMember {
            user_id: user_id.to_string(),
            name: ctx.user.display_name.clone(),
            role: MemberRole::Member,
            joined_at: Utc::now().to_rfc3339(),
        };
        group.members.push(member.clone());
        self.store
            .put::<FamilyGroups, _>(group.family_group_id.as_str(), group.clone())
            .await?;

        if let Err(e) = self.gateway.add_family_member(&group.family_group_id, &member).await {
            warn!("Could not push membership for {} now, queued: {}", user_id, e);
            self.sync
                .commit_local_mutation(Mutation::AddFamilyMember {
                    family_group_id: group.family_group_id.clone(),
                    member,
                })
                .await;
        }

        self.link_child(ctx, &group.child_id).await?;
        info!("{} joined family group {}", user_id, group.family_group_id);

        // The join stands even when the follow-up sync fails
        let outcome = self.sync.sync_from_remote(&self.session_after_join(ctx, &group)).await;
        if !outcome.is_synced() {
            warn!("Sync after joining {} did not complete", group.family_group_id);
        }

        Ok(JoinFamilyResponse {
            success: true,
            message: "Joined the family group".to_string(),
            family_group: Some(group),
        })
    }

    /// Local lookup first, then the remote (caching what it finds)
    async fn find_group(&self, code: &str) -> Result<GroupLookup> {
        let groups = self.store.read::<FamilyGroups>().await?;
        if let Some(group) = groups.into_values().find(|g| g.invite_code == code) {
            return Ok(GroupLookup::Found(group));
        }

        match self.gateway.find_family_group_by_invite_code(code).await {
            Ok(Some(group)) => {
                self.store
                    .put::<FamilyGroups, _>(group.family_group_id.as_str(), group.clone())
                    .await?;
                Ok(GroupLookup::Found(group))
            }
            Ok(None) => Ok(GroupLookup::Unknown),
            Err(e) => {
                warn!("Could not look up invite code remotely: {}", e);
                Ok(GroupLookup::Unverifiable)
            }
        }
    }

    /// Add the child to the user's direct mapping and push the mapping
    async fn link_child(&self, ctx: &SessionContext, child_id: &RecordId) -> Result<()> {
        let user_id = ctx.user_id().to_string();
        let child_ids = self
            .store
            .modify::<UserChildren, _, _>(|mapping| {
                let ids = mapping.entry(user_id.clone()).or_default();
                if !ids.contains(child_id) {
                    ids.push(child_id.clone());
                }
                ids.clone()
            })
            .await?;

        if ctx.selected_child_id.is_none() {
            self.store
                .put::<SelectedChildren, _>(&user_id, child_id.clone())
                .await?;
        }

        self.sync
            .commit_local_mutation(Mutation::SaveUserChildren { user_id, child_ids })
            .await;
        Ok(())
    }

    fn session_after_join(&self, ctx: &SessionContext, group: &FamilyGroup) -> SessionContext {
        match ctx.selected_child_id {
            Some(_) => ctx.clone(),
            None => ctx.clone().with_selected(Some(group.child_id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::remote::RemoteGateway;
    use crate::test_utils::TestEnvironment;

    #[test]
    fn test_invite_codes_use_unambiguous_alphabet() {
        for _ in 0..200 {
            let code = generate_invite_code();
            assert_eq!(code.len(), INVITE_CODE_LEN);
            assert!(code.bytes().all(|b| INVITE_ALPHABET.contains(&b)), "bad code {}", code);
        }
    }

    #[tokio::test]
    async fn test_register_child_creates_group_with_owner() {
        let env = TestEnvironment::new().await;
        let child = env.register_child("alice", "Mina").await;
        let ctx = env.session("alice").await;

        let group = env
            .state
            .family_group_service
            .family_for(&ctx, &child.id)
            .await
            .unwrap()
            .expect("group created with the child");
        assert_eq!(group.members.len(), 1);
        assert_eq!(group.owner().map(|m| m.user_id.as_str()), Some("alice"));

        let again = env
            .state
            .family_group_service
            .create_group(&child.id, "alice", "Alice")
            .await
            .unwrap();
        assert_eq!(again.family_group_id, group.family_group_id);
    }

    #[tokio::test]
    async fn test_join_through_remote_lookup() {
        let alice = TestEnvironment::new().await;
        let child = alice.register_child("alice", "Mina").await;
        alice.flush().await;
        let code = alice
            .state
            .family_group_service
            .group_for_child(&child.id)
            .await
            .unwrap()
            .unwrap()
            .invite_code;

        let bob = alice.second_device();
        let ctx = bob.session("bob").await;
        let response = bob
            .state
            .family_group_service
            .join_group(&ctx, &code.to_lowercase())
            .await;

        assert!(response.success, "{}", response.message);
        assert_eq!(response.message, "Joined the family group");
        assert!(bob.state.access.can_access("bob", &child.id).await.unwrap());
        assert_eq!(bob.session("bob").await.selected_child_id, Some(child.id.clone()));

        let remote_group = RemoteGateway::new(bob.remote.clone())
            .find_family_group_by_invite_code(&code)
            .await
            .unwrap()
            .unwrap();
        assert!(remote_group.has_member("bob"));
        assert_eq!(remote_group.members.len(), 2);
    }

    #[tokio::test]
    async fn test_rejoin_does_not_duplicate_membership() {
        let alice = TestEnvironment::new().await;
        let child = alice.register_child("alice", "Mina").await;
        alice.flush().await;
        let code = alice
            .state
            .family_group_service
            .group_for_child(&child.id)
            .await
            .unwrap()
            .unwrap()
            .invite_code;

        let bob = alice.second_device();
        let ctx = bob.session("bob").await;
        assert!(bob.state.family_group_service.join_group(&ctx, &code).await.success);

        let ctx = bob.session("bob").await;
        let response = bob.state.family_group_service.join_group(&ctx, &code).await;
        assert!(response.success);
        assert_eq!(response.message, "Reconnected to the family group");
        assert_eq!(response.family_group.map(|g| g.members.len()), Some(2));
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_codes_are_rejected() {
        let env = TestEnvironment::new().await;
        let ctx = env.session("bob").await;

        let response = env.state.family_group_service.join_group(&ctx, "ZZZZZZ").await;
        assert!(!response.success);
        assert_eq!(response.message, "Invalid invite code");

        let response = env.state.family_group_service.join_group(&ctx, "abc").await;
        assert!(!response.success);
        assert_eq!(response.message, "Invalid invite code");
    }

    #[tokio::test]
    async fn test_join_while_offline_is_unverifiable() {
        let env = TestEnvironment::new().await;
        env.remote.set_offline(true);
        let ctx = env.session("bob").await;

        let response = env.state.family_group_service.join_group(&ctx, "ABCDEF").await;
        assert!(!response.success);
        assert_eq!(response.message, "Could not verify the invite code, try again when online");
    }

    #[tokio::test]
    async fn test_family_hidden_from_outsiders() {
        let env = TestEnvironment::new().await;
        let child = env.register_child("alice", "Mina").await;
        let ctx = env.session("mallory").await;

        let group = env.state.family_group_service.family_for(&ctx, &child.id).await.unwrap();
        assert!(group.is_none());
    }
}
