use anyhow::{anyhow, Result};
use chrono::{Datelike, Utc};
use shared::{
    Child, ChildListResponse, ChildResponse, CreateChildRequest, RecordId, SelectChildResponse,
    SessionUser, UpdateChildRequest,
};
use tracing::{info, warn};

use super::access_resolver::AccessResolver;
use super::age::parse_date;
use super::family_group_service::FamilyGroupService;
use super::session::SessionContext;
use super::sync_service::SyncService;
use crate::storage::collections::{
    Checklists, Children, Growth, HealthRecords, Logs, SelectedChildren, UserChildren, Vaccinations,
};
use crate::storage::ids::next_record_id;
use crate::storage::remote::Mutation;
use crate::storage::RecordStore;

const MAX_NAME_LEN: usize = 100;

/// Child profiles, the per-user selected child and the deletion cascade
#[derive(Clone)]
pub struct ChildService {
    store: RecordStore,
    access: AccessResolver,
    family: FamilyGroupService,
    sync: SyncService,
}

impl ChildService {
    pub fn new(store: RecordStore, access: AccessResolver, family: FamilyGroupService, sync: SyncService) -> Self {
        Self {
            store,
            access,
            family,
            sync,
        }
    }

    /// Session for a user, restoring their selected child
    pub async fn session_for(&self, user: SessionUser) -> Result<SessionContext> {
        let selected = self.selected_child_id(&user.user_id).await?;
        Ok(SessionContext::new(user, selected))
    }

    /// Register a child for the session's user, select it and open its family group
    pub async fn register_child(&self, ctx: &SessionContext, request: CreateChildRequest) -> Result<ChildResponse> {
        info!("Registering child {} for {}", request.name, ctx.user_id());
        validate_name(&request.name)?;
        validate_birth_date(&request.birth_date)?;

        let now = Utc::now().to_rfc3339();
        let child = Child {
            id: next_record_id(""),
            owner_user_id: ctx.user_id().to_string(),
            name: request.name.trim().to_string(),
            birth_date: request.birth_date.trim().to_string(),
            photo_ref: request.photo_ref,
            created_at: now.clone(),
            updated_at: now,
        };

        self.store.put::<Children, _>(child.id.as_str(), child.clone()).await?;
        let child_ids = self.link_to_user(ctx.user_id(), &child.id).await?;
        self.store
            .put::<SelectedChildren, _>(ctx.user_id(), child.id.clone())
            .await?;

        self.sync
            .commit_local_mutation(Mutation::SaveChild { child: child.clone() })
            .await;
        self.family
            .create_group(&child.id, ctx.user_id(), &ctx.user.display_name)
            .await?;
        self.sync
            .commit_local_mutation(Mutation::SaveUserChildren {
                user_id: ctx.user_id().to_string(),
                child_ids,
            })
            .await;

        info!("Registered child {} with ID {}", child.name, child.id);
        Ok(ChildResponse {
            child,
            success_message: "Child registered successfully".to_string(),
        })
    }

    /// Edit a child's profile; any user with access may edit
    pub async fn update_child(
        &self,
        ctx: &SessionContext,
        child_id: &RecordId,
        request: UpdateChildRequest,
    ) -> Result<ChildResponse> {
        let mut child = self
            .access
            .child_for(ctx.user_id(), child_id)
            .await?
            .ok_or_else(|| anyhow!("Child not found: {}", child_id))?;

        if let Some(ref name) = request.name {
            validate_name(name)?;
        }
        if let Some(ref birth_date) = request.birth_date {
            validate_birth_date(birth_date)?;
        }

        if let Some(name) = request.name {
            child.name = name.trim().to_string();
        }
        if let Some(birth_date) = request.birth_date {
            child.birth_date = birth_date.trim().to_string();
        }
        if let Some(photo_ref) = request.photo_ref {
            child.photo_ref = Some(photo_ref).filter(|p| !p.is_empty());
        }
        child.updated_at = Utc::now().to_rfc3339();

        self.store.put::<Children, _>(child.id.as_str(), child.clone()).await?;
        self.sync
            .commit_local_mutation(Mutation::SaveChild { child: child.clone() })
            .await;

        info!("Updated child {} with ID {}", child.name, child.id);
        Ok(ChildResponse {
            child,
            success_message: "Child updated successfully".to_string(),
        })
    }

    /// Delete a child and everything recorded for it.
    ///
    /// Dangling ids in the user's mapping may be deleted too, which cleans
    /// them up. Returns false when the user has no link to the child.
    pub async fn delete_child(&self, ctx: &SessionContext, child_id: &RecordId) -> Result<bool> {
        let user_id = ctx.user_id().to_string();
        if !self.access.raw_child_ids_for(&user_id).await?.contains(child_id) {
            warn!("User {} cannot delete child {}", user_id, child_id);
            return Ok(false);
        }
        info!("Deleting child {} by {}", child_id, user_id);
        let key = child_id.to_string();

        let existed = self.store.take::<Children, _>(&key).await?.is_some();
        if !existed {
            warn!("Child {} has no profile, removing its links only", child_id);
        }

        let child_ids = self
            .store
            .modify::<UserChildren, _, _>(|mapping| {
                for ids in mapping.values_mut() {
                    ids.retain(|id| id != child_id);
                }
                mapping.get(&user_id).cloned().unwrap_or_default()
            })
            .await?;

        self.store
            .modify::<Logs, _, _>(|logs| logs.retain(|l| &l.child_id != child_id))
            .await?;
        self.store
            .modify::<Growth, _, _>(|entries| entries.retain(|g| &g.child_id != child_id))
            .await?;
        self.store.take::<Vaccinations, _>(&key).await?;
        self.store.take::<Checklists, _>(&key).await?;
        self.family.delete_group_for_child(child_id).await?;
        self.store.take::<HealthRecords, _>(&key).await?;
        self.store
            .modify::<SelectedChildren, _, _>(|selected| selected.retain(|_, id| id != child_id))
            .await?;

        self.sync
            .commit_local_mutation(Mutation::DeleteChild { child_id: child_id.clone() })
            .await;
        self.sync
            .commit_local_mutation(Mutation::SaveUserChildren { user_id, child_ids })
            .await;

        Ok(true)
    }

    pub async fn list_children(&self, ctx: &SessionContext) -> Result<ChildListResponse> {
        let children = self.access.children_for(ctx.user_id()).await?;
        let selected_child_id = self.selected_child_id(ctx.user_id()).await?;
        Ok(ChildListResponse {
            children,
            selected_child_id,
        })
    }

    pub async fn get_child(&self, ctx: &SessionContext, child_id: &RecordId) -> Result<Option<Child>> {
        self.access.child_for(ctx.user_id(), child_id).await
    }

    /// Stored selection, if the user can still access that child
    pub async fn selected_child_id(&self, user_id: &str) -> Result<Option<RecordId>> {
        let selected = match self.store.find::<SelectedChildren, _>(user_id).await? {
            Some(id) => id,
            None => return Ok(None),
        };
        if self.access.can_access(user_id, &selected).await? {
            Ok(Some(selected))
        } else {
            Ok(None)
        }
    }

    /// Switch the selected child and pull its records
    pub async fn select_child(&self, ctx: &SessionContext, child_id: &RecordId) -> Result<SelectChildResponse> {
        if !self.access.can_access(ctx.user_id(), child_id).await? {
            warn!("User {} cannot select child {}", ctx.user_id(), child_id);
            return Ok(SelectChildResponse {
                success: false,
                selected_child_id: self.selected_child_id(ctx.user_id()).await?,
                synced: false,
            });
        }

        self.store
            .put::<SelectedChildren, _>(ctx.user_id(), child_id.clone())
            .await?;
        let session = ctx.clone().with_selected(Some(child_id.clone()));
        let outcome = self.sync.sync_from_remote(&session).await;

        Ok(SelectChildResponse {
            success: true,
            selected_child_id: Some(child_id.clone()),
            synced: outcome.is_synced(),
        })
    }

    async fn link_to_user(&self, user_id: &str, child_id: &RecordId) -> Result<Vec<RecordId>> {
        self.store
            .modify::<UserChildren, _, _>(|mapping| {
                let ids = mapping.entry(user_id.to_string()).or_default();
                if !ids.contains(child_id) {
                    ids.push(child_id.clone());
                }
                ids.clone()
            })
            .await
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(anyhow!("Child name cannot be empty"));
    }
    if name.trim().chars().count() > MAX_NAME_LEN {
        return Err(anyhow!("Child name cannot exceed {} characters", MAX_NAME_LEN));
    }
    Ok(())
}

fn validate_birth_date(birth_date: &str) -> Result<()> {
    let date = parse_date(birth_date)
        .ok_or_else(|| anyhow!("Birth date must be a valid date in YYYY-MM-DD format"))?;
    if !(1900..=2100).contains(&date.year()) {
        return Err(anyhow!("Birth year must be between 1900 and 2100"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::collections::FamilyGroups;
    use crate::test_utils::TestEnvironment;
    use shared::{
        HealthCategory, HealthRecordRequest, SaveGrowthRequest, SaveLogRequest, ToggleChecklistRequest,
        ToggleVaccinationRequest,
    };

    fn request(name: &str, birth_date: &str) -> CreateChildRequest {
        CreateChildRequest {
            name: name.to_string(),
            birth_date: birth_date.to_string(),
            photo_ref: None,
        }
    }

    #[tokio::test]
    async fn test_register_child_selects_and_lists_it() {
        let env = TestEnvironment::new().await;
        let ctx = env.session("alice").await;

        let response = env
            .state
            .child_service
            .register_child(&ctx, request("  Mina ", "2024-01-15"))
            .await
            .unwrap();
        assert_eq!(response.child.name, "Mina");
        assert_eq!(response.child.owner_user_id, "alice");

        let list = env.state.child_service.list_children(&ctx).await.unwrap();
        assert_eq!(list.children.len(), 1);
        assert_eq!(list.selected_child_id, Some(response.child.id.clone()));
    }

    #[tokio::test]
    async fn test_register_child_validation() {
        let env = TestEnvironment::new().await;
        let ctx = env.session("alice").await;
        let service = &env.state.child_service;

        assert!(service.register_child(&ctx, request("", "2024-01-15")).await.is_err());
        assert!(service.register_child(&ctx, request(&"x".repeat(101), "2024-01-15")).await.is_err());
        assert!(service.register_child(&ctx, request("Mina", "2024-02-30")).await.is_err());
        assert!(service.register_child(&ctx, request("Mina", "1850-01-01")).await.is_err());
        assert!(service.list_children(&ctx).await.unwrap().children.is_empty());
    }

    #[tokio::test]
    async fn test_update_child_requires_access() {
        let env = TestEnvironment::new().await;
        let child = env.register_child("alice", "Mina").await;

        let outsider = env.session("mallory").await;
        let update = UpdateChildRequest {
            name: Some("Hijacked".to_string()),
            ..Default::default()
        };
        let err = env
            .state
            .child_service
            .update_child(&outsider, &child.id, update.clone())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));

        let owner = env.session("alice").await;
        let updated = env.state.child_service.update_child(&owner, &child.id, update).await.unwrap();
        assert_eq!(updated.child.name, "Hijacked");
    }

    #[tokio::test]
    async fn test_delete_child_cascades() {
        let env = TestEnvironment::new().await;
        let child = env.register_child("alice", "Mina").await;
        let keep = env.register_child("alice", "Noa").await;
        let ctx = env.session("alice").await;

        env.state
            .log_service
            .save_log(&ctx, &child.id, SaveLogRequest { text: "Rolled over".to_string(), ai_analysis: None })
            .await
            .unwrap();
        env.state
            .log_service
            .save_log(&ctx, &keep.id, SaveLogRequest { text: "Crawled".to_string(), ai_analysis: None })
            .await
            .unwrap();
        env.state
            .growth_service
            .save_entry(
                &ctx,
                &child.id,
                SaveGrowthRequest { months: 2, height: Some(58.0), weight: None, date: "2024-03-15".to_string() },
            )
            .await
            .unwrap();
        env.state
            .health_service
            .toggle_checklist_item(&ctx, &child.id, ToggleChecklistRequest { item_id: "m2_smile".to_string(), checked: true })
            .await
            .unwrap();
        env.state
            .health_service
            .toggle_vaccination(
                &ctx,
                &child.id,
                ToggleVaccinationRequest {
                    vaccine_id: "hepb".to_string(),
                    dose: 1,
                    completed: true,
                    completed_date: Some("2024-01-16".to_string()),
                },
            )
            .await
            .unwrap();
        env.state
            .health_service
            .add_health_record(
                &ctx,
                &child.id,
                HealthRecordRequest { category: HealthCategory::Allergy, details: serde_json::Map::new() },
            )
            .await
            .unwrap();
        env.state.child_service.select_child(&ctx, &child.id).await.unwrap();
        env.flush().await;
        assert_eq!(env.state.child_service.selected_child_id("alice").await.unwrap(), Some(child.id.clone()));

        assert!(env.state.child_service.delete_child(&ctx, &child.id).await.unwrap());

        assert!(!env.state.access.can_access("alice", &child.id).await.unwrap());
        let logs = env.state.store.read::<Logs>().await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].child_id, keep.id);
        assert!(env.state.store.read::<Growth>().await.unwrap().is_empty());
        assert!(env.state.store.find::<Checklists, _>(child.id.as_str()).await.unwrap().is_none());
        assert!(env.state.store.find::<Vaccinations, _>(child.id.as_str()).await.unwrap().is_none());
        assert!(env.state.store.find::<HealthRecords, _>(child.id.as_str()).await.unwrap().is_none());
        assert!(env.state.store.find::<SelectedChildren, _>("alice").await.unwrap().is_none());
        assert_eq!(env.state.child_service.selected_child_id("alice").await.unwrap(), None);
        let groups = env.state.store.read::<FamilyGroups>().await.unwrap();
        assert!(groups.values().all(|g| g.child_id != child.id));

        env.flush().await;
        let child_prefix = format!("children/{}", child.id);
        let leftovers: Vec<String> = env
            .remote
            .paths()
            .await
            .into_iter()
            .filter(|p| p == &child_prefix || p.starts_with(&format!("{}/", child_prefix)))
            .collect();
        assert!(leftovers.is_empty(), "remote leftovers: {:?}", leftovers);
    }

    #[tokio::test]
    async fn test_delete_child_without_link_is_refused() {
        let env = TestEnvironment::new().await;
        let child = env.register_child("alice", "Mina").await;
        let outsider = env.session("mallory").await;

        assert!(!env.state.child_service.delete_child(&outsider, &child.id).await.unwrap());
        assert!(env.state.access.can_access("alice", &child.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_select_child_switches_selection() {
        let env = TestEnvironment::new().await;
        let first = env.register_child("alice", "Mina").await;
        let second = env.register_child("alice", "Noa").await;
        let ctx = env.session("alice").await;
        assert_eq!(ctx.selected_child_id, Some(second.id.clone()));

        let response = env.state.child_service.select_child(&ctx, &first.id).await.unwrap();
        assert!(response.success);
        assert!(response.synced);
        assert_eq!(env.session("alice").await.selected_child_id, Some(first.id));

        let outsider = env.session("mallory").await;
        let denied = env.state.child_service.select_child(&outsider, &second.id).await.unwrap();
        assert!(!denied.success);
    }
}
