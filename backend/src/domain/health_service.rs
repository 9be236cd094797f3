//! Milestone checklist, vaccination doses and health records of a child.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use shared::{
    vaccination_key, ChecklistState, HealthCategory, HealthRecord, HealthRecordRequest, RecordId,
    ToggleChecklistRequest, ToggleVaccinationRequest, VaccinationDose, VaccinationState,
};
use tracing::{info, warn};

use super::access_resolver::AccessResolver;
use super::session::SessionContext;
use super::sync_service::SyncService;
use crate::storage::collections::{Checklists, HealthRecords, Vaccinations};
use crate::storage::ids::next_record_id;
use crate::storage::remote::Mutation;
use crate::storage::RecordStore;

/// Fields of a health record that an update may not overwrite
const PROTECTED_FIELDS: [&str; 4] = ["id", "child_id", "created_at", "updated_at"];

#[derive(Clone)]
pub struct HealthService {
    store: RecordStore,
    access: AccessResolver,
    sync: SyncService,
}

impl HealthService {
    pub fn new(store: RecordStore, access: AccessResolver, sync: SyncService) -> Self {
        Self { store, access, sync }
    }

    async fn allowed(&self, ctx: &SessionContext, child_id: &RecordId) -> Result<bool> {
        let allowed = self.access.can_access(ctx.user_id(), child_id).await?;
        if !allowed {
            warn!("User {} has no access to health data of child {}", ctx.user_id(), child_id);
        }
        Ok(allowed)
    }

    // --- checklist ---

    pub async fn checked_items(&self, ctx: &SessionContext, child_id: &RecordId) -> Result<ChecklistState> {
        if !self.allowed(ctx, child_id).await? {
            return Ok(ChecklistState::new());
        }
        self.store.get::<Checklists, _>(child_id.as_str()).await
    }

    pub async fn toggle_checklist_item(
        &self,
        ctx: &SessionContext,
        child_id: &RecordId,
        request: ToggleChecklistRequest,
    ) -> Result<ChecklistState> {
        if !self.allowed(ctx, child_id).await? {
            return Ok(ChecklistState::new());
        }

        let key = child_id.to_string();
        let item_id = request.item_id.clone();
        let items = self
            .store
            .modify::<Checklists, _, _>(move |all| {
                let items = all.entry(key).or_default();
                items.insert(item_id, request.checked);
                items.clone()
            })
            .await?;

        self.sync
            .commit_local_mutation(Mutation::SetChecklistItem {
                child_id: child_id.clone(),
                item_id: request.item_id,
                checked: request.checked,
            })
            .await;
        Ok(items)
    }

    // --- vaccination ---

    pub async fn vaccination_records(&self, ctx: &SessionContext, child_id: &RecordId) -> Result<VaccinationState> {
        if !self.allowed(ctx, child_id).await? {
            return Ok(VaccinationState::new());
        }
        self.store.get::<Vaccinations, _>(child_id.as_str()).await
    }

    pub async fn toggle_vaccination(
        &self,
        ctx: &SessionContext,
        child_id: &RecordId,
        request: ToggleVaccinationRequest,
    ) -> Result<VaccinationState> {
        if !self.allowed(ctx, child_id).await? {
            return Ok(VaccinationState::new());
        }

        let dose_key = vaccination_key(&request.vaccine_id, request.dose);
        let dose = VaccinationDose {
            completed: request.completed,
            completed_date: request.completed_date.filter(|_| request.completed),
            updated_at: Some(Utc::now().to_rfc3339()),
        };

        let key = child_id.to_string();
        let (entry_key, entry) = (dose_key.clone(), dose.clone());
        let records = self
            .store
            .modify::<Vaccinations, _, _>(move |all| {
                let records = all.entry(key).or_default();
                records.insert(entry_key, entry);
                records.clone()
            })
            .await?;

        self.sync
            .commit_local_mutation(Mutation::SetVaccinationDose {
                child_id: child_id.clone(),
                key: dose_key,
                dose,
            })
            .await;
        Ok(records)
    }

    // --- health records ---

    pub async fn health_records(&self, ctx: &SessionContext, child_id: &RecordId) -> Result<Vec<HealthRecord>> {
        if !self.allowed(ctx, child_id).await? {
            return Ok(Vec::new());
        }
        self.store.get::<HealthRecords, _>(child_id.as_str()).await
    }

    pub async fn health_records_by_category(
        &self,
        ctx: &SessionContext,
        child_id: &RecordId,
        category: HealthCategory,
    ) -> Result<Vec<HealthRecord>> {
        let records = self.health_records(ctx, child_id).await?;
        Ok(records.into_iter().filter(|r| r.category == category).collect())
    }

    pub async fn add_health_record(
        &self,
        ctx: &SessionContext,
        child_id: &RecordId,
        request: HealthRecordRequest,
    ) -> Result<Vec<HealthRecord>> {
        if !self.allowed(ctx, child_id).await? {
            return Ok(Vec::new());
        }

        let mut details = request.details;
        for field in PROTECTED_FIELDS.iter().chain(["category"].iter()) {
            details.remove(*field);
        }
        let record = HealthRecord {
            id: next_record_id("hr_"),
            child_id: child_id.clone(),
            category: request.category,
            created_at: Utc::now().to_rfc3339(),
            updated_at: None,
            details,
        };

        let key = child_id.to_string();
        let stored = record.clone();
        let records = self
            .store
            .modify::<HealthRecords, _, _>(move |all| {
                let records = all.entry(key).or_default();
                records.push(stored);
                records.clone()
            })
            .await?;
        info!("Added {:?} record {} for child {}", record.category, record.id, child_id);

        self.sync
            .commit_local_mutation(Mutation::UpsertHealthRecord { record })
            .await;
        Ok(records)
    }

    /// Shallow merge of `updates` into the record; `category` may change too
    pub async fn update_health_record(
        &self,
        ctx: &SessionContext,
        child_id: &RecordId,
        record_id: &RecordId,
        updates: Map<String, Value>,
    ) -> Result<Vec<HealthRecord>> {
        if !self.allowed(ctx, child_id).await? {
            return Ok(Vec::new());
        }

        let key = child_id.to_string();
        let now = Utc::now().to_rfc3339();
        let (records, updated) = self
            .store
            .modify::<HealthRecords, _, _>(|all| {
                let records = all.entry(key).or_default();
                let updated = records.iter_mut().find(|r| r.id == *record_id).map(|record| {
                    apply_updates(record, updates, now);
                    record.clone()
                });
                (records.clone(), updated)
            })
            .await?;

        let record = updated.ok_or_else(|| anyhow!("Health record not found: {}", record_id))?;
        self.sync
            .commit_local_mutation(Mutation::UpsertHealthRecord { record })
            .await;
        Ok(records)
    }

    pub async fn delete_health_record(
        &self,
        ctx: &SessionContext,
        child_id: &RecordId,
        record_id: &RecordId,
    ) -> Result<Vec<HealthRecord>> {
        if !self.allowed(ctx, child_id).await? {
            return Ok(Vec::new());
        }

        let key = child_id.to_string();
        let records = self
            .store
            .modify::<HealthRecords, _, _>(|all| {
                let records = all.entry(key).or_default();
                records.retain(|r| r.id != *record_id);
                records.clone()
            })
            .await?;

        self.sync
            .commit_local_mutation(Mutation::DeleteHealthRecord {
                child_id: child_id.clone(),
                record_id: record_id.clone(),
            })
            .await;
        Ok(records)
    }
}

fn apply_updates(record: &mut HealthRecord, updates: Map<String, Value>, now: String) {
    for (field, value) in updates {
        if PROTECTED_FIELDS.contains(&field.as_str()) {
            continue;
        }
        if field == "category" {
            match serde_json::from_value::<HealthCategory>(value) {
                Ok(category) => record.category = category,
                Err(e) => warn!("Ignoring invalid category on {}: {}", record.id, e),
            }
            continue;
        }
        record.details.insert(field, value);
    }
    record.updated_at = Some(now);
}
