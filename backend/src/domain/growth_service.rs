use anyhow::{anyhow, Result};
use chrono::Utc;
use shared::{GrowthEntry, RecordId, SaveGrowthRequest};
use tracing::{info, warn};

use super::access_resolver::AccessResolver;
use super::age::parse_date;
use super::session::SessionContext;
use super::sync_service::SyncService;
use crate::storage::collections::Growth;
use crate::storage::remote::Mutation;
use crate::storage::RecordStore;

#[derive(Clone)]
pub struct GrowthService {
    store: RecordStore,
    access: AccessResolver,
    sync: SyncService,
}

impl GrowthService {
    pub fn new(store: RecordStore, access: AccessResolver, sync: SyncService) -> Self {
        Self { store, access, sync }
    }

    pub async fn save_entry(
        &self,
        ctx: &SessionContext,
        child_id: &RecordId,
        request: SaveGrowthRequest,
    ) -> Result<Vec<GrowthEntry>> {
        if !self.access.can_access(ctx.user_id(), child_id).await? {
            warn!("User {} cannot record growth for child {}", ctx.user_id(), child_id);
            return Ok(Vec::new());
        }
        validate(&request)?;

        let entry = self
            .store
            .append::<Growth, _>(GrowthEntry {
                id: RecordId::default(),
                child_id: child_id.clone(),
                months: request.months,
                height: request.height,
                weight: request.weight,
                date: request.date.trim().to_string(),
                created_at: Utc::now().to_rfc3339(),
            })
            .await?;
        info!("Saved growth entry {} for child {} at {} months", entry.id, child_id, entry.months);

        self.sync
            .commit_local_mutation(Mutation::SaveGrowthEntry { entry })
            .await;
        self.read_history(child_id).await
    }

    pub async fn delete_entry(
        &self,
        ctx: &SessionContext,
        child_id: &RecordId,
        entry_id: &RecordId,
    ) -> Result<Vec<GrowthEntry>> {
        if !self.access.can_access(ctx.user_id(), child_id).await? {
            warn!("User {} cannot delete growth of child {}", ctx.user_id(), child_id);
            return Ok(Vec::new());
        }

        self.store
            .modify::<Growth, _, _>(|entries| {
                entries.retain(|e| !(e.id == *entry_id && &e.child_id == child_id))
            })
            .await?;
        self.sync
            .commit_local_mutation(Mutation::DeleteGrowthEntry {
                child_id: child_id.clone(),
                entry_id: entry_id.clone(),
            })
            .await;

        self.read_history(child_id).await
    }

    /// Growth history ordered by age in months, then measurement date
    pub async fn history_for_child(&self, ctx: &SessionContext, child_id: &RecordId) -> Result<Vec<GrowthEntry>> {
        if !self.access.can_access(ctx.user_id(), child_id).await? {
            warn!("User {} cannot read growth of child {}", ctx.user_id(), child_id);
            return Ok(Vec::new());
        }
        self.read_history(child_id).await
    }

    async fn read_history(&self, child_id: &RecordId) -> Result<Vec<GrowthEntry>> {
        let mut history: Vec<GrowthEntry> = self
            .store
            .read::<Growth>()
            .await?
            .into_iter()
            .filter(|e| &e.child_id == child_id)
            .collect();
        history.sort_by(|a, b| {
            a.months
                .cmp(&b.months)
                .then_with(|| a.date.cmp(&b.date))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(history)
    }
}

fn validate(request: &SaveGrowthRequest) -> Result<()> {
    if request.height.is_none() && request.weight.is_none() {
        return Err(anyhow!("Either height or weight is required"));
    }
    for (label, value) in [("Height", request.height), ("Weight", request.weight)] {
        if let Some(v) = value {
            if !v.is_finite() || v <= 0.0 {
                return Err(anyhow!("{} must be a positive number", label));
            }
        }
    }
    if parse_date(&request.date).is_none() {
        return Err(anyhow!("Measurement date must be in YYYY-MM-DD format"));
    }
    Ok(())
}
