use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use shared::{LogMonthGroup, ObservationLog, RecordId, SaveLogRequest};
use std::collections::BTreeMap;
use std::cmp::Reverse;
use tracing::{info, warn};

use super::access_resolver::AccessResolver;
use super::age::age_today;
use super::session::SessionContext;
use super::sync_service::SyncService;
use crate::storage::collections::Logs;
use crate::storage::remote::Mutation;
use crate::storage::RecordStore;

/// Observation logs ("first smile", "rolled over") with the child's age at writing
#[derive(Clone)]
pub struct ObservationLogService {
    store: RecordStore,
    access: AccessResolver,
    sync: SyncService,
}

impl ObservationLogService {
    pub fn new(store: RecordStore, access: AccessResolver, sync: SyncService) -> Self {
        Self { store, access, sync }
    }

    /// Store a log and return the child's updated list, newest first
    pub async fn save_log(
        &self,
        ctx: &SessionContext,
        child_id: &RecordId,
        request: SaveLogRequest,
    ) -> Result<Vec<ObservationLog>> {
        let child = match self.access.child_for(ctx.user_id(), child_id).await? {
            Some(child) => child,
            None => return Ok(Vec::new()),
        };
        if request.text.trim().is_empty() {
            return Err(anyhow!("Log text cannot be empty"));
        }

        let age_at_record = age_today(&child.birth_date).unwrap_or_else(|| {
            warn!("Child {} has an unreadable birth date {:?}", child.id, child.birth_date);
            Default::default()
        });

        let log = self
            .store
            .append::<Logs, _>(ObservationLog {
                id: RecordId::default(),
                child_id: child.id.clone(),
                text: request.text,
                ai_analysis: request.ai_analysis,
                created_at: Utc::now().to_rfc3339(),
                age_at_record,
                author_id: Some(ctx.user_id().to_string()),
                author_name: Some(ctx.user.display_name.clone()),
            })
            .await?;
        info!("Saved log {} for child {} at {}", log.id, child.id, age_at_record.label());

        self.sync.commit_local_mutation(Mutation::SaveLog { log }).await;
        self.read_logs(child_id).await
    }

    pub async fn delete_log(
        &self,
        ctx: &SessionContext,
        child_id: &RecordId,
        log_id: &RecordId,
    ) -> Result<Vec<ObservationLog>> {
        if !self.access.can_access(ctx.user_id(), child_id).await? {
            warn!("User {} cannot delete logs of child {}", ctx.user_id(), child_id);
            return Ok(Vec::new());
        }

        let removed = self
            .store
            .modify::<Logs, _, _>(|logs| {
                let before = logs.len();
                logs.retain(|l| !(l.id == *log_id && &l.child_id == child_id));
                before - logs.len()
            })
            .await?;
        if removed == 0 {
            warn!("Log {} was not in the local cache", log_id);
        }
        self.sync
            .commit_local_mutation(Mutation::DeleteLog {
                child_id: child_id.clone(),
                log_id: log_id.clone(),
            })
            .await;

        self.read_logs(child_id).await
    }

    /// Logs of an accessible child, newest first
    pub async fn logs_for_child(&self, ctx: &SessionContext, child_id: &RecordId) -> Result<Vec<ObservationLog>> {
        if !self.access.can_access(ctx.user_id(), child_id).await? {
            warn!("User {} cannot read logs of child {}", ctx.user_id(), child_id);
            return Ok(Vec::new());
        }
        self.read_logs(child_id).await
    }

    async fn read_logs(&self, child_id: &RecordId) -> Result<Vec<ObservationLog>> {
        let logs = self.store.read::<Logs>().await?;
        Ok(logs.into_iter().filter(|l| &l.child_id == child_id).collect())
    }
}

fn created_at_key(log: &ObservationLog) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&log.created_at)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Timeline grouping: one group per month of age, newest month first,
/// newest log first inside each group
pub fn group_logs_by_age(logs: Vec<ObservationLog>) -> Vec<LogMonthGroup> {
    let mut by_month: BTreeMap<Reverse<u32>, Vec<ObservationLog>> = BTreeMap::new();
    for log in logs {
        by_month.entry(Reverse(log.age_at_record.months)).or_default().push(log);
    }

    by_month
        .into_iter()
        .map(|(Reverse(months), mut logs)| {
            logs.sort_by(|a, b| created_at_key(b).cmp(&created_at_key(a)).then_with(|| b.id.cmp(&a.id)));
            LogMonthGroup {
                months,
                label: format!("{} months", months),
                logs,
            }
        })
        .collect()
}
