//! # Sync Service
//!
//! Reconciles the local cache with the remote store.
//!
//! A pull (`sync_from_remote`) first pushes the outbox backlog, then fetches
//! everything the user can reach and only then applies it locally, so a
//! failed pull leaves the cache exactly as it was. Pulls are single-flight
//! per user: a caller that was already waiting when a pull started receives
//! that pull's result instead of running another one.
//!
//! Pushes go through the [`Outbox`]; callers never wait on the remote.

use anyhow::{bail, Result};
use futures::future::try_join_all;
use serde::Serialize;
use shared::{
    Child, ChecklistState, FamilyGroup, GrowthEntry, HealthRecord, ObservationLog, RecordId,
    SyncResponse, SyncStatusResponse, VaccinationState,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::merge::{spread_over, union_by_id};
use super::outbox::Outbox;
use super::session::SessionContext;
use crate::storage::collections::{
    Checklists, ChildScoped, Children, FamilyGroups, Growth, HealthRecords, Identified, Logs,
    UserChildren, Vaccinations,
};
use crate::storage::remote::{Mutation, RemoteError, RemoteGateway};
use crate::storage::RecordStore;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub pushed: usize,
    pub groups: usize,
    pub children: usize,
    pub logs: usize,
    pub growth_entries: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Synced(SyncReport),
    Failed { reason: String },
}

impl SyncOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced(_))
    }

    pub fn to_response(&self) -> SyncResponse {
        match self {
            SyncOutcome::Synced(report) => SyncResponse {
                success: true,
                message: "Synced with remote".to_string(),
                children: report.children,
                logs: report.logs,
                growth_entries: report.growth_entries,
            },
            SyncOutcome::Failed { reason } => SyncResponse {
                success: false,
                message: reason.clone(),
                children: 0,
                logs: 0,
                growth_entries: 0,
            },
        }
    }
}

/// Everything fetched from the remote before any local write happens
struct RemoteSnapshot {
    groups: Vec<FamilyGroup>,
    children: BTreeMap<RecordId, Child>,
    logs: Vec<(RecordId, Vec<ObservationLog>)>,
    growth: Vec<(RecordId, Vec<GrowthEntry>)>,
    selected: Option<SelectedChildSnapshot>,
}

struct SelectedChildSnapshot {
    child_id: RecordId,
    checklist: ChecklistState,
    vaccinations: VaccinationState,
    health_records: Vec<HealthRecord>,
}

struct CompletedRun {
    /// Highest ticket issued when the run started
    covers: u64,
    selected_child_id: Option<RecordId>,
    outcome: SyncOutcome,
}

#[derive(Default)]
struct UserSlot {
    tickets: AtomicU64,
    last: Mutex<Option<CompletedRun>>,
}

#[derive(Clone)]
pub struct SyncService {
    store: RecordStore,
    gateway: RemoteGateway,
    outbox: Outbox,
    slots: Arc<RwLock<HashMap<String, Arc<UserSlot>>>>,
    runs: Arc<AtomicU64>,
}

impl SyncService {
    pub fn new(store: RecordStore, gateway: RemoteGateway, outbox: Outbox) -> Self {
        Self {
            store,
            gateway,
            outbox,
            slots: Arc::new(RwLock::new(HashMap::new())),
            runs: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Number of pulls actually executed (coalesced callers excluded)
    pub fn completed_runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    async fn slot_for(&self, user_id: &str) -> Arc<UserSlot> {
        if let Some(slot) = self.slots.read().await.get(user_id) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// Record a completed local write for delivery to the remote
    pub async fn commit_local_mutation(&self, mutation: Mutation) {
        let kind = mutation.kind();
        if let Err(e) = self.outbox.enqueue(mutation).await {
            error!("Failed to queue {} for remote push: {:#}", kind, e);
        }
    }

    pub async fn status(&self) -> Result<SyncStatusResponse> {
        Ok(SyncStatusResponse {
            pending_mutations: self.outbox.pending_count().await?,
            dead_letters: self.outbox.dead_letters().await?.len(),
        })
    }

    /// Pull-merge the remote state reachable by the session's user
    pub async fn sync_from_remote(&self, ctx: &SessionContext) -> SyncOutcome {
        let slot = self.slot_for(ctx.user_id()).await;
        let ticket = slot.tickets.fetch_add(1, Ordering::SeqCst) + 1;

        let mut last = slot.last.lock().await;
        if let Some(run) = last.as_ref() {
            if run.covers >= ticket && run.selected_child_id == ctx.selected_child_id {
                debug!("Sync for {} coalesced into a run that started after the request", ctx.user_id());
                return run.outcome.clone();
            }
        }

        let covers = slot.tickets.load(Ordering::SeqCst);
        let outcome = match self.run_sync(ctx).await {
            Ok(report) => {
                info!(
                    "Synced {}: {} children, {} logs, {} growth entries",
                    ctx.user_id(),
                    report.children,
                    report.logs,
                    report.growth_entries
                );
                SyncOutcome::Synced(report)
            }
            Err(e) => {
                warn!("Sync for {} failed, local cache unchanged: {:#}", ctx.user_id(), e);
                SyncOutcome::Failed { reason: format!("{:#}", e) }
            }
        };
        self.runs.fetch_add(1, Ordering::SeqCst);

        *last = Some(CompletedRun {
            covers,
            selected_child_id: ctx.selected_child_id.clone(),
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn run_sync(&self, ctx: &SessionContext) -> Result<SyncReport> {
        let drained = self.outbox.drain(false).await?;
        if drained.remaining > 0 {
            bail!("{} local changes could not be pushed", drained.remaining);
        }

        let snapshot = self.fetch_remote(ctx).await?;
        let mut report = self.apply_snapshot(ctx, snapshot).await?;
        report.pushed = drained.delivered;
        Ok(report)
    }

    async fn fetch_remote(&self, ctx: &SessionContext) -> Result<RemoteSnapshot> {
        let user_id = ctx.user_id();

        let groups = self.gateway.get_family_groups_for_user(user_id).await?;

        let (owned, mapped) = tokio::try_join!(
            self.gateway.get_owned_children(user_id),
            self.gateway.get_user_children(user_id),
        )?;
        let mut children: BTreeMap<RecordId, Child> =
            owned.into_iter().map(|c| (c.id.clone(), c)).collect();

        let to_fetch: BTreeSet<RecordId> = mapped
            .into_iter()
            .chain(groups.iter().map(|g| g.child_id.clone()))
            .filter(|id| !children.contains_key(id))
            .collect();
        for child in self.gateway.get_children(&to_fetch).await? {
            children.insert(child.id.clone(), child);
        }

        let selected_id = ctx
            .selected_child_id
            .clone()
            .filter(|id| children.contains_key(id));

        let logs = try_join_all(children.keys().map(|id| async move {
            self.gateway.get_logs(id).await.map(|logs| (id.clone(), logs))
        }));
        let growth = try_join_all(children.keys().map(|id| async move {
            self.gateway.get_growth_entries(id).await.map(|entries| (id.clone(), entries))
        }));
        let selected = self.fetch_selected(selected_id.as_ref());
        let (logs, growth, selected) = tokio::try_join!(logs, growth, selected)?;

        Ok(RemoteSnapshot {
            groups,
            children,
            logs,
            growth,
            selected,
        })
    }

    async fn fetch_selected(&self, child_id: Option<&RecordId>) -> Result<Option<SelectedChildSnapshot>, RemoteError> {
        let child_id = match child_id {
            Some(id) => id,
            None => return Ok(None),
        };
        let (checklist, vaccinations, health_records) = tokio::try_join!(
            self.gateway.get_checklist(child_id),
            self.gateway.get_vaccinations(child_id),
            self.gateway.get_health_records(child_id),
        )?;
        Ok(Some(SelectedChildSnapshot {
            child_id: child_id.clone(),
            checklist,
            vaccinations,
            health_records,
        }))
    }

    async fn apply_snapshot(&self, ctx: &SessionContext, snapshot: RemoteSnapshot) -> Result<SyncReport> {
        let RemoteSnapshot {
            groups,
            children,
            logs,
            growth,
            selected,
        } = snapshot;

        let report_groups = groups.len();
        self.store
            .modify::<FamilyGroups, _, _>(move |local| {
                for group in groups {
                    local.insert(group.family_group_id.to_string(), group);
                }
            })
            .await?;

        let child_ids: Vec<RecordId> = children.keys().cloned().collect();
        let report_children = children.len();
        self.store
            .modify::<Children, _, _>(move |local| {
                for (id, child) in children {
                    local.insert(id.to_string(), child);
                }
            })
            .await?;

        self.store
            .put::<UserChildren, _>(ctx.user_id(), child_ids)
            .await?;

        let report_logs = self
            .store
            .modify::<Logs, _, _>(move |local| {
                *local = merge_child_scoped(std::mem::take(local), logs);
                local.sort_by(|a, b| b.id.cmp(&a.id));
                local.len()
            })
            .await?;

        let report_growth = self
            .store
            .modify::<Growth, _, _>(move |local| {
                *local = merge_child_scoped(std::mem::take(local), growth);
                local.sort_by(|a, b| a.id.cmp(&b.id));
                local.len()
            })
            .await?;

        if let Some(selected) = selected {
            let key = selected.child_id.to_string();

            let checklist_key = key.clone();
            let checklist = selected.checklist;
            self.store
                .modify::<Checklists, _, _>(move |all| {
                    let local = all.remove(&checklist_key).unwrap_or_default();
                    all.insert(checklist_key, spread_over(local, checklist));
                })
                .await?;

            let vaccination_key = key.clone();
            let vaccinations = selected.vaccinations;
            self.store
                .modify::<Vaccinations, _, _>(move |all| {
                    let local = all.remove(&vaccination_key).unwrap_or_default();
                    all.insert(vaccination_key, spread_over(local, vaccinations));
                })
                .await?;

            let health = selected.health_records;
            self.store
                .modify::<HealthRecords, _, _>(move |all| {
                    let local = all.remove(&key).unwrap_or_default();
                    all.insert(key, union_by_id(health, local));
                })
                .await?;
        }

        Ok(SyncReport {
            pushed: 0,
            groups: report_groups,
            children: report_children,
            logs: report_logs,
            growth_entries: report_growth,
        })
    }
}

/// Union each fetched child's records with the local ones; records of
/// children that were not fetched stay as they are
fn merge_child_scoped<T>(local: Vec<T>, remote: Vec<(RecordId, Vec<T>)>) -> Vec<T>
where
    T: ChildScoped + Identified,
{
    let mut by_child: HashMap<RecordId, Vec<T>> = HashMap::new();
    let mut untouched = Vec::new();
    let fetched: BTreeSet<&RecordId> = remote.iter().map(|(id, _)| id).collect();

    for record in local {
        if fetched.contains(record.child_id()) {
            by_child.entry(record.child_id().clone()).or_default().push(record);
        } else {
            untouched.push(record);
        }
    }

    for (child_id, records) in remote {
        let local_for_child = by_child.remove(&child_id).unwrap_or_default();
        untouched.extend(union_by_id(records, local_for_child));
    }
    untouched
}
