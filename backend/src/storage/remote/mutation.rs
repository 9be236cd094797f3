use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    Child, FamilyGroup, FamilyMember, GrowthEntry, HealthRecord, ObservationLog, RecordId,
    StoredUser, VaccinationDose,
};

/// One remote write, recorded after the local write has completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    /// Registration made while the remote was unreachable; never overwrites
    CreateUser {
        user: StoredUser,
    },
    SaveUserChildren {
        user_id: String,
        child_ids: Vec<RecordId>,
    },
    SaveChild {
        child: Child,
    },
    DeleteChild {
        child_id: RecordId,
    },
    SaveLog {
        log: ObservationLog,
    },
    DeleteLog {
        child_id: RecordId,
        log_id: RecordId,
    },
    SaveGrowthEntry {
        entry: GrowthEntry,
    },
    DeleteGrowthEntry {
        child_id: RecordId,
        entry_id: RecordId,
    },
    SetChecklistItem {
        child_id: RecordId,
        item_id: String,
        checked: bool,
    },
    SetVaccinationDose {
        child_id: RecordId,
        key: String,
        dose: VaccinationDose,
    },
    UpsertHealthRecord {
        record: HealthRecord,
    },
    DeleteHealthRecord {
        child_id: RecordId,
        record_id: RecordId,
    },
    SaveFamilyGroup {
        group: FamilyGroup,
    },
    AddFamilyMember {
        family_group_id: RecordId,
        member: FamilyMember,
    },
}

impl Mutation {
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::CreateUser { .. } => "create_user",
            Mutation::SaveUserChildren { .. } => "save_user_children",
            Mutation::SaveChild { .. } => "save_child",
            Mutation::DeleteChild { .. } => "delete_child",
            Mutation::SaveLog { .. } => "save_log",
            Mutation::DeleteLog { .. } => "delete_log",
            Mutation::SaveGrowthEntry { .. } => "save_growth_entry",
            Mutation::DeleteGrowthEntry { .. } => "delete_growth_entry",
            Mutation::SetChecklistItem { .. } => "set_checklist_item",
            Mutation::SetVaccinationDose { .. } => "set_vaccination_dose",
            Mutation::UpsertHealthRecord { .. } => "upsert_health_record",
            Mutation::DeleteHealthRecord { .. } => "delete_health_record",
            Mutation::SaveFamilyGroup { .. } => "save_family_group",
            Mutation::AddFamilyMember { .. } => "add_family_member",
        }
    }
}

/// Durable queue entry for a pending mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: RecordId,
    pub mutation: Mutation,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    pub fn new(mutation: Mutation) -> Self {
        Self {
            id: RecordId::default(),
            mutation,
            attempts: 0,
            last_error: None,
            enqueued_at: Utc::now(),
            next_attempt_at: None,
        }
    }

    /// Whether the entry's backoff has elapsed
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map(|at| at <= now).unwrap_or(true)
    }
}
