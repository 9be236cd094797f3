//! Record-level access to the remote document store.
//!
//! Child-scoped records live under `children/{child_id}/...` so every member
//! of a family group reads and writes the same documents. Documents that do
//! not decode are skipped with a warning rather than failing the read.

use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use shared::{
    ChecklistState, Child, FamilyGroup, FamilyMember, GrowthEntry, HealthRecord, ObservationLog,
    RecordId, StoredUser, VaccinationDose, VaccinationState,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Mutation, Query, RemoteError};
use crate::storage::traits::DocumentStore;

/// Escape a path segment so ids cannot introduce extra levels
fn segment(raw: &str) -> String {
    raw.replace('%', "%25").replace('/', "%2F")
}

fn user_path(user_id: &str) -> String {
    format!("users/{}", segment(user_id))
}

fn child_path(child_id: &RecordId) -> String {
    format!("children/{}", segment(child_id.as_str()))
}

fn logs_collection(child_id: &RecordId) -> String {
    format!("{}/logs", child_path(child_id))
}

fn growth_collection(child_id: &RecordId) -> String {
    format!("{}/growth", child_path(child_id))
}

fn checklist_path(child_id: &RecordId) -> String {
    format!("{}/status/checklist", child_path(child_id))
}

fn vaccination_path(child_id: &RecordId) -> String {
    format!("{}/status/vaccination", child_path(child_id))
}

fn health_path(child_id: &RecordId) -> String {
    format!("{}/health/records", child_path(child_id))
}

fn group_path(family_group_id: &RecordId) -> String {
    format!("family_groups/{}", segment(family_group_id.as_str()))
}

fn decode<T: DeserializeOwned>(doc: Value, path: &str) -> Option<T> {
    match serde_json::from_value(doc) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Skipping undecodable remote document {}: {}", path, e);
            None
        }
    }
}

fn decode_all<T: DeserializeOwned>(docs: Vec<Value>, collection: &str) -> Vec<T> {
    docs.into_iter().filter_map(|doc| decode(doc, collection)).collect()
}

/// Field of a wrapper document (`{items}` / `{records}`), or the empty value
fn decode_field<T: DeserializeOwned + Default>(doc: Option<Value>, field: &str, path: &str) -> T {
    doc.and_then(|mut d| d.get_mut(field).map(Value::take))
        .and_then(|v| decode(v, path))
        .unwrap_or_default()
}

fn encode<T: Serialize>(value: &T) -> Result<Value, RemoteError> {
    Ok(serde_json::to_value(value)?)
}

fn malformed(path: &str, field: &str) -> RemoteError {
    RemoteError::Decode(format!("{} has a malformed {} field", path, field))
}

/// Object field of a wrapper document, created when absent
fn object_field<'a>(
    doc: &'a mut Map<String, Value>,
    field: &str,
    path: &str,
) -> Result<&'a mut Map<String, Value>, RemoteError> {
    let slot = doc.entry(field).or_insert_with(|| Value::Object(Map::new()));
    if slot.is_null() {
        *slot = Value::Object(Map::new());
    }
    slot.as_object_mut().ok_or_else(|| malformed(path, field))
}

/// Array field of a wrapper document, created when absent
fn array_field<'a>(
    doc: &'a mut Map<String, Value>,
    field: &str,
    path: &str,
) -> Result<&'a mut Vec<Value>, RemoteError> {
    let slot = doc.entry(field).or_insert_with(|| Value::Array(Vec::new()));
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut().ok_or_else(|| malformed(path, field))
}

fn raw_record_id(raw: &Value) -> Option<RecordId> {
    raw.get("id").and_then(|id| serde_json::from_value(id.clone()).ok())
}

#[derive(Clone)]
pub struct RemoteGateway {
    store: Arc<dyn DocumentStore>,
}

impl RemoteGateway {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    // --- users ---

    pub async fn get_user(&self, user_id: &str) -> Result<Option<StoredUser>, RemoteError> {
        let path = user_path(user_id);
        Ok(self.store.get(&path).await?.and_then(|doc| decode(doc, &path)))
    }

    /// Create a user document; an existing user is reported as `UserExists`
    pub async fn create_user(&self, user: &StoredUser) -> Result<(), RemoteError> {
        let path = user_path(&user.user_id);
        if self.store.get(&path).await?.is_some() {
            return Err(RemoteError::UserExists(user.user_id.clone()));
        }
        self.store.set(&path, encode(user)?, false).await
    }

    pub async fn save_user_children(&self, user_id: &str, child_ids: &[RecordId]) -> Result<(), RemoteError> {
        let doc = json!({ "user_id": user_id, "child_ids": child_ids });
        self.store.set(&user_path(user_id), doc, true).await
    }

    pub async fn get_user_children(&self, user_id: &str) -> Result<Vec<RecordId>, RemoteError> {
        let path = user_path(user_id);
        let doc = self.store.get(&path).await?;
        Ok(decode_field(doc, "child_ids", &path))
    }

    // --- children ---

    pub async fn save_child(&self, child: &Child) -> Result<(), RemoteError> {
        self.store.set(&child_path(&child.id), encode(child)?, true).await
    }

    pub async fn get_child(&self, child_id: &RecordId) -> Result<Option<Child>, RemoteError> {
        let path = child_path(child_id);
        Ok(self.store.get(&path).await?.and_then(|doc| decode(doc, &path)))
    }

    /// Children whose documents exist; missing ids are dropped
    pub async fn get_children(&self, child_ids: &BTreeSet<RecordId>) -> Result<Vec<Child>, RemoteError> {
        let children = try_join_all(child_ids.iter().map(|id| self.get_child(id))).await?;
        Ok(children.into_iter().flatten().collect())
    }

    pub async fn get_owned_children(&self, user_id: &str) -> Result<Vec<Child>, RemoteError> {
        let docs = self
            .store
            .query("children", &Query::new().where_eq("owner_user_id", user_id))
            .await?;
        Ok(decode_all(docs, "children"))
    }

    /// Children of every family group the user belongs to
    pub async fn get_shared_children(&self, user_id: &str) -> Result<Vec<Child>, RemoteError> {
        let groups = self.get_family_groups_for_user(user_id).await?;
        let ids: BTreeSet<RecordId> = groups.into_iter().map(|g| g.child_id).collect();
        self.get_children(&ids).await
    }

    /// Remove a child and every document scoped to it
    pub async fn delete_child_cascade(&self, child_id: &RecordId) -> Result<(), RemoteError> {
        info!("Deleting remote data for child {}", child_id);

        let logs_path = logs_collection(child_id);
        let growth_path = growth_collection(child_id);
        let all = Query::new();
        let by_child = Query::new().where_eq("child_id", child_id.as_str());
        let (logs, growth, groups) = tokio::try_join!(
            self.store.query(&logs_path, &all),
            self.store.query(&growth_path, &all),
            self.store.query("family_groups", &by_child),
        )?;

        let mut paths = Vec::new();
        for (collection, docs) in [(&logs_path, logs), (&growth_path, growth)] {
            for doc in docs {
                if let Some(id) = doc.get("id").and_then(|v| decode::<RecordId>(v.clone(), collection)) {
                    paths.push(format!("{}/{}", collection, segment(id.as_str())));
                }
            }
        }
        for group in decode_all::<FamilyGroup>(groups, "family_groups") {
            paths.push(group_path(&group.family_group_id));
        }
        paths.push(checklist_path(child_id));
        paths.push(vaccination_path(child_id));
        paths.push(health_path(child_id));

        try_join_all(paths.iter().map(|path| self.store.delete(path))).await?;

        // The child document goes last so a partial failure can be retried
        self.store.delete(&child_path(child_id)).await
    }

    // --- logs & growth ---

    pub async fn save_log(&self, log: &ObservationLog) -> Result<(), RemoteError> {
        let path = format!("{}/{}", logs_collection(&log.child_id), segment(log.id.as_str()));
        self.store.set(&path, encode(log)?, false).await
    }

    pub async fn delete_log(&self, child_id: &RecordId, log_id: &RecordId) -> Result<(), RemoteError> {
        let path = format!("{}/{}", logs_collection(child_id), segment(log_id.as_str()));
        self.store.delete(&path).await
    }

    /// Logs of a child, newest first
    pub async fn get_logs(&self, child_id: &RecordId) -> Result<Vec<ObservationLog>, RemoteError> {
        let collection = logs_collection(child_id);
        let docs = self.store.query(&collection, &Query::new().order_by("id", true)).await?;
        Ok(decode_all(docs, &collection))
    }

    pub async fn save_growth_entry(&self, entry: &GrowthEntry) -> Result<(), RemoteError> {
        let path = format!("{}/{}", growth_collection(&entry.child_id), segment(entry.id.as_str()));
        self.store.set(&path, encode(entry)?, false).await
    }

    pub async fn delete_growth_entry(&self, child_id: &RecordId, entry_id: &RecordId) -> Result<(), RemoteError> {
        let path = format!("{}/{}", growth_collection(child_id), segment(entry_id.as_str()));
        self.store.delete(&path).await
    }

    /// Growth entries of a child, oldest first
    pub async fn get_growth_entries(&self, child_id: &RecordId) -> Result<Vec<GrowthEntry>, RemoteError> {
        let collection = growth_collection(child_id);
        let docs = self.store.query(&collection, &Query::new().order_by("id", false)).await?;
        Ok(decode_all(docs, &collection))
    }

    // --- per-child status documents ---

    pub async fn get_checklist(&self, child_id: &RecordId) -> Result<ChecklistState, RemoteError> {
        let path = checklist_path(child_id);
        let doc = self.store.get(&path).await?;
        Ok(decode_field(doc, "items", &path))
    }

    pub async fn get_vaccinations(&self, child_id: &RecordId) -> Result<VaccinationState, RemoteError> {
        let path = vaccination_path(child_id);
        let doc = self.store.get(&path).await?;
        Ok(decode_field(doc, "records", &path))
    }

    pub async fn get_health_records(&self, child_id: &RecordId) -> Result<Vec<HealthRecord>, RemoteError> {
        let path = health_path(child_id);
        let doc = self.store.get(&path).await?;
        let raw: Vec<Value> = decode_field(doc, "records", &path);
        Ok(decode_all(raw, &path))
    }

    /// Raw wrapper document for a read-merge-write. Entries are edited as
    /// JSON so ones this build cannot decode are written back untouched; a
    /// document of the wrong shape is refused instead of replaced.
    async fn load_wrapper(&self, path: &str) -> Result<Map<String, Value>, RemoteError> {
        match self.store.get(path).await? {
            None => Ok(Map::new()),
            Some(Value::Object(doc)) => Ok(doc),
            Some(_) => Err(RemoteError::Decode(format!("{} is not an object", path))),
        }
    }

    pub async fn set_checklist_item(&self, child_id: &RecordId, item_id: &str, checked: bool) -> Result<(), RemoteError> {
        let path = checklist_path(child_id);
        let mut doc = self.load_wrapper(&path).await?;
        object_field(&mut doc, "items", &path)?.insert(item_id.to_string(), Value::Bool(checked));
        self.store.set(&path, Value::Object(doc), false).await
    }

    pub async fn set_vaccination_dose(&self, child_id: &RecordId, key: &str, dose: &VaccinationDose) -> Result<(), RemoteError> {
        let path = vaccination_path(child_id);
        let mut doc = self.load_wrapper(&path).await?;
        object_field(&mut doc, "records", &path)?.insert(key.to_string(), encode(dose)?);
        self.store.set(&path, Value::Object(doc), false).await
    }

    /// Insert or replace one health record inside the per-child document
    pub async fn upsert_health_record(&self, record: &HealthRecord) -> Result<(), RemoteError> {
        let path = health_path(&record.child_id);
        let mut doc = self.load_wrapper(&path).await?;
        let records = array_field(&mut doc, "records", &path)?;
        let encoded = encode(record)?;
        match records
            .iter_mut()
            .find(|raw| raw_record_id(raw).as_ref() == Some(&record.id))
        {
            Some(existing) => *existing = encoded,
            None => records.push(encoded),
        }
        self.store.set(&path, Value::Object(doc), false).await
    }

    pub async fn delete_health_record(&self, child_id: &RecordId, record_id: &RecordId) -> Result<(), RemoteError> {
        let path = health_path(child_id);
        let mut doc = self.load_wrapper(&path).await?;
        array_field(&mut doc, "records", &path)?.retain(|raw| raw_record_id(raw).as_ref() != Some(record_id));
        self.store.set(&path, Value::Object(doc), false).await
    }

    // --- family groups ---

    pub async fn save_family_group(&self, group: &FamilyGroup) -> Result<(), RemoteError> {
        self.store.set(&group_path(&group.family_group_id), encode(group)?, false).await
    }

    pub async fn get_family_group(&self, family_group_id: &RecordId) -> Result<Option<FamilyGroup>, RemoteError> {
        let path = group_path(family_group_id);
        Ok(self.store.get(&path).await?.and_then(|doc| decode(doc, &path)))
    }

    pub async fn find_family_group_by_invite_code(&self, invite_code: &str) -> Result<Option<FamilyGroup>, RemoteError> {
        let docs = self
            .store
            .query("family_groups", &Query::new().where_eq("invite_code", invite_code))
            .await?;
        Ok(decode_all::<FamilyGroup>(docs, "family_groups").into_iter().next())
    }

    /// Groups listing the user as a member
    pub async fn get_family_groups_for_user(&self, user_id: &str) -> Result<Vec<FamilyGroup>, RemoteError> {
        let docs = self.store.query("family_groups", &Query::new()).await?;
        Ok(decode_all::<FamilyGroup>(docs, "family_groups")
            .into_iter()
            .filter(|g| g.has_member(user_id))
            .collect())
    }

    /// Read-merge-write of the member list; an existing member is left as is
    pub async fn add_family_member(&self, family_group_id: &RecordId, member: &FamilyMember) -> Result<(), RemoteError> {
        let mut group = self.get_family_group(family_group_id).await?.ok_or_else(|| RemoteError::Http {
            status: 404,
            body: format!("family group {} not found", family_group_id),
        })?;

        if group.has_member(&member.user_id) {
            debug!("{} already in group {}", member.user_id, family_group_id);
            return Ok(());
        }
        group.members.push(member.clone());
        self.save_family_group(&group).await
    }

    pub async fn delete_family_group(&self, family_group_id: &RecordId) -> Result<(), RemoteError> {
        self.store.delete(&group_path(family_group_id)).await
    }

    /// Push one queued mutation
    pub async fn apply(&self, mutation: &Mutation) -> Result<(), RemoteError> {
        match mutation {
            Mutation::CreateUser { user } => self.create_user(user).await,
            Mutation::SaveUserChildren { user_id, child_ids } => {
                self.save_user_children(user_id, child_ids).await
            }
            Mutation::SaveChild { child } => self.save_child(child).await,
            Mutation::DeleteChild { child_id } => self.delete_child_cascade(child_id).await,
            Mutation::SaveLog { log } => self.save_log(log).await,
            Mutation::DeleteLog { child_id, log_id } => self.delete_log(child_id, log_id).await,
            Mutation::SaveGrowthEntry { entry } => self.save_growth_entry(entry).await,
            Mutation::DeleteGrowthEntry { child_id, entry_id } => {
                self.delete_growth_entry(child_id, entry_id).await
            }
            Mutation::SetChecklistItem { child_id, item_id, checked } => {
                self.set_checklist_item(child_id, item_id, *checked).await
            }
            Mutation::SetVaccinationDose { child_id, key, dose } => {
                self.set_vaccination_dose(child_id, key, dose).await
            }
            Mutation::UpsertHealthRecord { record } => self.upsert_health_record(record).await,
            Mutation::DeleteHealthRecord { child_id, record_id } => {
                self.delete_health_record(child_id, record_id).await
            }
            Mutation::SaveFamilyGroup { group } => self.save_family_group(group).await,
            Mutation::AddFamilyMember { family_group_id, member } => {
                self.add_family_member(family_group_id, member).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::remote::MemoryDocumentStore;
    use shared::{AgeAtRecord, HealthCategory, MemberRole};

    fn setup() -> (Arc<MemoryDocumentStore>, RemoteGateway) {
        let store = Arc::new(MemoryDocumentStore::new());
        (store.clone(), RemoteGateway::new(store))
    }

    fn child(id: &str, owner: &str) -> Child {
        Child {
            id: RecordId::from(id),
            owner_user_id: owner.to_string(),
            name: format!("child {}", id),
            birth_date: "2024-01-15".to_string(),
            photo_ref: None,
            created_at: "2024-01-15T00:00:00Z".to_string(),
            updated_at: "2024-01-15T00:00:00Z".to_string(),
        }
    }

    fn log(id: &str, child_id: &str) -> ObservationLog {
        ObservationLog {
            id: RecordId::from(id),
            child_id: RecordId::from(child_id),
            text: format!("log {}", id),
            ai_analysis: None,
            created_at: "2024-02-01T00:00:00Z".to_string(),
            age_at_record: AgeAtRecord::default(),
            author_id: None,
            author_name: None,
        }
    }

    fn group(id: &str, child_id: &str, code: &str, members: &[&str]) -> FamilyGroup {
        FamilyGroup {
            family_group_id: RecordId::from(id),
            child_id: RecordId::from(child_id),
            invite_code: code.to_string(),
            created_by: members[0].to_string(),
            created_at: "2024-01-15T00:00:00Z".to_string(),
            members: members
                .iter()
                .enumerate()
                .map(|(i, m)| FamilyMember {
                    user_id: m.to_string(),
                    name: m.to_string(),
                    role: if i == 0 { MemberRole::Owner } else { MemberRole::Member },
                    joined_at: "2024-01-15T00:00:00Z".to_string(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_user_children_mapping_merges_into_user_doc() {
        let (_, gateway) = setup();
        let user = StoredUser {
            user_id: "mom".to_string(),
            password_hash: "hash".to_string(),
            display_name: "Mom".to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
            registration_conflict: false,
        };
        gateway.create_user(&user).await.unwrap();
        gateway.save_user_children("mom", &[RecordId::from("1")]).await.unwrap();

        assert_eq!(gateway.get_user("mom").await.unwrap(), Some(user.clone()));
        assert_eq!(gateway.get_user_children("mom").await.unwrap(), vec![RecordId::from("1")]);

        // Creating again is refused softly
        assert!(matches!(gateway.create_user(&user).await, Err(RemoteError::UserExists(_))));
    }

    #[tokio::test]
    async fn test_logs_are_child_scoped_and_newest_first() {
        let (_, gateway) = setup();
        gateway.save_log(&log("100", "1")).await.unwrap();
        gateway.save_log(&log("200", "1")).await.unwrap();
        gateway.save_log(&log("300", "2")).await.unwrap();

        let logs = gateway.get_logs(&RecordId::from("1")).await.unwrap();
        assert_eq!(logs.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(), vec!["200", "100"]);
    }

    #[tokio::test]
    async fn test_shared_children_come_from_groups() {
        let (_, gateway) = setup();
        gateway.save_child(&child("1", "mom")).await.unwrap();
        gateway.save_child(&child("2", "mom")).await.unwrap();
        gateway.save_family_group(&group("fg_1", "1", "ABCDEF", &["mom", "dad"])).await.unwrap();
        gateway.save_family_group(&group("fg_2", "2", "GHJKLM", &["mom"])).await.unwrap();

        let shared = gateway.get_shared_children("dad").await.unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].id, RecordId::from("1"));

        assert_eq!(gateway.get_owned_children("mom").await.unwrap().len(), 2);
        assert!(gateway.get_owned_children("dad").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_documents_read_merge_write() {
        let (_, gateway) = setup();
        let child_id = RecordId::from("1");
        gateway.set_checklist_item(&child_id, "smile", true).await.unwrap();
        gateway.set_checklist_item(&child_id, "crawl", false).await.unwrap();

        let items = gateway.get_checklist(&child_id).await.unwrap();
        assert_eq!(items.get("smile"), Some(&true));
        assert_eq!(items.get("crawl"), Some(&false));

        let dose = VaccinationDose {
            completed: true,
            completed_date: Some("2024-03-01".to_string()),
            updated_at: None,
        };
        gateway.set_vaccination_dose(&child_id, "hepb_1", &dose).await.unwrap();
        assert_eq!(gateway.get_vaccinations(&child_id).await.unwrap().get("hepb_1"), Some(&dose));
    }

    #[tokio::test]
    async fn test_health_records_upsert_and_delete() {
        let (_, gateway) = setup();
        let mut record = HealthRecord {
            id: RecordId::from("hr_1"),
            child_id: RecordId::from("1"),
            category: HealthCategory::Illness,
            created_at: "2024-02-01T00:00:00Z".to_string(),
            updated_at: None,
            details: serde_json::Map::new(),
        };
        gateway.upsert_health_record(&record).await.unwrap();
        record.details.insert("name".to_string(), json!("cold"));
        gateway.upsert_health_record(&record).await.unwrap();

        let records = gateway.get_health_records(&RecordId::from("1")).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].details.get("name"), Some(&json!("cold")));

        gateway.delete_health_record(&RecordId::from("1"), &record.id).await.unwrap();
        assert!(gateway.get_health_records(&RecordId::from("1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_writes_keep_entries_they_cannot_decode() {
        let (store, gateway) = setup();
        let child_id = RecordId::from("1");
        store
            .set(
                "children/1/status/vaccination",
                json!({"records": {
                    "hepb_1": {"completed": true, "completed_date": "2024-01-16"},
                    "bcg_1": {"completed": "yes"}
                }}),
                false,
            )
            .await
            .unwrap();

        let dose = VaccinationDose {
            completed: true,
            completed_date: Some("2024-03-15".to_string()),
            updated_at: None,
        };
        gateway.set_vaccination_dose(&child_id, "dtap_1", &dose).await.unwrap();

        let doc = store.document("children/1/status/vaccination").await.unwrap();
        assert_eq!(doc["records"]["bcg_1"], json!({"completed": "yes"}));
        assert_eq!(doc["records"]["hepb_1"]["completed_date"], json!("2024-01-16"));
        assert_eq!(doc["records"]["dtap_1"]["completed"], json!(true));

        store
            .set(
                "children/1/health/records",
                json!({"records": [
                    {"id": "hr_1", "child_id": "1", "category": "dental",
                     "created_at": "2024-02-01T00:00:00Z", "tooth": "upper left"},
                    {"id": "hr_2", "broken": true},
                    {"id": "hr_3", "child_id": "1", "category": "illness",
                     "created_at": "2024-02-02T00:00:00Z"}
                ]}),
                false,
            )
            .await
            .unwrap();
        gateway
            .delete_health_record(&child_id, &RecordId::from("hr_3"))
            .await
            .unwrap();

        let doc = store.document("children/1/health/records").await.unwrap();
        let ids: Vec<&str> = doc["records"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|r| r["id"].as_str())
            .collect();
        assert_eq!(ids, vec!["hr_1", "hr_2"]);

        let records = gateway.get_health_records(&child_id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category, HealthCategory::Other("dental".to_string()));
        assert_eq!(records[0].details.get("tooth"), Some(&json!("upper left")));
    }

    #[tokio::test]
    async fn test_malformed_status_document_is_not_overwritten() {
        let (store, gateway) = setup();
        let child_id = RecordId::from("1");
        store
            .set("children/1/status/checklist", json!({"items": ["smile"]}), false)
            .await
            .unwrap();

        let result = gateway.set_checklist_item(&child_id, "crawl", true).await;
        assert!(matches!(result, Err(RemoteError::Decode(_))));
        assert_eq!(
            store.document("children/1/status/checklist").await,
            Some(json!({"items": ["smile"]}))
        );
    }

    #[tokio::test]
    async fn test_add_family_member_is_idempotent() {
        let (_, gateway) = setup();
        let g = group("fg_1", "1", "ABCDEF", &["mom"]);
        gateway.save_family_group(&g).await.unwrap();

        let dad = FamilyMember {
            user_id: "dad".to_string(),
            name: "Dad".to_string(),
            role: MemberRole::Member,
            joined_at: "2024-02-01T00:00:00Z".to_string(),
        };
        gateway.add_family_member(&g.family_group_id, &dad).await.unwrap();
        gateway.add_family_member(&g.family_group_id, &dad).await.unwrap();

        let stored = gateway.get_family_group(&g.family_group_id).await.unwrap().unwrap();
        assert_eq!(stored.members.len(), 2);

        let found = gateway.find_family_group_by_invite_code("ABCDEF").await.unwrap();
        assert_eq!(found.map(|g| g.family_group_id), Some(RecordId::from("fg_1")));
    }

    #[tokio::test]
    async fn test_delete_child_cascade_removes_scoped_documents() {
        let (store, gateway) = setup();
        let child_id = RecordId::from("1");
        gateway.save_child(&child("1", "mom")).await.unwrap();
        gateway.save_child(&child("2", "mom")).await.unwrap();
        gateway.save_log(&log("100", "1")).await.unwrap();
        gateway.save_log(&log("101", "2")).await.unwrap();
        gateway.set_checklist_item(&child_id, "smile", true).await.unwrap();
        gateway.save_family_group(&group("fg_1", "1", "ABCDEF", &["mom"])).await.unwrap();

        gateway.delete_child_cascade(&child_id).await.unwrap();

        let paths = store.paths().await;
        assert!(paths.iter().all(|p| !p.starts_with("children/1/") && p != "children/1"));
        assert!(!paths.contains(&"family_groups/fg_1".to_string()));
        // Other children untouched
        assert!(paths.contains(&"children/2".to_string()));
        assert!(paths.contains(&"children/2/logs/101".to_string()));
    }

    #[tokio::test]
    async fn test_undecodable_documents_are_skipped() {
        let (store, gateway) = setup();
        store.set("children/1/logs/5", json!({"garbage": true}), false).await.unwrap();
        gateway.save_log(&log("6", "1")).await.unwrap();

        let logs = gateway.get_logs(&RecordId::from("1")).await.unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_documents_read_empty() {
        let (_, gateway) = setup();
        let child_id = RecordId::from("404");
        assert!(gateway.get_child(&child_id).await.unwrap().is_none());
        assert!(gateway.get_logs(&child_id).await.unwrap().is_empty());
        assert!(gateway.get_checklist(&child_id).await.unwrap().is_empty());
        assert!(gateway.get_health_records(&child_id).await.unwrap().is_empty());
        assert!(gateway.get_user_children("nobody").await.unwrap().is_empty());
    }

    #[test]
    fn test_segments_are_escaped() {
        assert_eq!(user_path("a/b"), "users/a%2Fb");
    }
}
