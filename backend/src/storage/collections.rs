//! Local collections and their canonical shapes.
//!
//! Each marker type names one key in the local medium and the single shape
//! stored under it. Values that do not decode as that shape are repaired by
//! [`super::RecordStore`]; `salvage` lets a collection recover what it can
//! from a legacy or partially corrupt value before falling back to empty.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use shared::{
    Child, ChecklistState, FamilyGroup, GrowthEntry, HealthRecord, ObservationLog, RecordId,
    StoredUser, VaccinationState,
};
use std::collections::BTreeMap;

use super::remote::OutboxEntry;

pub trait Collection {
    type Value: Serialize + DeserializeOwned + Default + Send;

    /// Key in the local medium
    const KEY: &'static str;

    /// Best-effort recovery of a value that failed to decode
    fn salvage(_raw: Value) -> Option<Self::Value> {
        None
    }
}

/// Where `append` places a new record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Prepend,
    Append,
}

/// A collection stored as a list of identified records
pub trait ListCollection: Collection {
    const PLACEMENT: Placement;
    const ID_PREFIX: &'static str = "";
}

/// Records carrying their own id
pub trait Identified {
    fn record_id(&self) -> &RecordId;
    fn set_record_id(&mut self, id: RecordId);
}

/// Records that belong to one child
pub trait ChildScoped {
    fn child_id(&self) -> &RecordId;
}

macro_rules! identified {
    ($($ty:ty),*) => {
        $(
            impl Identified for $ty {
                fn record_id(&self) -> &RecordId {
                    &self.id
                }

                fn set_record_id(&mut self, id: RecordId) {
                    self.id = id;
                }
            }
        )*
    };
}

identified!(ObservationLog, GrowthEntry, HealthRecord, OutboxEntry);

impl ChildScoped for ObservationLog {
    fn child_id(&self) -> &RecordId {
        &self.child_id
    }
}

impl ChildScoped for GrowthEntry {
    fn child_id(&self) -> &RecordId {
        &self.child_id
    }
}

impl ChildScoped for HealthRecord {
    fn child_id(&self) -> &RecordId {
        &self.child_id
    }
}

/// Keep the entries of an object that decode, drop the rest
fn salvage_map<E: DeserializeOwned>(raw: Value) -> Option<BTreeMap<String, E>> {
    match raw {
        Value::Object(entries) => Some(
            entries
                .into_iter()
                .filter_map(|(key, value)| serde_json::from_value(value).ok().map(|v| (key, v)))
                .collect(),
        ),
        _ => None,
    }
}

/// Keep the elements that decode; an object's values are treated as the list
fn salvage_list<E: DeserializeOwned>(raw: Value) -> Option<Vec<E>> {
    let items: Vec<Value> = match raw {
        Value::Array(items) => items,
        Value::Object(entries) => entries.into_iter().map(|(_, v)| v).collect(),
        _ => return None,
    };
    Some(items.into_iter().filter_map(|v| serde_json::from_value(v).ok()).collect())
}

pub struct Users;
impl Collection for Users {
    type Value = BTreeMap<String, StoredUser>;
    const KEY: &'static str = "babylog_users";

    fn salvage(raw: Value) -> Option<Self::Value> {
        salvage_map(raw)
    }
}

pub struct Children;
impl Collection for Children {
    type Value = BTreeMap<String, Child>;
    const KEY: &'static str = "babylog_children";

    /// Early writers stored children as an array
    fn salvage(raw: Value) -> Option<Self::Value> {
        match raw {
            Value::Array(_) => salvage_list::<Child>(raw)
                .map(|children| children.into_iter().map(|c| (c.id.to_string(), c)).collect()),
            other => salvage_map(other),
        }
    }
}

pub struct UserChildren;
impl Collection for UserChildren {
    type Value = BTreeMap<String, Vec<RecordId>>;
    const KEY: &'static str = "babylog_user_children";

    fn salvage(raw: Value) -> Option<Self::Value> {
        salvage_map(raw)
    }
}

pub struct SelectedChildren;
impl Collection for SelectedChildren {
    type Value = BTreeMap<String, RecordId>;
    const KEY: &'static str = "babylog_selected_child";

    fn salvage(raw: Value) -> Option<Self::Value> {
        salvage_map(raw)
    }
}

/// Per-user time (RFC 3339) up to which family logs count as read
pub struct LastRead;
impl Collection for LastRead {
    type Value = BTreeMap<String, String>;
    const KEY: &'static str = "babylog_last_read";

    fn salvage(raw: Value) -> Option<Self::Value> {
        salvage_map(raw)
    }
}

pub struct Logs;
impl Collection for Logs {
    type Value = Vec<ObservationLog>;
    const KEY: &'static str = "babylog_logs";

    fn salvage(raw: Value) -> Option<Self::Value> {
        salvage_list(raw)
    }
}
impl ListCollection for Logs {
    const PLACEMENT: Placement = Placement::Prepend;
}

pub struct Growth;
impl Collection for Growth {
    type Value = Vec<GrowthEntry>;
    const KEY: &'static str = "babylog_growth";

    fn salvage(raw: Value) -> Option<Self::Value> {
        salvage_list(raw)
    }
}
impl ListCollection for Growth {
    const PLACEMENT: Placement = Placement::Append;
}

pub struct Checklists;
impl Collection for Checklists {
    type Value = BTreeMap<String, ChecklistState>;
    const KEY: &'static str = "babylog_checklist";

    fn salvage(raw: Value) -> Option<Self::Value> {
        salvage_map(raw)
    }
}

pub struct Vaccinations;
impl Collection for Vaccinations {
    type Value = BTreeMap<String, VaccinationState>;
    const KEY: &'static str = "babylog_vaccination";

    fn salvage(raw: Value) -> Option<Self::Value> {
        salvage_map(raw)
    }
}

pub struct HealthRecords;
impl Collection for HealthRecords {
    type Value = BTreeMap<String, Vec<HealthRecord>>;
    const KEY: &'static str = "babylog_health_records";

    fn salvage(raw: Value) -> Option<Self::Value> {
        match raw {
            Value::Object(entries) => Some(
                entries
                    .into_iter()
                    .filter_map(|(child_id, records)| salvage_list(records).map(|r| (child_id, r)))
                    .collect(),
            ),
            _ => None,
        }
    }
}

pub struct FamilyGroups;
impl Collection for FamilyGroups {
    type Value = BTreeMap<String, FamilyGroup>;
    const KEY: &'static str = "babylog_family_groups";

    fn salvage(raw: Value) -> Option<Self::Value> {
        salvage_map(raw)
    }
}

pub struct OutboxQueue;
impl Collection for OutboxQueue {
    type Value = Vec<OutboxEntry>;
    const KEY: &'static str = "babylog_outbox";

    fn salvage(raw: Value) -> Option<Self::Value> {
        salvage_list(raw)
    }
}
impl ListCollection for OutboxQueue {
    const PLACEMENT: Placement = Placement::Append;
    const ID_PREFIX: &'static str = "ob_";
}

pub struct DeadLetters;
impl Collection for DeadLetters {
    type Value = Vec<OutboxEntry>;
    const KEY: &'static str = "babylog_outbox_dead";
}
impl ListCollection for DeadLetters {
    const PLACEMENT: Placement = Placement::Append;
    const ID_PREFIX: &'static str = "ob_";
}
