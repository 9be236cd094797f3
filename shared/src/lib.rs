use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Opaque record identifier.
///
/// Ids are timestamp-derived ("1718000000000") or prefixed ("hr_1718000000000",
/// "fg_1718000000000"). Older writers stored numeric ids, so a JSON number is
/// accepted on input and normalised to its string form; equality is always by
/// string form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Numeric value of the id when it is a plain integer
    pub fn as_number(&self) -> Option<i64> {
        self.0.parse::<i64>().ok()
    }
}

/// Total order over id strings: integer ids first in numeric order, then
/// every other id in lexicographic order. Equal numbers with different
/// spellings ("7", "07") are told apart by their text.
pub fn compare_id_strings(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

impl Ord for RecordId {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_id_strings(&self.0, &other.0)
    }
}

impl PartialOrd for RecordId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Signed(i64),
            Unsigned(u64),
            Float(f64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => RecordId(s),
            RawId::Signed(n) => RecordId(n.to_string()),
            RawId::Unsigned(n) => RecordId(n.to_string()),
            RawId::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => RecordId(format!("{}", f as i64)),
            RawId::Float(f) => RecordId(f.to_string()),
        })
    }
}

// --- Users ---

/// A registered user as persisted locally and remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredUser {
    pub user_id: String,
    pub password_hash: String,
    pub display_name: String,
    pub created_at: String, // RFC 3339 timestamp
    /// Set locally when an offline registration lost the id to another user
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub registration_conflict: bool,
}

/// Public projection of a user, without credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: String,
    pub created_at: String,
}

impl From<&StoredUser> for UserProfile {
    fn from(user: &StoredUser) -> Self {
        Self {
            user_id: user.user_id.clone(),
            display_name: user.display_name.clone(),
            created_at: user.created_at.clone(),
        }
    }
}

/// Identity handed over by the authentication collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    pub user_id: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterUserResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub user_id: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub user: Option<UserProfile>,
    /// Whether the post-login pull from the remote store succeeded
    pub synced: bool,
}

// --- Children ---

/// A child profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Child {
    pub id: RecordId,
    pub owner_user_id: String,
    pub name: String,
    pub birth_date: String, // ISO 8601 date format (YYYY-MM-DD)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,
    pub created_at: String, // RFC 3339 timestamp
    pub updated_at: String, // RFC 3339 timestamp
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateChildRequest {
    pub name: String,
    pub birth_date: String, // ISO 8601 date format (YYYY-MM-DD)
    #[serde(default)]
    pub photo_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateChildRequest {
    pub name: Option<String>,
    pub birth_date: Option<String>,
    pub photo_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildResponse {
    pub child: Child,
    pub success_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildListResponse {
    pub children: Vec<Child>,
    pub selected_child_id: Option<RecordId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectChildRequest {
    pub child_id: RecordId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectChildResponse {
    pub success: bool,
    pub selected_child_id: Option<RecordId>,
    pub synced: bool,
}

// --- Observation logs ---

/// Age of the child at the moment a log was written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeAtRecord {
    pub months: u32,
    pub days: u32,
    pub total_days: u32,
}

impl AgeAtRecord {
    pub fn label(&self) -> String {
        format!("{} months {} days", self.months, self.days)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationLog {
    pub id: RecordId,
    pub child_id: RecordId,
    pub text: String,
    /// Structured annotation produced by the assistant, stored verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<Value>,
    pub created_at: String,
    #[serde(default)]
    pub age_at_record: AgeAtRecord,
    /// Writer of the log; absent on logs from older clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveLogRequest {
    pub text: String,
    #[serde(default)]
    pub ai_analysis: Option<Value>,
}

/// Logs of one month of age, used by the timeline view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMonthGroup {
    pub months: u32,
    pub label: String,
    pub logs: Vec<ObservationLog>,
}

/// A log another family member wrote since the reader last looked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogNotification {
    pub id: String,
    pub sender_name: String,
    pub preview: String,
    pub created_at: String,
    pub log: ObservationLog,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationsResponse {
    pub unread_count: usize,
    pub notifications: Vec<LogNotification>,
}

// --- Growth ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthEntry {
    pub id: RecordId,
    pub child_id: RecordId,
    /// Age in months at measurement
    pub months: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    pub date: String, // YYYY-MM-DD
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveGrowthRequest {
    pub months: u32,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub date: String,
}

// --- Checklist & vaccination ---

/// Milestone item id -> checked
pub type ChecklistState = BTreeMap<String, bool>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VaccinationDose {
    pub completed: bool,
    #[serde(default)]
    pub completed_date: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// "{vaccine_id}_{dose}" -> dose state
pub type VaccinationState = BTreeMap<String, VaccinationDose>;

pub fn vaccination_key(vaccine_id: &str, dose: u32) -> String {
    format!("{}_{}", vaccine_id, dose)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToggleChecklistRequest {
    pub item_id: String,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToggleVaccinationRequest {
    pub vaccine_id: String,
    pub dose: u32,
    pub completed: bool,
    pub completed_date: Option<String>,
}

// --- Health records ---

/// Health record category. The set is open: categories written by other
/// clients are carried through unchanged as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HealthCategory {
    Allergy,
    Illness,
    Hospitalization,
    Supplement,
    Other(String),
}

impl HealthCategory {
    pub fn as_str(&self) -> &str {
        match self {
            HealthCategory::Allergy => "allergy",
            HealthCategory::Illness => "illness",
            HealthCategory::Hospitalization => "hospitalization",
            HealthCategory::Supplement => "supplement",
            HealthCategory::Other(name) => name,
        }
    }
}

impl From<&str> for HealthCategory {
    fn from(name: &str) -> Self {
        match name {
            "allergy" => HealthCategory::Allergy,
            "illness" => HealthCategory::Illness,
            "hospitalization" => HealthCategory::Hospitalization,
            "supplement" => HealthCategory::Supplement,
            other => HealthCategory::Other(other.to_string()),
        }
    }
}

impl fmt::Display for HealthCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for HealthCategory {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HealthCategory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(HealthCategory::from(name.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub id: RecordId,
    pub child_id: RecordId,
    pub category: HealthCategory,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Category-specific fields (allergen, severity, hospital, dosage, ...)
    #[serde(default, flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecordRequest {
    pub category: HealthCategory,
    #[serde(default)]
    pub details: Map<String, Value>,
}

// --- Family groups ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Member,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyMember {
    pub user_id: String,
    pub name: String,
    pub role: MemberRole,
    pub joined_at: String,
}

/// Sharing unit: exactly one group per child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyGroup {
    pub family_group_id: RecordId,
    pub child_id: RecordId,
    pub invite_code: String,
    pub created_by: String,
    pub created_at: String,
    #[serde(default)]
    pub members: Vec<FamilyMember>,
}

impl FamilyGroup {
    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    pub fn owner(&self) -> Option<&FamilyMember> {
        self.members.iter().find(|m| m.role == MemberRole::Owner)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinFamilyRequest {
    pub invite_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinFamilyResponse {
    pub success: bool,
    pub message: String,
    pub family_group: Option<FamilyGroup>,
}

impl JoinFamilyResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            family_group: None,
        }
    }
}

// --- Sync ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub success: bool,
    pub message: String,
    pub children: usize,
    pub logs: usize,
    pub growth_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatusResponse {
    pub pending_mutations: usize,
    pub dead_letters: usize,
}
