//! Conflict resolution used when remote data is applied over the local cache.

use shared::RecordId;
use std::collections::{BTreeMap, HashSet};

use crate::storage::collections::Identified;

/// Union by id: every remote record as-is, plus local records the remote
/// does not know yet (unpushed writes).
pub fn union_by_id<T>(remote: Vec<T>, local: Vec<T>) -> Vec<T>
where
    T: Identified,
{
    let remote_ids: HashSet<RecordId> = remote.iter().map(|r| r.record_id().clone()).collect();
    let mut merged = remote;
    merged.extend(local.into_iter().filter(|r| !remote_ids.contains(r.record_id())));
    merged
}

/// Local map with the remote map spread over it: remote wins per key
pub fn spread_over<V>(local: BTreeMap<String, V>, remote: BTreeMap<String, V>) -> BTreeMap<String, V> {
    let mut merged = local;
    merged.extend(remote);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{AgeAtRecord, ObservationLog};

    fn log(id: &str, text: &str) -> ObservationLog {
        ObservationLog {
            id: RecordId::from(id),
            child_id: RecordId::from("1"),
            text: text.to_string(),
            ai_analysis: None,
            created_at: String::new(),
            age_at_record: AgeAtRecord::default(),
            author_id: None,
            author_name: None,
        }
    }

    #[test]
    fn test_union_keeps_local_only_and_prefers_remote() {
        let remote = vec![log("1", "remote one"), log("2", "remote two")];
        let local = vec![log("2", "local two"), log("3", "local three")];

        let merged = union_by_id(remote, local);
        let texts: Vec<&str> = merged.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["remote one", "remote two", "local three"]);
    }

    #[test]
    fn test_union_is_idempotent() {
        let remote = vec![log("1", "a"), log("2", "b")];
        let once = union_by_id(remote.clone(), vec![log("3", "c")]);
        let twice = union_by_id(remote, once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_spread_remote_wins_per_key() {
        let local = BTreeMap::from([("smile".to_string(), true), ("crawl".to_string(), true)]);
        let remote = BTreeMap::from([("crawl".to_string(), false), ("walk".to_string(), true)]);

        let merged = spread_over(local, remote);
        assert_eq!(merged.get("smile"), Some(&true));
        assert_eq!(merged.get("crawl"), Some(&false));
        assert_eq!(merged.get("walk"), Some(&true));
    }
}
