use async_trait::async_trait;
use serde_json::Value;
use shared::compare_id_strings;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering as AtomicOrdering};
use tokio::sync::RwLock;

use super::{Query, RemoteError};
use crate::storage::traits::DocumentStore;

/// In-process document store.
///
/// Behaves like the hosted store for the operations the gateway uses.
/// `set_offline` makes every call fail as unreachable; `set_rejecting`
/// makes writes fail with a non-retryable HTTP status.
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<BTreeMap<String, Value>>,
    offline: AtomicBool,
    rejecting: AtomicU16,
    requests: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, AtomicOrdering::SeqCst);
    }

    /// Reject writes with `status`; `None` accepts them again
    pub fn set_rejecting(&self, status: Option<u16>) {
        self.rejecting.store(status.unwrap_or(0), AtomicOrdering::SeqCst);
    }

    /// Number of calls served or refused so far
    pub fn request_count(&self) -> usize {
        self.requests.load(AtomicOrdering::SeqCst)
    }

    /// Raw snapshot of a document
    pub async fn document(&self, path: &str) -> Option<Value> {
        self.docs.read().await.get(path).cloned()
    }

    /// Paths of every stored document
    pub async fn paths(&self) -> Vec<String> {
        self.docs.read().await.keys().cloned().collect()
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        self.requests.fetch_add(1, AtomicOrdering::SeqCst);
        if self.offline.load(AtomicOrdering::SeqCst) {
            return Err(RemoteError::Unavailable("remote store is offline".to_string()));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), RemoteError> {
        self.check_online()?;
        match self.rejecting.load(AtomicOrdering::SeqCst) {
            0 => Ok(()),
            status => Err(RemoteError::Http {
                status,
                body: "write rejected".to_string(),
            }),
        }
    }
}

/// Numbers numerically, id-like strings numerically when both parse
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => compare_id_strings(x, y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, RemoteError> {
        self.check_online()?;
        Ok(self.docs.read().await.get(path).cloned())
    }

    async fn set(&self, path: &str, document: Value, merge: bool) -> Result<(), RemoteError> {
        self.check_writable()?;
        let mut docs = self.docs.write().await;
        if merge {
            if let (Some(Value::Object(existing)), Value::Object(fields)) = (docs.get_mut(path), &document) {
                existing.extend(fields.clone());
                return Ok(());
            }
        }
        docs.insert(path.to_string(), document);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        self.check_writable()?;
        self.docs.write().await.remove(path);
        Ok(())
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Value>, RemoteError> {
        self.check_online()?;
        let prefix = format!("{}/", collection);
        let docs = self.docs.read().await;

        let mut matches: Vec<Value> = docs
            .iter()
            .filter(|(path, _)| {
                path.strip_prefix(&prefix)
                    .map(|rest| !rest.is_empty() && !rest.contains('/'))
                    .unwrap_or(false)
            })
            .map(|(_, doc)| doc)
            .filter(|doc| match &query.filter {
                Some(filter) => doc.get(&filter.field) == Some(&filter.equals),
                None => true,
            })
            .cloned()
            .collect();

        if let Some(order) = &query.order_by {
            matches.sort_by(|a, b| {
                let ordering = compare_values(a.get(&order.field), b.get(&order.field));
                if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_merge_keeps_existing_fields() {
        let store = MemoryDocumentStore::new();
        store.set("users/mom", json!({"user_id": "mom", "display_name": "Mom"}), false).await.unwrap();
        store.set("users/mom", json!({"child_ids": ["1"]}), true).await.unwrap();

        let doc = store.get("users/mom").await.unwrap().unwrap();
        assert_eq!(doc["display_name"], "Mom");
        assert_eq!(doc["child_ids"], json!(["1"]));

        // Without merge the document is replaced
        store.set("users/mom", json!({"user_id": "mom"}), false).await.unwrap();
        let doc = store.get("users/mom").await.unwrap().unwrap();
        assert!(doc.get("display_name").is_none());
    }

    #[tokio::test]
    async fn test_query_direct_children_only() {
        let store = MemoryDocumentStore::new();
        store.set("children/1", json!({"id": "1", "owner_user_id": "mom"}), false).await.unwrap();
        store.set("children/2", json!({"id": "2", "owner_user_id": "dad"}), false).await.unwrap();
        store.set("children/1/logs/9", json!({"id": "9", "owner_user_id": "mom"}), false).await.unwrap();

        let owned = store
            .query("children", &Query::new().where_eq("owner_user_id", "mom"))
            .await
            .unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0]["id"], "1");
    }

    #[tokio::test]
    async fn test_query_orders_ids_numerically() {
        let store = MemoryDocumentStore::new();
        for id in ["100", "9", "25"] {
            store.set(&format!("children/1/logs/{}", id), json!({"id": id}), false).await.unwrap();
        }

        let logs = store
            .query("children/1/logs", &Query::new().order_by("id", true))
            .await
            .unwrap();
        let ids: Vec<&str> = logs.iter().filter_map(|l| l["id"].as_str()).collect();
        assert_eq!(ids, vec!["100", "25", "9"]);
    }

    #[tokio::test]
    async fn test_offline_and_rejecting() {
        let store = MemoryDocumentStore::new();
        store.set_offline(true);
        assert!(matches!(store.get("users/mom").await, Err(RemoteError::Unavailable(_))));

        store.set_offline(false);
        store.set_rejecting(Some(403));
        let err = store.set("users/mom", json!({}), false).await.unwrap_err();
        assert!(!err.is_retryable());
        // Reads still work
        assert!(store.get("users/mom").await.unwrap().is_none());
    }
}
