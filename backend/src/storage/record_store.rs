use anyhow::{Context, Result};
use serde_json::Value;
use shared::RecordId;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::collections::{Collection, Identified, ListCollection, Placement};
use super::ids::next_record_id;
use super::traits::KeyValueMedium;

/// Typed collection access over a local key-value medium.
///
/// Every public call takes the store-wide lock for its whole
/// read-modify-write, so calls are atomic with respect to each other.
/// Medium failures propagate; malformed stored data never does.
#[derive(Clone)]
pub struct RecordStore {
    medium: Arc<dyn KeyValueMedium>,
    lock: Arc<Mutex<()>>,
}

impl RecordStore {
    pub fn new(medium: Arc<dyn KeyValueMedium>) -> Self {
        Self {
            medium,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Decode a collection, repairing it in place when it is malformed.
    /// Caller must hold the lock.
    async fn load<C: Collection>(&self) -> Result<C::Value> {
        let raw = match self
            .medium
            .get_value(C::KEY)
            .await
            .with_context(|| format!("Failed to read {}", C::KEY))?
        {
            Some(raw) => raw,
            None => return Ok(C::Value::default()),
        };

        match serde_json::from_str::<C::Value>(&raw) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("Malformed local data under {}: {}", C::KEY, e);
                let repaired = serde_json::from_str::<Value>(&raw)
                    .ok()
                    .and_then(C::salvage)
                    .unwrap_or_default();
                self.store::<C>(&repaired).await?;
                debug!("Repaired {}", C::KEY);
                Ok(repaired)
            }
        }
    }

    async fn store<C: Collection>(&self, value: &C::Value) -> Result<()> {
        let json = serde_json::to_string(value)
            .with_context(|| format!("Failed to encode {}", C::KEY))?;
        self.medium
            .put_value(C::KEY, &json)
            .await
            .with_context(|| format!("Failed to write {}", C::KEY))
    }

    /// Whole collection; absent data reads as the empty value
    pub async fn read<C: Collection>(&self) -> Result<C::Value> {
        let _guard = self.lock.lock().await;
        self.load::<C>().await
    }

    /// Replace a whole collection
    pub async fn write<C: Collection>(&self, value: &C::Value) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.store::<C>(value).await
    }

    /// Atomic read-modify-write of a whole collection
    pub async fn modify<C, R, F>(&self, f: F) -> Result<R>
    where
        C: Collection,
        F: FnOnce(&mut C::Value) -> R + Send,
        R: Send,
    {
        let _guard = self.lock.lock().await;
        let mut value = self.load::<C>().await?;
        let result = f(&mut value);
        self.store::<C>(&value).await?;
        Ok(result)
    }

    /// Entry of a keyed collection, or the empty value
    pub async fn get<C, E>(&self, owner_key: &str) -> Result<E>
    where
        C: Collection<Value = BTreeMap<String, E>>,
        E: Default + Send,
    {
        Ok(self.find::<C, E>(owner_key).await?.unwrap_or_default())
    }

    /// Entry of a keyed collection if present
    pub async fn find<C, E>(&self, owner_key: &str) -> Result<Option<E>>
    where
        C: Collection<Value = BTreeMap<String, E>>,
        E: Send,
    {
        let mut map = self.read::<C>().await?;
        Ok(map.remove(owner_key))
    }

    /// Overwrite one entry of a keyed collection
    pub async fn put<C, E>(&self, owner_key: &str, value: E) -> Result<()>
    where
        C: Collection<Value = BTreeMap<String, E>>,
        E: Send,
    {
        let key = owner_key.to_string();
        self.modify::<C, _, _>(move |map| {
            map.insert(key, value);
        })
        .await
    }

    /// Drop one entry of a keyed collection, returning it
    pub async fn take<C, E>(&self, owner_key: &str) -> Result<Option<E>>
    where
        C: Collection<Value = BTreeMap<String, E>>,
        E: Send,
    {
        self.modify::<C, _, _>(|map| map.remove(owner_key)).await
    }

    /// Store a record under a fresh id at the collection's placement
    pub async fn append<C, R>(&self, mut record: R) -> Result<R>
    where
        C: ListCollection<Value = Vec<R>>,
        R: Identified + Clone + Send,
    {
        record.set_record_id(next_record_id(C::ID_PREFIX));
        let stored = record.clone();
        self.modify::<C, _, _>(move |list| match C::PLACEMENT {
            Placement::Prepend => list.insert(0, record),
            Placement::Append => list.push(record),
        })
        .await?;
        Ok(stored)
    }

    /// Drop every record whose id string-equals `id`; a missing id is a no-op
    pub async fn remove<C, R>(&self, id: &RecordId) -> Result<usize>
    where
        C: Collection<Value = Vec<R>>,
        R: Identified + Send,
    {
        self.modify::<C, _, _>(|list| {
            let before = list.len();
            list.retain(|r| r.record_id().as_str() != id.as_str());
            before - list.len()
        })
        .await
    }
}
