//! # Storage Traits
//!
//! Seams between the domain layer and the two places records live: a local
//! string key-value medium (the on-device cache) and a remote document store
//! (the shared source of truth).

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::remote::{Query, RemoteError};

/// String-keyed, string-valued persistence used for the local cache.
///
/// Implementations do not interpret values; decoding and shape repair happen
/// in [`crate::storage::RecordStore`].
#[async_trait]
pub trait KeyValueMedium: Send + Sync {
    /// Retrieve a value by its key
    async fn get_value(&self, key: &str) -> Result<Option<String>>;

    /// Store a value, overwriting any existing value for the same key
    async fn put_value(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value; returns true if the key existed
    async fn delete_value(&self, key: &str) -> Result<bool>;

    /// List all stored keys
    async fn list_keys(&self) -> Result<Vec<String>>;
}

/// Remote document database with `/`-separated document paths.
///
/// Only the shapes the sync layer needs: point read, upsert, delete and a
/// single-field equality query with optional ordering.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document; `None` when it does not exist
    async fn get(&self, path: &str) -> Result<Option<Value>, RemoteError>;

    /// Write one document. With `merge` the top-level fields are merged into
    /// the existing document instead of replacing it.
    async fn set(&self, path: &str, document: Value, merge: bool) -> Result<(), RemoteError>;

    /// Delete one document; deleting a missing document succeeds
    async fn delete(&self, path: &str) -> Result<(), RemoteError>;

    /// Documents that are direct children of `collection`, filtered and ordered
    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Value>, RemoteError>;
}
