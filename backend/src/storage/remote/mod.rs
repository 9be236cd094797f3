//! # Remote document store
//!
//! The shared source of truth. [`RemoteGateway`] maps records onto document
//! paths; a [`DocumentStore`](super::traits::DocumentStore) implementation
//! moves documents over the wire (HTTP) or keeps them in process (tests).

pub mod gateway;
pub mod http;
pub mod memory;
pub mod mutation;

pub use gateway::RemoteGateway;
pub use http::HttpDocumentStore;
pub use memory::MemoryDocumentStore;
pub use mutation::{Mutation, OutboxEntry};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("remote request timed out")]
    Timeout,

    #[error("remote store returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("could not decode remote document: {0}")]
    Decode(String),

    #[error("user already exists: {0}")]
    UserExists(String),
}

impl RemoteError {
    /// Whether trying again later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Unavailable(_) | RemoteError::Timeout => true,
            RemoteError::Http { status, .. } => *status >= 500 || *status == 429,
            RemoteError::Decode(_) | RemoteError::UserExists(_) => false,
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Decode(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub equals: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// Single-field equality filter plus optional ordering
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub filter: Option<FieldFilter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: &str, equals: impl Into<Value>) -> Self {
        self.filter = Some(FieldFilter {
            field: field.to_string(),
            equals: equals.into(),
        });
        self
    }

    pub fn order_by(mut self, field: &str, descending: bool) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            descending,
        });
        self
    }
}
