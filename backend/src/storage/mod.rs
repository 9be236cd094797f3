//! # Storage Layer
//!
//! Local persistence (a key-value medium wrapped by the typed
//! [`RecordStore`]) and the remote document store reached through
//! [`remote::RemoteGateway`].

pub mod collections;
pub mod ids;
pub mod memory;
pub mod record_store;
pub mod remote;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryMedium;
pub use record_store::RecordStore;
pub use sqlite::SqliteMedium;
pub use traits::{DocumentStore, KeyValueMedium};
