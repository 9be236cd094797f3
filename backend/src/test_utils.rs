//! Shared fixtures for service and REST tests.

use std::sync::Arc;
use tempfile::TempDir;

use crate::config::AppConfig;
use crate::domain::outbox::OutboxConfig;
use crate::domain::SessionContext;
use crate::storage::remote::MemoryDocumentStore;
use crate::storage::{KeyValueMedium, MemoryMedium, SqliteMedium};
use crate::AppState;
use shared::{Child, CreateChildRequest, SessionUser};

/// One device: its own local cache, talking to a (possibly shared) remote
pub struct TestEnvironment {
    pub state: AppState,
    pub remote: Arc<MemoryDocumentStore>,
    pub medium: Arc<dyn KeyValueMedium>,
    _temp_dir: Option<TempDir>,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        bcrypt_cost: 4,
        outbox: OutboxConfig {
            alert_after_attempts: 3,
            backoff_ms: 10,
            backoff_factor: 2,
            max_backoff_ms: 100,
            poll_interval_secs: 1,
        },
        ..AppConfig::default()
    }
}

impl TestEnvironment {
    pub async fn new() -> Self {
        Self::with_remote(Arc::new(MemoryDocumentStore::new()))
    }

    /// A device with an in-memory cache over the given remote
    pub fn with_remote(remote: Arc<MemoryDocumentStore>) -> Self {
        let medium: Arc<dyn KeyValueMedium> = Arc::new(MemoryMedium::new());
        let state = AppState::new(medium.clone(), remote.clone(), &test_config());
        Self {
            state,
            remote,
            medium,
            _temp_dir: None,
        }
    }

    /// A device backed by a SQLite file in a temporary directory
    pub async fn with_sqlite() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let url = format!("sqlite:{}", temp_dir.path().join("test.db").display());
        let medium: Arc<dyn KeyValueMedium> =
            Arc::new(SqliteMedium::new(&url).await.expect("Failed to open test database"));
        let remote = Arc::new(MemoryDocumentStore::new());
        let state = AppState::new(medium.clone(), remote.clone(), &test_config());
        Self {
            state,
            remote,
            medium,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Another device sharing this environment's remote
    pub fn second_device(&self) -> Self {
        Self::with_remote(self.remote.clone())
    }

    /// Session for a user with their stored selection restored
    pub async fn session(&self, user_id: &str) -> SessionContext {
        self.state
            .child_service
            .session_for(SessionUser {
                user_id: user_id.to_string(),
                display_name: format!("{} name", user_id),
            })
            .await
            .expect("Failed to restore session")
    }

    /// Register a child for the user and return it
    pub async fn register_child(&self, user_id: &str, name: &str) -> Child {
        let ctx = self.session(user_id).await;
        self.state
            .child_service
            .register_child(
                &ctx,
                CreateChildRequest {
                    name: name.to_string(),
                    birth_date: "2024-01-15".to_string(),
                    photo_ref: None,
                },
            )
            .await
            .expect("Failed to register child")
            .child
    }

    /// Push every queued mutation to the remote
    pub async fn flush(&self) {
        let report = self
            .state
            .outbox()
            .drain(false)
            .await
            .expect("Failed to drain outbox");
        assert_eq!(report.remaining, 0, "outbox not fully delivered");
    }
}
