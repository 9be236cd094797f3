//! # Baby-care record store backend
//!
//! Keeps users, child profiles, observation logs, growth, vaccination,
//! milestone and health records in a local cache and reconciles them with a
//! remote document store shared by family members.
//!
//! ## Architecture
//!
//! The backend follows a layered architecture:
//! ```text
//! UI / REST clients
//!     ↓
//! IO Layer (REST handlers)
//!     ↓
//! Domain Layer (access rules, sync, outbox, services)
//!     ↓
//! Storage Layer (local key-value medium, remote documents)
//! ```
//!
//! Writes land in the local cache first and are pushed through a durable
//! outbox. Reads are served locally; a pull from the remote happens on
//! login, on child switch and after joining a family group.

pub mod config;
pub mod domain;
pub mod io;
pub mod storage;

#[cfg(test)]
pub mod test_utils;

use anyhow::{Context, Result};
use axum::{
    http::{HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::domain::{
    AccessResolver, ChildService, FamilyGroupService, GrowthService, HealthService,
    NotificationService, ObservationLogService, Outbox, SyncService, UserService,
};
use crate::storage::remote::{HttpDocumentStore, MemoryDocumentStore, RemoteGateway};
use crate::storage::{DocumentStore, KeyValueMedium, RecordStore, SqliteMedium};

/// Main application state that holds all services
#[derive(Clone)]
pub struct AppState {
    pub store: RecordStore,
    pub access: AccessResolver,
    pub sync_service: SyncService,
    pub user_service: UserService,
    pub child_service: ChildService,
    pub family_group_service: FamilyGroupService,
    pub log_service: ObservationLogService,
    pub growth_service: GrowthService,
    pub health_service: HealthService,
    pub notification_service: NotificationService,
}

impl AppState {
    /// Wire every service over the given local medium and remote store
    pub fn new(medium: Arc<dyn KeyValueMedium>, remote: Arc<dyn DocumentStore>, config: &AppConfig) -> Self {
        let store = RecordStore::new(medium);
        let gateway = RemoteGateway::new(remote);
        let access = AccessResolver::new(store.clone());

        let outbox = Outbox::new(store.clone(), gateway.clone(), config.outbox.clone());
        let sync_service = SyncService::new(store.clone(), gateway.clone(), outbox);

        let family_group_service =
            FamilyGroupService::new(store.clone(), gateway.clone(), access.clone(), sync_service.clone());
        let user_service = UserService::new(store.clone(), gateway, sync_service.clone(), config.bcrypt_cost);
        let child_service = ChildService::new(
            store.clone(),
            access.clone(),
            family_group_service.clone(),
            sync_service.clone(),
        );
        let log_service = ObservationLogService::new(store.clone(), access.clone(), sync_service.clone());
        let growth_service = GrowthService::new(store.clone(), access.clone(), sync_service.clone());
        let health_service = HealthService::new(store.clone(), access.clone(), sync_service.clone());
        let notification_service = NotificationService::new(store.clone(), access.clone());

        Self {
            store,
            access,
            sync_service,
            user_service,
            child_service,
            family_group_service,
            log_service,
            growth_service,
            health_service,
            notification_service,
        }
    }

    pub fn outbox(&self) -> Outbox {
        self.sync_service.outbox().clone()
    }
}

/// Initialize the backend with all required services
pub async fn initialize_backend(config: &AppConfig) -> Result<AppState> {
    info!("Setting up local database");
    if let Some(parent) = config.database_path().as_deref().and_then(|p| p.parent()) {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
        }
    }
    let medium = SqliteMedium::new(&config.database_url).await?;

    info!("Setting up remote store");
    let remote: Arc<dyn DocumentStore> = match &config.remote_url {
        Some(url) => {
            info!("Using remote document store at {}", url);
            Arc::new(HttpDocumentStore::new(url, config.remote_token.clone(), config.remote_timeout())?)
        }
        None => {
            warn!("BABYLOG_REMOTE_URL is not set, remote documents are kept in process");
            Arc::new(MemoryDocumentStore::new())
        }
    };

    info!("Setting up application state");
    Ok(AppState::new(Arc::new(medium), remote, config))
}

/// Create the Axum router with all routes configured
pub fn create_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("http://localhost:8080"))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/users/register", post(io::rest::user_apis::register))
        .route("/users/login", post(io::rest::user_apis::login))
        .route(
            "/children",
            get(io::rest::child_apis::list_children).post(io::rest::child_apis::register_child),
        )
        .route(
            "/children/:child_id",
            get(io::rest::child_apis::get_child)
                .put(io::rest::child_apis::update_child)
                .delete(io::rest::child_apis::delete_child),
        )
        .route("/children/:child_id/select", post(io::rest::child_apis::select_child))
        .route(
            "/children/:child_id/logs",
            get(io::rest::log_apis::list_logs).post(io::rest::log_apis::save_log),
        )
        .route("/children/:child_id/logs/timeline", get(io::rest::log_apis::log_timeline))
        .route(
            "/children/:child_id/notifications",
            get(io::rest::log_apis::family_log_notifications),
        )
        .route("/notifications/read", post(io::rest::log_apis::mark_notifications_read))
        .route(
            "/children/:child_id/logs/:log_id",
            axum::routing::delete(io::rest::log_apis::delete_log),
        )
        .route(
            "/children/:child_id/growth",
            get(io::rest::growth_apis::growth_history).post(io::rest::growth_apis::save_growth_entry),
        )
        .route(
            "/children/:child_id/growth/:entry_id",
            axum::routing::delete(io::rest::growth_apis::delete_growth_entry),
        )
        .route(
            "/children/:child_id/checklist",
            get(io::rest::health_apis::checked_items).post(io::rest::health_apis::toggle_checklist_item),
        )
        .route(
            "/children/:child_id/vaccinations",
            get(io::rest::health_apis::vaccination_records).post(io::rest::health_apis::toggle_vaccination),
        )
        .route(
            "/children/:child_id/health",
            get(io::rest::health_apis::health_records).post(io::rest::health_apis::add_health_record),
        )
        .route(
            "/children/:child_id/health/:record_id",
            put(io::rest::health_apis::update_health_record).delete(io::rest::health_apis::delete_health_record),
        )
        .route("/children/:child_id/family", get(io::rest::family_apis::family_for_child))
        .route("/family/join", post(io::rest::family_apis::join_family))
        .route("/sync", post(io::rest::sync_apis::sync_now))
        .route("/sync/status", get(io::rest::sync_apis::sync_status));

    Router::new()
        .nest("/api", api_routes)
        .layer(cors)
        .with_state(app_state)
}
