//! # Domain Layer
//!
//! Business rules of the baby-care record store: who may see which child,
//! how local and remote records are reconciled, and the per-entity services
//! the io layer calls into.

pub mod access_resolver;
pub mod age;
pub mod child_service;
pub mod family_group_service;
pub mod growth_service;
pub mod health_service;
pub mod log_service;
pub mod merge;
pub mod notification_service;
pub mod outbox;
pub mod session;
pub mod sync_service;
pub mod user_service;

pub use access_resolver::AccessResolver;
pub use child_service::ChildService;
pub use family_group_service::FamilyGroupService;
pub use growth_service::GrowthService;
pub use health_service::HealthService;
pub use log_service::ObservationLogService;
pub use notification_service::NotificationService;
pub use outbox::{Outbox, OutboxConfig, OutboxWorker};
pub use session::SessionContext;
pub use sync_service::{SyncOutcome, SyncService};
pub use user_service::UserService;
