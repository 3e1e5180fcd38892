//! Platform core
//!
//! - Domain entities with audit stamps
//! - Persistence engines over the resolved database handle
//! - Unit of work with post-commit change notification
//! - Startup orchestration: readiness, migrations, baseline seeding
//! - Background purge of deleted users

// Domain
pub mod domain;
pub mod permission;

// Data access
pub mod persistence;
pub mod store;
pub mod unit_of_work;
pub mod notifier;

// Process lifecycle
pub mod startup;
pub mod purge;

pub use domain::{AuditStamps, DomainError, EmailTemplate, Entity, Role, UserProfile};
pub use notifier::{ChangeNotifier, PublishSummary};
pub use permission::{PermissionRegistry, PermissionService, StaticPermissionRegistry};
pub use persistence::{engine_for, PersistenceEngine, PersistenceError};
pub use purge::{DeletedUserPurger, PurgeError, PurgeReport};
pub use startup::{
    ReadinessSignal, ReadinessState, StartupError, StartupOptions, StartupOrchestrator, StartupReport,
};
pub use store::DataStore;
pub use unit_of_work::{ChangeRecord, CommitOutcome, EntityState, MutationKind, UnitOfWork, UnitOfWorkError};
