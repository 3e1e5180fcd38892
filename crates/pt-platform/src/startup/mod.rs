//! Startup sequence
//!
//! Provider resolution, readiness gate, migration coordination and baseline
//! seeding, run once before a process starts serving:
//!
//! ```text
//! Unknown -> Responding -> [MigrationsPending ->] Ready
//!         \-> Failed(reason)
//! ```
//!
//! Every wait is cancellable through the process shutdown channel. A
//! cancelled or failed startup never reaches `Ready`.

pub mod lock;
pub mod migration;
pub mod orchestrator;
pub mod readiness;
pub mod resolve;
pub mod seed;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use pt_providers::ProviderError;

use crate::persistence::PersistenceError;
use crate::unit_of_work::UnitOfWorkError;

pub use lock::{DistributedLock, LockError, RedisLock};
pub use migration::{MigrationCoordinator, MigrationOutcome, WaitPolicy};
pub use orchestrator::{StartupOptions, StartupOrchestrator, StartupReport};
pub use readiness::{BackoffPolicy, ReadinessGate};
pub use resolve::resolve_providers;
pub use seed::{SeedCoordinator, SeedReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    Unknown,
    Responding,
    MigrationsPending,
    Ready,
    Failed(String),
}

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Database did not respond after {attempts} attempts: {last_error}")]
    DependencyUnresponsive { attempts: u32, last_error: String },

    #[error("Migration failed: {0}")]
    MigrationFailed(#[source] PersistenceError),

    #[error("Could not check pending migrations: {0}")]
    MigrationCheck(#[source] PersistenceError),

    #[error("Migration lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Seeding failed: {0}")]
    Seed(#[from] UnitOfWorkError),

    #[error("Seed lookup failed: {0}")]
    SeedLookup(#[source] PersistenceError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Startup cancelled by shutdown")]
    Cancelled,
}

/// Shared, observable readiness state.
#[derive(Clone)]
pub struct ReadinessSignal {
    tx: Arc<watch::Sender<ReadinessState>>,
}

impl Default for ReadinessSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ReadinessState::Unknown);
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn set(&self, state: ReadinessState) {
        self.tx.send_replace(state);
    }

    pub fn current(&self) -> ReadinessState {
        self.tx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow() == ReadinessState::Ready
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.tx.subscribe()
    }
}

/// Sleep unless shutdown is signalled first.
pub(crate) async fn sleep_or_cancel(
    delay: Duration,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), StartupError> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = shutdown.recv() => Err(StartupError::Cancelled),
    }
}
