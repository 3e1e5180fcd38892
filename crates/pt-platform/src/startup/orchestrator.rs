use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{error, info};

use pt_config::AppConfig;

use super::lock::DistributedLock;
use super::migration::{MigrationCoordinator, MigrationOutcome, WaitPolicy};
use super::readiness::{BackoffPolicy, ReadinessGate};
use super::seed::{SeedCoordinator, SeedReport};
use super::{ReadinessSignal, ReadinessState, StartupError};
use crate::permission::PermissionRegistry;
use crate::store::DataStore;

#[derive(Debug, Clone, PartialEq)]
pub struct StartupOptions {
    /// This process applies migrations instead of waiting for them
    pub self_apply: bool,
    pub automatic_seeding: bool,
    pub development: bool,
    pub readiness: BackoffPolicy,
    pub wait: WaitPolicy,
}

impl Default for StartupOptions {
    fn default() -> Self {
        Self {
            self_apply: false,
            automatic_seeding: true,
            development: false,
            readiness: BackoffPolicy::default(),
            wait: WaitPolicy::default(),
        }
    }
}

impl StartupOptions {
    pub fn from_config(config: &AppConfig, self_apply: bool) -> Self {
        Self {
            self_apply,
            automatic_seeding: config.startup.automatic_seeding,
            development: config.is_development(),
            readiness: BackoffPolicy::from_config(&config.startup),
            wait: WaitPolicy::from_config(&config.startup),
        }
    }

    fn seeding_permitted(&self) -> bool {
        self.self_apply && self.automatic_seeding
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    /// `None` for stores without migrations
    pub migrations: Option<MigrationOutcome>,
    /// `None` when seeding was not permitted
    pub seed: Option<SeedReport>,
}

/// Runs readiness, migration and seeding in order, then marks the process
/// ready.
pub struct StartupOrchestrator {
    store: DataStore,
    permissions: Arc<dyn PermissionRegistry>,
    options: StartupOptions,
    lock: Option<Arc<dyn DistributedLock>>,
    signal: ReadinessSignal,
}

impl StartupOrchestrator {
    pub fn new(store: DataStore, permissions: Arc<dyn PermissionRegistry>, options: StartupOptions) -> Self {
        Self {
            store,
            permissions,
            options,
            lock: None,
            signal: ReadinessSignal::new(),
        }
    }

    pub fn with_lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Handle for health endpoints and tests
    pub fn signal(&self) -> ReadinessSignal {
        self.signal.clone()
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<StartupReport, StartupError> {
        let started = Instant::now();
        info!(
            engine = self.store.engine().name(),
            self_apply = self.options.self_apply,
            "Starting up"
        );

        match self.run_phases(&mut shutdown).await {
            Ok(report) => {
                self.signal.set(ReadinessState::Ready);
                metrics::counter!("pt_startup_total", "result" => "ready").increment(1);
                metrics::histogram!("pt_startup_duration_seconds").record(started.elapsed().as_secs_f64());
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Startup complete, process is ready"
                );
                Ok(report)
            }
            Err(e) => {
                if !matches!(self.signal.current(), ReadinessState::Failed(_)) {
                    self.signal.set(ReadinessState::Failed(e.to_string()));
                }
                metrics::counter!("pt_startup_total", "result" => "failed").increment(1);
                error!(error = %e, "Startup failed");
                Err(e)
            }
        }
    }

    async fn run_phases(&self, shutdown: &mut broadcast::Receiver<()>) -> Result<StartupReport, StartupError> {
        let engine = self.store.engine().clone();

        ReadinessGate::new(engine.clone(), self.options.readiness, self.signal.clone())
            .await_responsive(shutdown)
            .await?;

        let migrations = if engine.is_relational() {
            let mut coordinator = MigrationCoordinator::new(
                engine.clone(),
                self.options.self_apply,
                self.options.wait,
                self.signal.clone(),
            );
            if let Some(lock) = &self.lock {
                coordinator = coordinator.with_lock(lock.clone());
            }
            Some(coordinator.ensure_migrated(shutdown).await?)
        } else {
            info!(engine = engine.name(), "Store has no schema, skipping migrations");
            None
        };

        // A shutdown that arrived while migrating stops us before any write
        if !matches!(shutdown.try_recv(), Err(broadcast::error::TryRecvError::Empty)) {
            return Err(StartupError::Cancelled);
        }

        let seed = if self.options.seeding_permitted() {
            let seeder = SeedCoordinator::new(
                self.store.clone(),
                self.permissions.clone(),
                self.options.development,
            );
            Some(seeder.ensure_baseline().await?)
        } else {
            info!(
                self_apply = self.options.self_apply,
                automatic_seeding = self.options.automatic_seeding,
                "Seeding not permitted for this process"
            );
            None
        };

        Ok(StartupReport { migrations, seed })
    }
}
