use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use pt_config::StartupConfig;

use super::lock::DistributedLock;
use super::{sleep_or_cancel, ReadinessSignal, ReadinessState, StartupError};
use crate::persistence::PersistenceEngine;

/// Linear, jittered wait used while another instance migrates. Attempts
/// are unbounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub max_delay: Duration,
    /// Fraction in `[0, 1)`; each delay is scaled by `1 ± jitter`
    pub jitter: f64,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl WaitPolicy {
    pub fn from_config(config: &StartupConfig) -> Self {
        Self {
            interval: config.migration_poll_interval(),
            max_delay: config.migration_poll_max_delay(),
            jitter: config.migration_poll_jitter,
        }
    }

    /// `min(interval * attempt, max_delay)` before jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.interval
            .checked_mul(attempt.max(1))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::rng().random_range(-self.jitter..=self.jitter);
        base.mul_f64(factor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    NothingPending,
    Applied(Vec<String>),
    AppliedByPeer,
}

/// Applies pending migrations, or waits for the instance that does.
pub struct MigrationCoordinator {
    engine: Arc<dyn PersistenceEngine>,
    self_apply: bool,
    wait: WaitPolicy,
    lock: Option<Arc<dyn DistributedLock>>,
    signal: ReadinessSignal,
}

impl MigrationCoordinator {
    pub fn new(
        engine: Arc<dyn PersistenceEngine>,
        self_apply: bool,
        wait: WaitPolicy,
        signal: ReadinessSignal,
    ) -> Self {
        Self {
            engine,
            self_apply,
            wait,
            lock: None,
            signal,
        }
    }

    /// Serialize the apply step across instances
    pub fn with_lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub async fn ensure_migrated(
        &self,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<MigrationOutcome, StartupError> {
        let pending = self
            .engine
            .pending_migrations()
            .await
            .map_err(StartupError::MigrationCheck)?;

        if pending.is_empty() {
            info!(engine = self.engine.name(), "No pending migrations");
            return Ok(MigrationOutcome::NothingPending);
        }

        self.signal.set(ReadinessState::MigrationsPending);
        info!(
            engine = self.engine.name(),
            pending = pending.len(),
            self_apply = self.self_apply,
            "Pending migrations detected"
        );

        if !self.self_apply {
            return self.wait_for_peer(pending.len(), shutdown).await;
        }

        let Some(lock) = &self.lock else {
            return self.apply().await;
        };

        if !lock.try_acquire().await? {
            info!(engine = self.engine.name(), "Migration lock held by another instance");
            return self.wait_for_peer(pending.len(), shutdown).await;
        }

        let result = self.apply_if_still_pending().await;
        if let Err(e) = lock.release().await {
            warn!(error = %e, "Failed to release migration lock");
        }
        result
    }

    /// A peer may have finished between our check and the lock.
    async fn apply_if_still_pending(&self) -> Result<MigrationOutcome, StartupError> {
        let pending = self
            .engine
            .pending_migrations()
            .await
            .map_err(StartupError::MigrationCheck)?;
        if pending.is_empty() {
            return Ok(MigrationOutcome::AppliedByPeer);
        }
        self.apply().await
    }

    async fn apply(&self) -> Result<MigrationOutcome, StartupError> {
        match self.engine.apply_migrations().await {
            Ok(applied) => {
                info!(engine = self.engine.name(), migrations = ?applied, "Migrations applied");
                Ok(MigrationOutcome::Applied(applied))
            }
            Err(e) => {
                error!(engine = self.engine.name(), error = %e, "Failed to apply migrations");
                self.signal
                    .set(ReadinessState::Failed(format!("migration failed: {}", e)));
                Err(StartupError::MigrationFailed(e))
            }
        }
    }

    async fn wait_for_peer(
        &self,
        mut pending: usize,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<MigrationOutcome, StartupError> {
        let mut attempt = 0u32;
        loop {
            attempt = attempt.saturating_add(1);
            let delay = self.wait.delay_for(attempt);
            info!(
                engine = self.engine.name(),
                attempt,
                pending,
                retry_in_ms = delay.as_millis() as u64,
                "Waiting for another instance to apply migrations"
            );
            sleep_or_cancel(delay, shutdown).await?;

            match self.engine.pending_migrations().await {
                Ok(remaining) if remaining.is_empty() => {
                    info!(engine = self.engine.name(), attempt, "Migrations applied by peer");
                    return Ok(MigrationOutcome::AppliedByPeer);
                }
                Ok(remaining) => pending = remaining.len(),
                Err(e) => warn!(engine = self.engine.name(), error = %e, "Pending migration check failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_is_linear_and_capped() {
        let policy = WaitPolicy {
            jitter: 0.0,
            ..WaitPolicy::default()
        };
        let secs: Vec<u64> = (1..=8).map(|a| policy.delay_for(a).as_secs()).collect();
        assert_eq!(secs, vec![5, 10, 15, 20, 25, 30, 30, 30]);
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = WaitPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_secs(6));
        }
    }
}
