//! Deleted user purge
//!
//! Background job that hard-deletes soft-deleted user profiles. Each
//! profile is removed in its own unit of work so one failure does not hold
//! back the rest of the batch.
//!
//! With a [`DistributedLock`] configured, only the instance holding the lock
//! runs a pass; the others skip it. A pass that fails is retried with
//! exponential backoff before giving up until the next tick.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::domain::{Entity, UserProfile};
use crate::persistence::PersistenceError;
use crate::startup::{BackoffPolicy, DistributedLock, LockError};
use crate::store::DataStore;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum PurgeError {
    #[error("Purge lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Purge failed: {0}")]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    pub purged: usize,
    pub failed: usize,
}

pub struct DeletedUserPurger {
    store: DataStore,
    batch_size: usize,
    interval: Duration,
    lock: Option<Arc<dyn DistributedLock>>,
    retry: BackoffPolicy,
}

impl DeletedUserPurger {
    pub fn new(store: DataStore, batch_size: usize, interval: Duration) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            // tokio's interval panics on a zero period
            interval: interval.max(MIN_INTERVAL),
            lock: None,
            // Retries after 2, 4 and 8 seconds
            retry: BackoffPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(8),
            },
        }
    }

    pub fn with_lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Purge every profile whose deletion is due, `batch_size` at a time.
    pub async fn purge_once(&self) -> Result<PurgeReport, PersistenceError> {
        let now = Utc::now();
        let due: Vec<UserProfile> = self
            .store
            .list::<UserProfile>()
            .await?
            .into_iter()
            .filter(|u| u.is_due_for_purge(now))
            .collect();

        let mut report = PurgeReport::default();
        for batch in due.chunks(self.batch_size) {
            for profile in batch {
                let id = profile.id().to_string();
                let mut uow = self.store.begin_unit_of_work();
                uow.remove(profile.clone());
                match uow.commit().await {
                    Ok(_) => report.purged += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!(entity_id = %id, error = %e, "Failed to purge deleted user");
                    }
                }
            }
            debug!(batch = batch.len(), purged = report.purged, "Purge batch done");
        }

        if report.purged > 0 || report.failed > 0 {
            info!(purged = report.purged, failed = report.failed, "Purged deleted users");
        }
        Ok(report)
    }

    /// One scheduled pass: take the lock if configured, then purge with
    /// retries. `None` when another instance holds the lock.
    pub async fn run_pass(&self) -> Result<Option<PurgeReport>, PurgeError> {
        if let Some(lock) = &self.lock {
            if !lock.try_acquire().await? {
                debug!("Purge lock held by another instance, skipping pass");
                return Ok(None);
            }
        }

        let result = self.purge_with_retry().await;

        if let Some(lock) = &self.lock {
            if let Err(e) = lock.release().await {
                warn!(error = %e, "Failed to release purge lock");
            }
        }

        Ok(Some(result?))
    }

    async fn purge_with_retry(&self) -> Result<PurgeReport, PersistenceError> {
        let mut attempt = 0;
        loop {
            match self.purge_once().await {
                Ok(report) => return Ok(report),
                Err(e) if attempt < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        max_retries = self.retry.max_attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Purge pass failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(attempts = attempt + 1, error = %e, "Purge pass failed");
                    return Err(e);
                }
            }
        }
    }

    /// Purge on every tick until shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            locked = self.lock.is_some(),
            "Starting deleted user purge loop"
        );

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_pass().await {
                        Ok(Some(report)) => debug!(purged = report.purged, "Purge pass complete"),
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "Purge pass abandoned until next tick"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Purge loop shutting down");
                    break;
                }
            }
        }
    }
}
