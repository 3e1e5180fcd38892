use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use pt_config::StartupConfig;

use super::{sleep_or_cancel, ReadinessSignal, ReadinessState, StartupError};
use crate::persistence::PersistenceEngine;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &StartupConfig) -> Self {
        Self {
            max_attempts: config.readiness_max_attempts,
            base_delay: config.readiness_base_delay(),
            max_delay: config.readiness_max_delay(),
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Every delay the policy can produce, in order
    pub fn delays(&self) -> Vec<Duration> {
        (1..=self.max_attempts).map(|a| self.delay_for(a)).collect()
    }
}

/// Blocks until the database answers a probe.
pub struct ReadinessGate {
    engine: Arc<dyn PersistenceEngine>,
    policy: BackoffPolicy,
    signal: ReadinessSignal,
}

impl ReadinessGate {
    pub fn new(engine: Arc<dyn PersistenceEngine>, policy: BackoffPolicy, signal: ReadinessSignal) -> Self {
        Self {
            engine,
            policy,
            signal,
        }
    }

    /// Probe until the engine responds. Fails with `DependencyUnresponsive`
    /// once `max_attempts` probes have failed.
    pub async fn await_responsive(
        &self,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), StartupError> {
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_attempts {
            match self.engine.probe().await {
                Ok(()) => {
                    info!(engine = self.engine.name(), attempt, "Database is responding");
                    self.signal.set(ReadinessState::Responding);
                    return Ok(());
                }
                Err(e) => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        engine = self.engine.name(),
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Database not responding"
                    );
                    last_error = e.to_string();
                    sleep_or_cancel(delay, shutdown).await?;
                }
            }
        }

        error!(
            engine = self.engine.name(),
            attempts = self.policy.max_attempts,
            "Database never became responsive"
        );
        self.signal
            .set(ReadinessState::Failed(format!("database unresponsive: {}", last_error)));
        Err(StartupError::DependencyUnresponsive {
            attempts: self.policy.max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_then_cap() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };
        let secs: Vec<u64> = policy.delays().iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 10]);
    }

    #[test]
    fn test_large_attempt_numbers_stay_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(64), Duration::from_secs(10));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
    }
}
