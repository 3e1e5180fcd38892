use tokio::sync::broadcast;
use tracing::{error, info, warn};

use pt_config::AppConfig;
use pt_providers::{ConfiguredResources, ProviderRegistry};

use super::readiness::BackoffPolicy;
use super::{sleep_or_cancel, StartupError};

/// Resolve the configured providers, retrying while a backend cannot be
/// reached yet.
///
/// Only unavailability is retried. Unknown or unbuilt providers and missing
/// connection strings fail on the first attempt.
pub async fn resolve_providers(
    registry: &ProviderRegistry,
    config: &AppConfig,
    policy: &BackoffPolicy,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<ConfiguredResources, StartupError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match registry.resolve_configured(config).await {
            Ok(resources) => {
                info!(
                    attempt,
                    database = %resources.database.provider(),
                    transport = %resources.transport.provider(),
                    storage = %resources.storage.provider(),
                    "Providers resolved"
                );
                return Ok(resources);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Provider unavailable"
                );
                sleep_or_cancel(delay, shutdown).await?;
            }
            Err(e) if e.is_retryable() => {
                error!(attempts = attempt, error = %e, "Provider never became available");
                return Err(StartupError::DependencyUnresponsive {
                    attempts: attempt,
                    last_error: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
}
