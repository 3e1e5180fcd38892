use std::fmt::Display;

use pt_common::{ResourceKind, UnknownProvider};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Unsupported provider kind: {0}")]
    UnsupportedProviderKind(#[from] UnknownProvider),

    #[error("Provider {kind} is not implemented")]
    NotImplemented { kind: ResourceKind },

    #[error("Provider unavailable for '{name}': {reason}")]
    Unavailable { name: String, reason: String },

    #[error("No connection string configured for '{0}'")]
    MissingConnectionString(String),

    #[error("Invalid logical name: '{0}'")]
    InvalidName(String),
}

impl ProviderError {
    pub fn unavailable(name: &str, reason: impl Display) -> Self {
        ProviderError::Unavailable {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Only transient I/O failures are worth retrying; configuration
    /// mistakes and unbuilt providers fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Unavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pt_common::DatabaseProvider;

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(ProviderError::unavailable("AppDb", "connection refused").is_retryable());
        assert!(!ProviderError::NotImplemented {
            kind: ResourceKind::Database(DatabaseProvider::CosmosDb)
        }
        .is_retryable());
        assert!(!ProviderError::MissingConnectionString("AppDb".into()).is_retryable());
    }
}
