//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "appsettings.toml",
    "./config/config.toml",
    "/etc/project-template/config.toml",
];

/// Prefix for per-connection overrides, e.g. `PT_CONNECTION_STRING_APPDB`
const CONNECTION_STRING_PREFIX: &str = "PT_CONNECTION_STRING_";

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found), apply environment overrides and validate
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!(?path, "Loading configuration from file");
                AppConfig::from_file(&path)?
            }
            None => AppConfig::default(),
        };

        apply_overrides(&mut config, env::vars());
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("PT_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `PT_*` overrides from an environment snapshot.
///
/// Connection string overrides are matched case-insensitively against the
/// configured names so `PT_CONNECTION_STRING_APPDB` updates `AppDb`.
pub(crate) fn apply_overrides<I>(config: &mut AppConfig, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, val) in vars {
        if let Some(name) = key.strip_prefix(CONNECTION_STRING_PREFIX) {
            let existing = config
                .connection_strings
                .keys()
                .find(|k| k.eq_ignore_ascii_case(name))
                .cloned();
            config
                .connection_strings
                .insert(existing.unwrap_or_else(|| name.to_string()), val);
            continue;
        }

        match key.as_str() {
            "PT_ENVIRONMENT" => config.environment = val,
            "PT_CONTENT_ROOT" => config.content_root = val,

            "PT_DATABASE_PROVIDER" => config.database.provider = val,
            "PT_DATABASE_CONNECTION_NAME" => config.database.connection_name = val,
            "PT_TRANSPORT_PROVIDER" => config.transport.provider = val,
            "PT_TRANSPORT_CONNECTION_NAME" => config.transport.connection_name = val,
            "PT_STORAGE_PROVIDER" => config.storage.provider = val,
            "PT_STORAGE_CONNECTION_NAME" => config.storage.connection_name = val,

            "PT_AUTOMATIC_MIGRATIONS" => {
                config.startup.automatic_migrations = val.parse().unwrap_or(false);
            }
            "PT_AUTOMATIC_SEEDING" => {
                config.startup.automatic_seeding = val.parse().unwrap_or(true);
            }
            "PT_READINESS_MAX_ATTEMPTS" => {
                if let Ok(v) = val.parse() {
                    config.startup.readiness_max_attempts = v;
                }
            }
            "PT_MIGRATION_POLL_INTERVAL_MS" => {
                if let Ok(v) = val.parse() {
                    config.startup.migration_poll_interval_ms = v;
                }
            }

            "PT_HTTP_HOST" => config.http.host = val,
            "PT_HTTP_PORT" => {
                if let Ok(port) = val.parse() {
                    config.http.port = port;
                }
            }

            "PT_MIGRATION_LOCK_ENABLED" => {
                config.redis.migration_lock_enabled = val.parse().unwrap_or(false);
            }
            "PT_PURGE_LOCK_ENABLED" => {
                config.redis.purge_lock_enabled = val.parse().unwrap_or(false);
            }
            "PT_REDIS_URL" => config.redis.url = val,

            "PT_PURGE_INTERVAL_SECONDS" => {
                if let Ok(v) = val.parse() {
                    config.worker.purge_interval_seconds = v;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_provider_overrides() {
        let mut config = AppConfig::default();
        apply_overrides(
            &mut config,
            vars(&[
                ("PT_DATABASE_PROVIDER", "MongoDb"),
                ("PT_DATABASE_CONNECTION_NAME", "UsersDB"),
                ("PT_AUTOMATIC_MIGRATIONS", "true"),
                ("PT_ENVIRONMENT", "Development"),
                ("UNRELATED", "ignored"),
            ]),
        );

        assert_eq!(config.database.provider, "MongoDb");
        assert_eq!(config.database.connection_name, "UsersDB");
        assert!(config.startup.automatic_migrations);
        assert!(config.is_development());
    }

    #[test]
    fn test_connection_string_override_matches_existing_name() {
        let mut config = AppConfig::default();
        apply_overrides(
            &mut config,
            vars(&[
                ("PT_CONNECTION_STRING_APPDB", "postgres://db:5432"),
                ("PT_CONNECTION_STRING_Broker", "amqp://broker"),
            ]),
        );

        assert_eq!(config.connection_string("AppDb"), Some("postgres://db:5432"));
        assert_eq!(config.connection_string("Broker"), Some("amqp://broker"));
        assert!(!config.connection_strings.contains_key("APPDB"));
    }

    #[test]
    fn test_invalid_numbers_are_ignored() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, vars(&[("PT_HTTP_PORT", "not-a-port")]));
        assert_eq!(config.http.port, 8080);
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            environment = "Development"

            [storage]
            provider = "LocalDisk"
            connection_name = "Blobs"

            [connection_strings]
            Blobs = "/var/blobs"
            "#
        )
        .unwrap();

        let config = ConfigLoader::with_path(file.path()).load().unwrap();
        assert_eq!(config.storage.connection_name, "Blobs");
        assert_eq!(config.connection_string("Blobs"), Some("/var/blobs"));
    }
}
