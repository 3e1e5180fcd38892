//! Provider kinds
//!
//! Each infrastructure concern (database, message transport, blob storage)
//! is backed by one of several interchangeable providers, chosen once from
//! configuration at boot. Parsing is case-insensitive and accepts the common
//! aliases operators tend to type (`postgresql`, `mongo`, `s3`...).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A configuration value that names no known provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {family} provider: '{value}'")]
pub struct UnknownProvider {
    pub family: &'static str,
    pub value: String,
}

impl UnknownProvider {
    fn new(family: &'static str, value: &str) -> Self {
        Self {
            family,
            value: value.to_string(),
        }
    }
}

/// Broad storage model of a database provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseFamily {
    Relational,
    WideColumn,
    Document,
    InMemory,
}

/// Database engines the persistence layer can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseProvider {
    MySql,
    MariaDb,
    Postgres,
    SqlServer,
    /// Embedded single-file database for local runs
    Sqlite,
    CosmosDb,
    MongoDb,
    /// Process-local store, nothing survives a restart
    InMemory,
}

impl DatabaseProvider {
    pub const ALL: [DatabaseProvider; 8] = [
        DatabaseProvider::MySql,
        DatabaseProvider::MariaDb,
        DatabaseProvider::Postgres,
        DatabaseProvider::SqlServer,
        DatabaseProvider::Sqlite,
        DatabaseProvider::CosmosDb,
        DatabaseProvider::MongoDb,
        DatabaseProvider::InMemory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseProvider::MySql => "MySql",
            DatabaseProvider::MariaDb => "MariaDb",
            DatabaseProvider::Postgres => "Postgres",
            DatabaseProvider::SqlServer => "SqlServer",
            DatabaseProvider::Sqlite => "Sqlite",
            DatabaseProvider::CosmosDb => "CosmosDb",
            DatabaseProvider::MongoDb => "MongoDb",
            DatabaseProvider::InMemory => "InMemory",
        }
    }

    pub fn family(&self) -> DatabaseFamily {
        match self {
            DatabaseProvider::MySql
            | DatabaseProvider::MariaDb
            | DatabaseProvider::Postgres
            | DatabaseProvider::SqlServer
            | DatabaseProvider::Sqlite => DatabaseFamily::Relational,
            DatabaseProvider::CosmosDb => DatabaseFamily::WideColumn,
            DatabaseProvider::MongoDb => DatabaseFamily::Document,
            DatabaseProvider::InMemory => DatabaseFamily::InMemory,
        }
    }

    /// Whether the provider has a schema and therefore migrations.
    pub fn is_relational(&self) -> bool {
        self.family() == DatabaseFamily::Relational
    }
}

impl fmt::Display for DatabaseProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseProvider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(DatabaseProvider::MySql),
            "mariadb" => Ok(DatabaseProvider::MariaDb),
            "postgres" | "postgresql" => Ok(DatabaseProvider::Postgres),
            "sqlserver" | "mssql" => Ok(DatabaseProvider::SqlServer),
            "sqlite" => Ok(DatabaseProvider::Sqlite),
            "cosmosdb" | "cosmos" => Ok(DatabaseProvider::CosmosDb),
            "mongodb" | "mongo" => Ok(DatabaseProvider::MongoDb),
            "inmemory" | "memory" => Ok(DatabaseProvider::InMemory),
            _ => Err(UnknownProvider::new("database", s)),
        }
    }
}

/// Message transports entity events can be published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportProvider {
    RabbitMq,
    AzureServiceBus,
    AmazonSqs,
    /// Table-backed transport hosted on a SQL Server instance
    SqlServer,
    /// Table-backed transport hosted on a PostgreSQL instance
    Postgres,
    /// Process-local broadcast channel
    InMemory,
}

impl TransportProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProvider::RabbitMq => "RabbitMq",
            TransportProvider::AzureServiceBus => "AzureServiceBus",
            TransportProvider::AmazonSqs => "AmazonSqs",
            TransportProvider::SqlServer => "SqlServer",
            TransportProvider::Postgres => "Postgres",
            TransportProvider::InMemory => "InMemory",
        }
    }
}

impl fmt::Display for TransportProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportProvider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rabbitmq" | "amqp" => Ok(TransportProvider::RabbitMq),
            "azureservicebus" | "servicebus" => Ok(TransportProvider::AzureServiceBus),
            "amazonsqs" | "sqs" => Ok(TransportProvider::AmazonSqs),
            "sqlserver" | "mssql" => Ok(TransportProvider::SqlServer),
            "postgres" | "postgresql" => Ok(TransportProvider::Postgres),
            "inmemory" | "memory" => Ok(TransportProvider::InMemory),
            _ => Err(UnknownProvider::new("transport", s)),
        }
    }
}

/// Blob storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageProvider {
    LocalDisk,
    Sftp,
    AzureBlobStorage,
    AmazonS3,
    S3Compatible,
    GoogleCloudStorage,
}

impl StorageProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageProvider::LocalDisk => "LocalDisk",
            StorageProvider::Sftp => "Sftp",
            StorageProvider::AzureBlobStorage => "AzureBlobStorage",
            StorageProvider::AmazonS3 => "AmazonS3",
            StorageProvider::S3Compatible => "S3Compatible",
            StorageProvider::GoogleCloudStorage => "GoogleCloudStorage",
        }
    }
}

impl fmt::Display for StorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageProvider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "localdisk" | "disk" | "local" => Ok(StorageProvider::LocalDisk),
            "sftp" => Ok(StorageProvider::Sftp),
            "azureblobstorage" | "azureblob" => Ok(StorageProvider::AzureBlobStorage),
            "amazons3" | "s3" => Ok(StorageProvider::AmazonS3),
            "s3compatible" => Ok(StorageProvider::S3Compatible),
            "googlecloudstorage" | "gcs" => Ok(StorageProvider::GoogleCloudStorage),
            _ => Err(UnknownProvider::new("storage", s)),
        }
    }
}

/// Tag identifying which backend family a logical resource uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Database(DatabaseProvider),
    Transport(TransportProvider),
    Storage(StorageProvider),
}

impl ResourceKind {
    pub fn database(value: &str) -> Result<Self, UnknownProvider> {
        value.parse().map(ResourceKind::Database)
    }

    pub fn transport(value: &str) -> Result<Self, UnknownProvider> {
        value.parse().map(ResourceKind::Transport)
    }

    pub fn storage(value: &str) -> Result<Self, UnknownProvider> {
        value.parse().map(ResourceKind::Storage)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Database(p) => write!(f, "database/{}", p),
            ResourceKind::Transport(p) => write!(f, "transport/{}", p),
            ResourceKind::Storage(p) => write!(f, "storage/{}", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("postgres".parse::<DatabaseProvider>().unwrap(), DatabaseProvider::Postgres);
        assert_eq!("MariaDB".parse::<DatabaseProvider>().unwrap(), DatabaseProvider::MariaDb);
        assert_eq!(" MongoDB ".parse::<DatabaseProvider>().unwrap(), DatabaseProvider::MongoDb);
        assert_eq!("RABBITMQ".parse::<TransportProvider>().unwrap(), TransportProvider::RabbitMq);
        assert_eq!("localdisk".parse::<StorageProvider>().unwrap(), StorageProvider::LocalDisk);
    }

    #[test]
    fn test_unknown_provider_names_family() {
        let err = "oracle".parse::<DatabaseProvider>().unwrap_err();
        assert_eq!(err.family, "database");
        assert_eq!(err.value, "oracle");
        assert!(ResourceKind::transport("kafka").is_err());
    }

    #[test]
    fn test_families() {
        assert!(DatabaseProvider::Postgres.is_relational());
        assert!(DatabaseProvider::Sqlite.is_relational());
        assert!(!DatabaseProvider::MongoDb.is_relational());
        assert_eq!(DatabaseProvider::CosmosDb.family(), DatabaseFamily::WideColumn);
        assert_eq!(DatabaseProvider::InMemory.family(), DatabaseFamily::InMemory);
    }

    #[test]
    fn test_display_matches_parse() {
        for provider in DatabaseProvider::ALL {
            assert_eq!(provider.to_string().parse::<DatabaseProvider>().unwrap(), provider);
        }
        assert_eq!(
            ResourceKind::Database(DatabaseProvider::MongoDb).to_string(),
            "database/MongoDb"
        );
    }
}
