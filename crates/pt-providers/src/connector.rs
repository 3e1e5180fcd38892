//! Connectors build handles; the registry decides when.
//!
//! Everything that touches the network lives behind [`Connector`] so the
//! registry's caching can be exercised without real backends.

use async_trait::async_trait;
use mongodb::bson::doc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use pt_common::{DatabaseProvider, ResourceKind, StorageProvider, TransportProvider};
use pt_queue::rabbitmq::{RabbitMqConfig, RabbitMqPublisher};
use pt_queue::sql::SqlTablePublisher;
use pt_queue::sqs::SqsPublisher;
use pt_queue::InMemoryBus;

use crate::handle::{
    DatabaseHandle, DatabaseServerHandle, DocumentDatabase, DocumentServer, StorageHandle,
    TransportHandle,
};
use crate::memory::MemoryServer;
use crate::relational::RelationalServer;
use crate::storage::LocalDiskStorage;
use crate::{ProviderError, Result};

#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to the server hosting one or more logical databases.
    async fn connect_server(
        &self,
        provider: DatabaseProvider,
        server_name: &str,
        connection_string: Option<&str>,
    ) -> Result<DatabaseServerHandle>;

    /// Open a logical database on an already connected server.
    async fn open_database(
        &self,
        server: &DatabaseServerHandle,
        database_name: &str,
    ) -> Result<DatabaseHandle>;

    async fn connect_transport(
        &self,
        provider: TransportProvider,
        name: &str,
        connection_string: Option<&str>,
    ) -> Result<TransportHandle>;

    async fn connect_storage(
        &self,
        provider: StorageProvider,
        name: &str,
        connection_string: Option<&str>,
    ) -> Result<StorageHandle>;
}

/// Connector backed by the real client libraries.
pub struct NativeConnector {
    content_root: PathBuf,
}

impl NativeConnector {
    pub fn new(content_root: impl Into<PathBuf>) -> Self {
        Self {
            content_root: content_root.into(),
        }
    }
}

fn required<'a>(name: &str, connection_string: Option<&'a str>) -> Result<&'a str> {
    connection_string
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ProviderError::MissingConnectionString(name.to_string()))
}

#[async_trait]
impl Connector for NativeConnector {
    async fn connect_server(
        &self,
        provider: DatabaseProvider,
        server_name: &str,
        connection_string: Option<&str>,
    ) -> Result<DatabaseServerHandle> {
        match provider {
            DatabaseProvider::Postgres
            | DatabaseProvider::MySql
            | DatabaseProvider::MariaDb
            | DatabaseProvider::Sqlite => {
                let conn = required(server_name, connection_string)?;
                let server = RelationalServer::connect(provider, server_name, conn).await?;
                Ok(DatabaseServerHandle::Relational(server))
            }
            DatabaseProvider::MongoDb => {
                let conn = required(server_name, connection_string)?;
                let client = mongodb::Client::with_uri_str(conn)
                    .await
                    .map_err(|e| ProviderError::unavailable(server_name, e))?;
                client
                    .database("admin")
                    .run_command(doc! { "ping": 1 })
                    .await
                    .map_err(|e| ProviderError::unavailable(server_name, e))?;
                info!(server = server_name, "Connected to MongoDB");
                Ok(DatabaseServerHandle::Document(DocumentServer {
                    name: server_name.to_string(),
                    client,
                }))
            }
            DatabaseProvider::InMemory => {
                info!(server = server_name, "Using in-memory database server");
                Ok(DatabaseServerHandle::InMemory(MemoryServer::new(server_name)))
            }
            DatabaseProvider::SqlServer | DatabaseProvider::CosmosDb => {
                Err(ProviderError::NotImplemented {
                    kind: ResourceKind::Database(provider),
                })
            }
        }
    }

    async fn open_database(
        &self,
        server: &DatabaseServerHandle,
        database_name: &str,
    ) -> Result<DatabaseHandle> {
        match server {
            DatabaseServerHandle::Relational(server) => {
                Ok(DatabaseHandle::Relational(server.open_database(database_name).await?))
            }
            DatabaseServerHandle::Document(server) => Ok(DatabaseHandle::Document(DocumentDatabase {
                name: database_name.to_string(),
                client: server.client.clone(),
                database: server.client.database(database_name),
            })),
            DatabaseServerHandle::InMemory(server) => {
                Ok(DatabaseHandle::InMemory(server.database(database_name)))
            }
        }
    }

    async fn connect_transport(
        &self,
        provider: TransportProvider,
        name: &str,
        connection_string: Option<&str>,
    ) -> Result<TransportHandle> {
        match provider {
            TransportProvider::RabbitMq => {
                let uri = required(name, connection_string)?;
                let publisher = RabbitMqPublisher::connect(RabbitMqConfig::new(uri, name))
                    .await
                    .map_err(|e| ProviderError::unavailable(name, e))?;
                Ok(TransportHandle::RabbitMq(Arc::new(publisher)))
            }
            TransportProvider::AmazonSqs => {
                let queue_url = required(name, connection_string)?;
                let publisher = SqsPublisher::from_queue_url(queue_url).await;
                publisher
                    .verify()
                    .await
                    .map_err(|e| ProviderError::unavailable(name, e))?;
                Ok(TransportHandle::AmazonSqs(Arc::new(publisher)))
            }
            TransportProvider::Postgres => {
                let url = required(name, connection_string)?;
                let publisher = SqlTablePublisher::connect(name, url)
                    .await
                    .map_err(|e| ProviderError::unavailable(name, e))?;
                Ok(TransportHandle::Postgres(Arc::new(publisher)))
            }
            TransportProvider::InMemory => {
                info!(transport = name, "Using in-memory transport");
                Ok(TransportHandle::InMemory(Arc::new(InMemoryBus::new(name))))
            }
            TransportProvider::AzureServiceBus | TransportProvider::SqlServer => {
                Err(ProviderError::NotImplemented {
                    kind: ResourceKind::Transport(provider),
                })
            }
        }
    }

    async fn connect_storage(
        &self,
        provider: StorageProvider,
        name: &str,
        connection_string: Option<&str>,
    ) -> Result<StorageHandle> {
        match provider {
            StorageProvider::LocalDisk => {
                let location = required(name, connection_string)?;
                let storage = LocalDiskStorage::open(&self.content_root, location)
                    .await
                    .map_err(|e| ProviderError::unavailable(name, e))?;
                Ok(StorageHandle::LocalDisk(Arc::new(storage)))
            }
            StorageProvider::Sftp
            | StorageProvider::AzureBlobStorage
            | StorageProvider::AmazonS3
            | StorageProvider::S3Compatible
            | StorageProvider::GoogleCloudStorage => Err(ProviderError::NotImplemented {
                kind: ResourceKind::Storage(provider),
            }),
        }
    }
}
