//! Provider registry
//!
//! Resolves (kind, logical name) to a handle exactly once per registry:
//! concurrent first callers share one in-flight resolution, and a failed
//! resolution leaves nothing behind so the next call starts over.
//!
//! Databases use a two-level convention. The server handle is cached under
//! `"{name}Server"` (or an explicit server name) and the database handle
//! under the logical name, so several databases can sit on one server
//! connection.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use pt_common::{DatabaseProvider, ResourceKind, StorageProvider, TransportProvider};
use pt_config::AppConfig;

use crate::connector::{Connector, NativeConnector};
use crate::handle::{
    DatabaseHandle, DatabaseServerHandle, ResourceHandle, StorageHandle, TransportHandle,
};
use crate::{ProviderError, Result};

type Slot<T> = Arc<OnceCell<Arc<T>>>;

pub struct ProviderRegistry {
    connector: Arc<dyn Connector>,
    connection_strings: BTreeMap<String, String>,
    servers: DashMap<(DatabaseProvider, String), Slot<DatabaseServerHandle>>,
    /// Keyed by server as well, so one name on two servers is two databases
    databases: DashMap<(DatabaseProvider, String, String), Slot<DatabaseHandle>>,
    transports: DashMap<(TransportProvider, String), Slot<TransportHandle>>,
    storages: DashMap<(StorageProvider, String), Slot<StorageHandle>>,
}

/// The three handles a process needs, resolved from configuration.
pub struct ConfiguredResources {
    pub database: Arc<DatabaseHandle>,
    pub transport: Arc<TransportHandle>,
    pub storage: Arc<StorageHandle>,
}

impl ProviderRegistry {
    pub fn new(connector: Arc<dyn Connector>, connection_strings: BTreeMap<String, String>) -> Self {
        Self {
            connector,
            connection_strings,
            servers: DashMap::new(),
            databases: DashMap::new(),
            transports: DashMap::new(),
            storages: DashMap::new(),
        }
    }

    /// Registry using the real client libraries.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(NativeConnector::new(&config.content_root)),
            config.connection_strings.clone(),
        )
    }

    /// Parse the configured kinds and resolve all three handles.
    ///
    /// Kinds are parsed up front so a typo fails before any connection is
    /// attempted.
    pub async fn resolve_configured(&self, config: &AppConfig) -> Result<ConfiguredResources> {
        let database_provider: DatabaseProvider = config.database.provider.parse()?;
        let transport_provider: TransportProvider = config.transport.provider.parse()?;
        let storage_provider: StorageProvider = config.storage.provider.parse()?;

        let database = self
            .resolve_database(database_provider, &config.database.connection_name)
            .await?;
        let transport = self
            .resolve_transport(transport_provider, &config.transport.connection_name)
            .await?;
        let storage = self
            .resolve_storage(storage_provider, &config.storage.connection_name)
            .await?;

        Ok(ConfiguredResources {
            database,
            transport,
            storage,
        })
    }

    /// Resolve any resource kind.
    pub async fn resolve(&self, kind: ResourceKind, logical_name: &str) -> Result<ResourceHandle> {
        match kind {
            ResourceKind::Database(provider) => self
                .resolve_database(provider, logical_name)
                .await
                .map(ResourceHandle::Database),
            ResourceKind::Transport(provider) => self
                .resolve_transport(provider, logical_name)
                .await
                .map(ResourceHandle::Transport),
            ResourceKind::Storage(provider) => self
                .resolve_storage(provider, logical_name)
                .await
                .map(ResourceHandle::Storage),
        }
    }

    /// Database on its own server, `"{name}Server"`.
    pub async fn resolve_database(
        &self,
        provider: DatabaseProvider,
        name: &str,
    ) -> Result<Arc<DatabaseHandle>> {
        validate_name(name)?;
        self.resolve_database_on(provider, &format!("{}Server", name), name)
            .await
    }

    /// Database hosted on a named, possibly shared, server.
    pub async fn resolve_database_on(
        &self,
        provider: DatabaseProvider,
        server_name: &str,
        name: &str,
    ) -> Result<Arc<DatabaseHandle>> {
        validate_name(name)?;
        validate_name(server_name)?;

        let key = (provider, server_name.to_string(), name.to_string());
        memoize(&self.databases, key, || async {
            let server = self.resolve_server(provider, server_name, name).await?;
            debug!(provider = %provider, database = name, server = server.name(), "Opening database");
            let handle = self.connector.open_database(&server, name).await?;
            info!(provider = %provider, database = name, "Database resolved");
            Ok(handle)
        })
        .await
    }

    /// The server handle alone. Its connection string is looked up under
    /// the server name first, then under the database name.
    pub async fn resolve_server(
        &self,
        provider: DatabaseProvider,
        server_name: &str,
        database_name: &str,
    ) -> Result<Arc<DatabaseServerHandle>> {
        validate_name(server_name)?;

        memoize(&self.servers, (provider, server_name.to_string()), || async {
            let connection_string = self
                .connection_string(server_name)
                .or_else(|| self.connection_string(database_name));
            debug!(provider = %provider, server = server_name, "Connecting to database server");
            self.connector
                .connect_server(provider, server_name, connection_string)
                .await
        })
        .await
    }

    pub async fn resolve_transport(
        &self,
        provider: TransportProvider,
        name: &str,
    ) -> Result<Arc<TransportHandle>> {
        validate_name(name)?;

        memoize(&self.transports, (provider, name.to_string()), || async {
            let handle = self
                .connector
                .connect_transport(provider, name, self.connection_string(name))
                .await?;
            info!(provider = %provider, transport = name, "Transport resolved");
            Ok(handle)
        })
        .await
    }

    pub async fn resolve_storage(
        &self,
        provider: StorageProvider,
        name: &str,
    ) -> Result<Arc<StorageHandle>> {
        validate_name(name)?;

        memoize(&self.storages, (provider, name.to_string()), || async {
            let handle = self
                .connector
                .connect_storage(provider, name, self.connection_string(name))
                .await?;
            info!(provider = %provider, storage = name, "Storage resolved");
            Ok(handle)
        })
        .await
    }

    fn connection_string(&self, name: &str) -> Option<&str> {
        self.connection_strings.get(name).map(String::as_str)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ProviderError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Single-flight initialisation of one cache slot.
///
/// The slot is cloned out of the map before awaiting so no shard lock is
/// held across I/O. `OnceCell` keeps failures out of the cache.
async fn memoize<K, T, F, Fut>(map: &DashMap<K, Slot<T>>, key: K, init: F) -> Result<Arc<T>>
where
    K: Eq + Hash,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let slot = map.entry(key).or_default().clone();
    let value = slot
        .get_or_try_init(|| async { init().await.map(Arc::new) })
        .await?;
    Ok(Arc::clone(value))
}
