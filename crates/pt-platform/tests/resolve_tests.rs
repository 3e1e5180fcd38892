//! Provider resolution while backends come up

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use pt_common::{DatabaseProvider, StorageProvider, TransportProvider};
use pt_config::AppConfig;
use pt_platform::startup::{resolve_providers, BackoffPolicy};
use pt_platform::{
    DataStore, ReadinessState, StartupError, StartupOptions, StartupOrchestrator, StaticPermissionRegistry,
};
use pt_providers::{
    Connector, DatabaseHandle, DatabaseServerHandle, MemoryServer, NativeConnector, ProviderError,
    ProviderRegistry, StorageHandle, TransportHandle,
};

/// Database server that refuses the first `failures` connects.
struct StartingDatabase {
    failures: AtomicU32,
    connects: AtomicU32,
    native: NativeConnector,
}

impl StartingDatabase {
    fn new(failures: u32, content_root: &std::path::Path) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            connects: AtomicU32::new(0),
            native: NativeConnector::new(content_root),
        }
    }
}

#[async_trait]
impl Connector for StartingDatabase {
    async fn connect_server(
        &self,
        _provider: DatabaseProvider,
        server_name: &str,
        _connection_string: Option<&str>,
    ) -> pt_providers::Result<DatabaseServerHandle> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ProviderError::unavailable(server_name, "connection refused"));
        }
        Ok(DatabaseServerHandle::InMemory(MemoryServer::new(server_name)))
    }

    async fn open_database(
        &self,
        server: &DatabaseServerHandle,
        database_name: &str,
    ) -> pt_providers::Result<DatabaseHandle> {
        self.native.open_database(server, database_name).await
    }

    async fn connect_transport(
        &self,
        provider: TransportProvider,
        name: &str,
        connection_string: Option<&str>,
    ) -> pt_providers::Result<TransportHandle> {
        self.native.connect_transport(provider, name, connection_string).await
    }

    async fn connect_storage(
        &self,
        provider: StorageProvider,
        name: &str,
        connection_string: Option<&str>,
    ) -> pt_providers::Result<StorageHandle> {
        self.native.connect_storage(provider, name, connection_string).await
    }
}

fn in_memory_config(content_root: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.content_root = content_root.display().to_string();
    config.database.provider = "InMemory".to_string();
    config.transport.provider = "InMemory".to_string();
    config
}

fn quick_backoff(max_attempts: u32) -> BackoffPolicy {
    BackoffPolicy {
        max_attempts,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn test_startup_reaches_ready_after_database_refuses_connections() {
    let dir = tempfile::tempdir().unwrap();
    let config = in_memory_config(dir.path());
    let connector = Arc::new(StartingDatabase::new(3, dir.path()));
    let registry = ProviderRegistry::new(connector.clone(), config.connection_strings.clone());
    let (_tx, mut rx) = broadcast::channel(1);

    let resources = resolve_providers(&registry, &config, &quick_backoff(10), &mut rx)
        .await
        .unwrap();
    assert_eq!(connector.connects.load(Ordering::SeqCst), 4);
    assert_eq!(resources.database.provider(), DatabaseProvider::InMemory);

    let store = DataStore::from_handles(&resources.database, &resources.transport);
    let options = StartupOptions {
        self_apply: true,
        readiness: quick_backoff(3),
        ..Default::default()
    };
    let orchestrator = StartupOrchestrator::new(store, Arc::new(StaticPermissionRegistry), options);
    let signal = orchestrator.signal();

    let report = orchestrator.run(rx).await.unwrap();

    assert_eq!(signal.current(), ReadinessState::Ready);
    assert!(report.seed.unwrap().role_created);
}

#[tokio::test]
async fn test_resolution_gives_up_after_max_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let config = in_memory_config(dir.path());
    let connector = Arc::new(StartingDatabase::new(u32::MAX, dir.path()));
    let registry = ProviderRegistry::new(connector.clone(), config.connection_strings.clone());
    let (_tx, mut rx) = broadcast::channel(1);

    let result = resolve_providers(&registry, &config, &quick_backoff(4), &mut rx).await;

    assert!(matches!(
        result,
        Err(StartupError::DependencyUnresponsive { attempts: 4, .. })
    ));
    assert_eq!(connector.connects.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_unbuilt_provider_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = in_memory_config(dir.path());
    config.transport.provider = "AzureServiceBus".to_string();
    let connector = Arc::new(StartingDatabase::new(0, dir.path()));
    let registry = ProviderRegistry::new(connector.clone(), config.connection_strings.clone());
    let (_tx, mut rx) = broadcast::channel(1);

    let result = resolve_providers(&registry, &config, &quick_backoff(10), &mut rx).await;

    assert!(matches!(
        result,
        Err(StartupError::Provider(ProviderError::NotImplemented { .. }))
    ));
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_cancels_resolution_retries() {
    let dir = tempfile::tempdir().unwrap();
    let config = in_memory_config(dir.path());
    let connector = Arc::new(StartingDatabase::new(u32::MAX, dir.path()));
    let registry = ProviderRegistry::new(connector, config.connection_strings.clone());
    let (tx, mut rx) = broadcast::channel(1);
    tx.send(()).unwrap();

    let slow = BackoffPolicy {
        max_attempts: 10,
        base_delay: Duration::from_secs(60),
        max_delay: Duration::from_secs(60),
    };
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        resolve_providers(&registry, &config, &slow, &mut rx),
    )
    .await
    .unwrap();

    assert!(matches!(result, Err(StartupError::Cancelled)));
}
