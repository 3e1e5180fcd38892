//! Relational engine against a file-backed sqlite database

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use pt_common::{DatabaseProvider, TransportProvider};
use pt_platform::persistence::relational::MIGRATIONS;
use pt_platform::startup::MigrationOutcome;
use pt_platform::{
    DataStore, Entity, Role, StartupOptions, StartupOrchestrator, StaticPermissionRegistry, UserProfile,
};
use pt_providers::{NativeConnector, ProviderRegistry};

async fn sqlite_store(dir: &tempfile::TempDir) -> DataStore {
    let mut connection_strings = BTreeMap::new();
    connection_strings.insert(
        "AppDb".to_string(),
        format!("sqlite://{}", dir.path().join("db").display()),
    );
    let registry = ProviderRegistry::new(Arc::new(NativeConnector::new(dir.path())), connection_strings);

    let database = registry
        .resolve_database(DatabaseProvider::Sqlite, "AppDb")
        .await
        .unwrap();
    let transport = registry
        .resolve_transport(TransportProvider::InMemory, "Bus")
        .await
        .unwrap();
    DataStore::from_handles(&database, &transport)
}

#[tokio::test]
async fn test_migrations_apply_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    let engine = store.engine();

    assert!(engine.is_relational());
    engine.probe().await.unwrap();
    assert_eq!(engine.pending_migrations().await.unwrap().len(), MIGRATIONS.len());

    let applied = engine.apply_migrations().await.unwrap();
    assert_eq!(applied.len(), MIGRATIONS.len());
    assert!(engine.pending_migrations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_startup_then_crud_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    let options = StartupOptions {
        self_apply: true,
        ..StartupOptions::default()
    };
    let orchestrator = StartupOrchestrator::new(store.clone(), Arc::new(StaticPermissionRegistry), options);
    let (_tx, rx) = broadcast::channel(1);

    let report = orchestrator.run(rx).await.unwrap();
    assert!(matches!(report.migrations, Some(MigrationOutcome::Applied(_))));
    assert_eq!(store.list::<Role>().await.unwrap().len(), 1);

    let mut uow = store.begin_unit_of_work();
    uow.add(UserProfile::new("u-1", "one@example.com", "One"));
    uow.commit().await.unwrap();

    let mut profile = store.find::<UserProfile>("u-1").await.unwrap().unwrap();
    let created_at = profile.audit().created_at;
    assert!(created_at.is_some());
    profile.name = "Uno".to_string();
    let mut uow = store.begin_unit_of_work();
    uow.update(profile);
    uow.commit().await.unwrap();

    let by_email = store
        .find_by_unique_key::<UserProfile>("one@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_email.name, "Uno");
    assert_eq!(by_email.audit().created_at, created_at);

    let mut uow = store.begin_unit_of_work();
    uow.add(UserProfile::new("u-2", "one@example.com", "Duplicate"));
    assert!(uow.commit().await.unwrap_err().is_conflict());

    let mut uow = store.begin_unit_of_work();
    uow.remove(by_email);
    uow.commit().await.unwrap();
    assert!(store.find::<UserProfile>("u-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_second_start_has_nothing_pending() {
    let dir = tempfile::tempdir().unwrap();
    let options = StartupOptions {
        self_apply: true,
        ..StartupOptions::default()
    };

    for expected_created in [true, false] {
        let store = sqlite_store(&dir).await;
        let orchestrator =
            StartupOrchestrator::new(store, Arc::new(StaticPermissionRegistry), options.clone());
        let (_tx, rx) = broadcast::channel(1);
        let report = orchestrator.run(rx).await.unwrap();

        assert_eq!(report.seed.map(|s| s.role_created), Some(expected_created));
        if !expected_created {
            assert_eq!(report.migrations, Some(MigrationOutcome::NothingPending));
        }
    }
}
