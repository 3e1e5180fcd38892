//! Unit of work commits, audit stamping and change notification

mod common;

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;

use common::{memory_store, store_over, FailingPublisher, ScriptedEngine};
use pt_common::EntityEventKind;
use pt_platform::persistence::MemoryEngine;
use pt_platform::{
    ChangeNotifier, DataStore, EmailTemplate, Entity, EntityState, MutationKind, Role, UnitOfWorkError,
    UserProfile,
};
use pt_queue::InMemoryBus;

#[tokio::test]
async fn test_commit_publishes_one_event_per_change_in_order() {
    let bus = Arc::new(InMemoryBus::new("test"));
    let mut rx = bus.subscribe();
    let store = memory_store(bus.clone());

    let existing = UserProfile::new("u-1", "one@example.com", "One");
    let mut seed = store.begin_unit_of_work();
    seed.add(existing);
    seed.commit().await.unwrap();
    let _ = rx.recv().await.unwrap();

    let mut updated = store.find::<UserProfile>("u-1").await.unwrap().unwrap();
    updated.name = "Uno".to_string();

    let mut uow = store.begin_unit_of_work();
    uow.add(Role::new("Auditor", "Reads audit logs"));
    uow.update(updated);
    uow.add(UserProfile::new("u-2", "two@example.com", "Two"));
    let outcome = uow.commit().await.unwrap();

    let kinds: Vec<MutationKind> = outcome.records.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![MutationKind::Created, MutationKind::Updated, MutationKind::Created]
    );

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    let third = rx.recv().await.unwrap();
    assert_eq!(first.kind, EntityEventKind::EntityCreated);
    assert_eq!(first.entity_type_name, "Role");
    assert_eq!(second.kind, EntityEventKind::EntityUpdated);
    assert_eq!(second.entity_id, "u-1");
    assert_eq!(second.entity_snapshot["name"], "Uno");
    assert_eq!(third.kind, EntityEventKind::EntityCreated);
    assert_eq!(bus.published_count(), 4);
}

#[tokio::test]
async fn test_failed_commit_publishes_nothing() {
    let bus = Arc::new(InMemoryBus::new("test"));
    let mut rx = bus.subscribe();
    let engine = Arc::new(ScriptedEngine::new(false).failing_commit());
    let store = store_over(engine, bus.clone());

    let mut uow = store.begin_unit_of_work();
    uow.add(Role::new("Auditor", "Reads audit logs"));
    uow.add(UserProfile::new("u-1", "one@example.com", "One"));
    let result = uow.commit().await;

    assert!(matches!(result, Err(UnitOfWorkError::CommitFailed(_))));
    assert_eq!(uow.pending_count(), 0);
    assert_eq!(bus.published_count(), 0);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_unchanged_entities_are_not_written_or_published() {
    let bus = Arc::new(InMemoryBus::new("test"));
    let store = memory_store(bus.clone());

    let mut uow = store.begin_unit_of_work();
    uow.track(Role::new("Viewer", "Read only"), EntityState::Unchanged);
    uow.track(Role::new("Ghost", "Never attached"), EntityState::Detached);
    assert_eq!(uow.pending_count(), 0);

    let outcome = uow.commit().await.unwrap();
    assert!(outcome.records.is_empty());
    assert_eq!(bus.published_count(), 0);
    assert!(store.list::<Role>().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_audit_stamps_on_create_and_update() {
    let bus = Arc::new(InMemoryBus::new("test"));
    let mut rx = bus.subscribe();
    let store = memory_store(bus.clone());
    let before = Utc::now();

    let mut uow = store.begin_unit_of_work();
    uow.add(Role::new("Auditor", "Reads audit logs"));
    let outcome = uow.commit().await.unwrap();
    let id = outcome.created_id(0).unwrap().to_string();

    let created = store.find::<Role>(&id).await.unwrap().unwrap();
    let created_at = created.audit().created_at.unwrap();
    assert_eq!(created.audit().updated_at, Some(created_at));
    assert!(created_at >= before - chrono::Duration::milliseconds(1));

    let mut changed = created.clone();
    changed.description = "Reads and exports audit logs".to_string();
    // A stale createdAt on the tracked copy must not reach the store
    changed.audit_mut().created_at = Some(created_at - chrono::Duration::days(1));
    let mut uow = store.begin_unit_of_work();
    uow.update(changed);
    let outcome = uow.commit().await.unwrap();

    let reloaded = store.find::<Role>(&id).await.unwrap().unwrap();
    assert_eq!(reloaded.audit().created_at, Some(created_at));
    assert!(reloaded.audit().updated_at.unwrap() > created_at);

    // The update event carries the stored createdAt, not the stale copy
    let _created_event = rx.recv().await.unwrap();
    let updated_event = rx.recv().await.unwrap();
    assert_eq!(updated_event.kind, EntityEventKind::EntityUpdated);
    let published: Role = serde_json::from_value(updated_event.entity_snapshot).unwrap();
    assert_eq!(published.audit().created_at, Some(created_at));
    assert_eq!(published.audit().updated_at, reloaded.audit().updated_at);
    let recorded: Role = serde_json::from_value(outcome.records[0].snapshot.clone()).unwrap();
    assert_eq!(recorded.audit().created_at, Some(created_at));
}

#[tokio::test]
async fn test_generated_ids_are_time_ordered() {
    let store = memory_store(Arc::new(InMemoryBus::new("test")));

    let mut uow = store.begin_unit_of_work();
    uow.add(Role::new("First", "1"));
    uow.add(Role::new("Second", "2"));
    let outcome = uow.commit().await.unwrap();

    let first = outcome.created_id(0).unwrap();
    let second = outcome.created_id(1).unwrap();
    assert_ne!(first, second);
    assert!(first < second);
}

#[tokio::test]
async fn test_publish_failure_does_not_fail_commit() {
    let engine = Arc::new(MemoryEngine::standalone("test"));
    let store = DataStore::new(engine, Arc::new(ChangeNotifier::new(Arc::new(FailingPublisher))));

    let template = EmailTemplate::new("welcome", "<p>Welcome to the platform</p>").unwrap();
    let mut uow = store.begin_unit_of_work();
    uow.add(template);
    let outcome = uow.commit().await.unwrap();

    assert_eq!(outcome.records.len(), 1);
    assert!(store.find::<EmailTemplate>("welcome").await.unwrap().is_some());
}

#[tokio::test]
async fn test_duplicate_unique_key_is_a_conflict() {
    let store = memory_store(Arc::new(InMemoryBus::new("test")));

    let mut uow = store.begin_unit_of_work();
    uow.add(UserProfile::new("u-1", "same@example.com", "One"));
    uow.commit().await.unwrap();

    let mut uow = store.begin_unit_of_work();
    uow.add(UserProfile::new("u-2", "SAME@example.com", "Two"));
    let err = uow.commit().await.unwrap_err();

    assert!(err.is_conflict());
    assert!(store.find::<UserProfile>("u-2").await.unwrap().is_none());
}
