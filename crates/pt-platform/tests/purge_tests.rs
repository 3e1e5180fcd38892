mod common;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use common::memory_store;
use pt_platform::startup::{DistributedLock, LockError};
use pt_platform::{DataStore, DeletedUserPurger, UserProfile};
use pt_queue::InMemoryBus;

/// Lock that is either always free or always held by another instance.
struct SchedulerLock {
    free: bool,
    acquired: AtomicU32,
    released: AtomicU32,
}

impl SchedulerLock {
    fn new(free: bool) -> Self {
        Self {
            free,
            acquired: AtomicU32::new(0),
            released: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl DistributedLock for SchedulerLock {
    async fn try_acquire(&self) -> Result<bool, LockError> {
        if self.free {
            self.acquired.fetch_add(1, Ordering::SeqCst);
        }
        Ok(self.free)
    }

    async fn release(&self) -> Result<(), LockError> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn store_with_due_profiles(count: usize) -> DataStore {
    let store = memory_store(Arc::new(InMemoryBus::new("test")));
    let deleted_at = Utc::now() - ChronoDuration::minutes(5);
    for i in 0..count {
        let mut profile = UserProfile::new(format!("u-{i}"), format!("{i}@example.com"), "Deleted");
        profile.mark_deleted(deleted_at);
        insert(&store, profile).await;
    }
    store
}

async fn insert(store: &DataStore, profile: UserProfile) {
    let mut uow = store.begin_unit_of_work();
    uow.add(profile);
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn test_purges_only_due_profiles() {
    let store = memory_store(Arc::new(InMemoryBus::new("test")));
    let now = Utc::now();

    let mut gone = UserProfile::new("u-gone", "gone@example.com", "Gone");
    gone.mark_deleted(now - ChronoDuration::hours(1));
    let mut later = UserProfile::new("u-later", "later@example.com", "Later");
    later.mark_deleted(now + ChronoDuration::days(1));
    insert(&store, gone).await;
    insert(&store, later).await;
    insert(&store, UserProfile::new("u-active", "active@example.com", "Active")).await;

    let purger = DeletedUserPurger::new(store.clone(), 10, Duration::from_secs(60));
    let report = purger.purge_once().await.unwrap();

    assert_eq!(report.purged, 1);
    assert_eq!(report.failed, 0);
    assert!(store.find::<UserProfile>("u-gone").await.unwrap().is_none());
    assert!(store.find::<UserProfile>("u-later").await.unwrap().is_some());
    assert!(store.find::<UserProfile>("u-active").await.unwrap().is_some());
}

#[tokio::test]
async fn test_one_pass_purges_every_batch() {
    let store = store_with_due_profiles(5).await;

    let purger = DeletedUserPurger::new(store.clone(), 2, Duration::from_secs(60));

    assert_eq!(purger.purge_once().await.unwrap().purged, 5);
    assert!(store.list::<UserProfile>().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pass_skipped_while_lock_held_elsewhere() {
    let store = store_with_due_profiles(3).await;
    let lock = Arc::new(SchedulerLock::new(false));
    let purger = DeletedUserPurger::new(store.clone(), 10, Duration::from_secs(60)).with_lock(lock.clone());

    assert_eq!(purger.run_pass().await.unwrap(), None);
    assert_eq!(store.list::<UserProfile>().await.unwrap().len(), 3);
    assert_eq!(lock.released.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_lock_holder_purges_and_releases() {
    let store = store_with_due_profiles(3).await;
    let lock = Arc::new(SchedulerLock::new(true));
    let purger = DeletedUserPurger::new(store.clone(), 10, Duration::from_secs(60)).with_lock(lock.clone());

    let report = purger.run_pass().await.unwrap().unwrap();

    assert_eq!(report.purged, 3);
    assert_eq!(report.failed, 0);
    assert!(store.list::<UserProfile>().await.unwrap().is_empty());
    assert_eq!(lock.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(lock.released.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_interval_is_clamped() {
    let store = memory_store(Arc::new(InMemoryBus::new("test")));
    let purger = DeletedUserPurger::new(store, 10, Duration::ZERO);
    let (tx, rx) = broadcast::channel(1);

    let task = tokio::spawn(async move { purger.run(rx).await });
    tokio::time::sleep(Duration::from_secs(3)).await;
    tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_on_shutdown() {
    let store = memory_store(Arc::new(InMemoryBus::new("test")));
    let purger = DeletedUserPurger::new(store, 10, Duration::from_secs(30));
    let (tx, rx) = broadcast::channel(1);

    let task = tokio::spawn(async move { purger.run(rx).await });
    tokio::time::sleep(Duration::from_secs(65)).await;
    tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}
