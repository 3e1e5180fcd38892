#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use pt_common::EntityEvent;
use pt_platform::persistence::{
    ChangeOperation, MemoryEngine, PendingChange, PersistenceEngine, PersistenceError,
};
use pt_platform::{ChangeNotifier, DataStore};
use pt_queue::{EventPublisher, InMemoryBus, PublishError};

/// Engine whose probe and migration answers are scripted per call. Data
/// operations go to an in-memory engine.
pub struct ScriptedEngine {
    relational: bool,
    probes: Mutex<VecDeque<bool>>,
    pending: Mutex<VecDeque<Vec<String>>>,
    fail_apply: bool,
    fail_commit: bool,
    lose_insert_race: bool,
    pub probe_calls: AtomicU32,
    pub pending_calls: AtomicU32,
    pub apply_calls: AtomicU32,
    inner: MemoryEngine,
}

impl ScriptedEngine {
    pub fn new(relational: bool) -> Self {
        Self {
            relational,
            probes: Mutex::new(VecDeque::new()),
            pending: Mutex::new(VecDeque::new()),
            fail_apply: false,
            fail_commit: false,
            lose_insert_race: false,
            probe_calls: AtomicU32::new(0),
            pending_calls: AtomicU32::new(0),
            apply_calls: AtomicU32::new(0),
            inner: MemoryEngine::standalone("scripted"),
        }
    }

    /// Probe answers in order; once exhausted the probe succeeds
    pub fn with_probes(self, answers: &[bool]) -> Self {
        *self.probes.lock() = answers.iter().copied().collect();
        self
    }

    /// Whether migrations are pending on each check; once exhausted nothing is pending
    pub fn with_pending(self, answers: &[bool]) -> Self {
        *self.pending.lock() = answers
            .iter()
            .map(|p| if *p { vec!["0001_init".to_string()] } else { Vec::new() })
            .collect();
        self
    }

    pub fn failing_apply(mut self) -> Self {
        self.fail_apply = true;
        self
    }

    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    /// Every lookup misses and every insert conflicts, as when a peer
    /// inserts the same record between our check and our write
    pub fn losing_insert_race(mut self) -> Self {
        self.lose_insert_race = true;
        self
    }

    pub fn probes(&self) -> u32 {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn pending_checks(&self) -> u32 {
        self.pending_calls.load(Ordering::SeqCst)
    }

    pub fn applies(&self) -> u32 {
        self.apply_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_relational(&self) -> bool {
        self.relational
    }

    async fn probe(&self) -> Result<(), PersistenceError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        match self.probes.lock().pop_front() {
            Some(false) => Err(PersistenceError::Unavailable("connection refused".to_string())),
            _ => Ok(()),
        }
    }

    async fn pending_migrations(&self) -> Result<Vec<String>, PersistenceError> {
        self.pending_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pending.lock().pop_front().unwrap_or_default())
    }

    async fn apply_migrations(&self) -> Result<Vec<String>, PersistenceError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_apply {
            return Err(PersistenceError::Migration {
                name: "0001_init".to_string(),
                reason: "syntax error".to_string(),
            });
        }
        self.pending.lock().clear();
        Ok(vec!["0001_init".to_string()])
    }

    async fn commit(&self, changes: &[PendingChange]) -> Result<Vec<Option<Value>>, PersistenceError> {
        if self.fail_commit {
            return Err(PersistenceError::Unavailable("connection reset".to_string()));
        }
        if self.lose_insert_race {
            if let Some(insert) = changes.iter().find(|c| c.operation == ChangeOperation::Insert) {
                return Err(PersistenceError::Conflict {
                    entity_type: insert.entity_type.to_string(),
                    key: insert.id.clone(),
                });
            }
        }
        self.inner.commit(changes).await
    }

    async fn find(&self, entity_type: &str, id: &str) -> Result<Option<Value>, PersistenceError> {
        if self.lose_insert_race {
            return Ok(None);
        }
        self.inner.find(entity_type, id).await
    }

    async fn find_by_unique_key(&self, entity_type: &str, key: &str) -> Result<Option<Value>, PersistenceError> {
        self.inner.find_by_unique_key(entity_type, key).await
    }

    async fn list(&self, entity_type: &str) -> Result<Vec<Value>, PersistenceError> {
        self.inner.list(entity_type).await
    }
}

/// Publisher that always fails
pub struct FailingPublisher;

#[async_trait]
impl EventPublisher for FailingPublisher {
    fn identifier(&self) -> &str {
        "failing"
    }

    async fn publish(&self, _event: &EntityEvent) -> Result<(), PublishError> {
        Err(PublishError::Connection("broker down".to_string()))
    }
}

pub fn store_over(engine: Arc<dyn PersistenceEngine>, bus: Arc<InMemoryBus>) -> DataStore {
    DataStore::new(engine, Arc::new(ChangeNotifier::new(bus)))
}

pub fn memory_store(bus: Arc<InMemoryBus>) -> DataStore {
    store_over(Arc::new(MemoryEngine::standalone("test")), bus)
}
