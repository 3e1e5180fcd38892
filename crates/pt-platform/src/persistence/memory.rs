//! In-memory engine
//!
//! Commits are staged on a copy of the store and swapped in only if every
//! change applies, which gives the same all-or-nothing behaviour as a
//! database transaction.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use pt_providers::memory::DocumentKey;
use pt_providers::{MemoryDatabase, StoredDocument};

use super::{
    restore_created_at, ChangeOperation, PendingChange, PersistenceEngine, PersistenceError,
    Result,
};

#[derive(Clone)]
pub struct MemoryEngine {
    database: MemoryDatabase,
}

impl MemoryEngine {
    pub fn new(database: MemoryDatabase) -> Self {
        Self { database }
    }

    /// Engine over a fresh, unshared store
    pub fn standalone(name: &str) -> Self {
        Self::new(MemoryDatabase::new(name))
    }
}

fn key_taken(
    documents: &BTreeMap<DocumentKey, StoredDocument>,
    entity_type: &str,
    id: &str,
    unique_key: &str,
) -> bool {
    documents.iter().any(|((t, other_id), doc)| {
        t == entity_type && other_id != id && doc.unique_key.as_deref() == Some(unique_key)
    })
}

fn apply(
    documents: &mut BTreeMap<DocumentKey, StoredDocument>,
    change: &PendingChange,
) -> Result<Option<Value>> {
    let key = (change.entity_type.to_string(), change.id.clone());

    if change.operation != ChangeOperation::Delete {
        if let Some(unique_key) = &change.unique_key {
            if key_taken(documents, change.entity_type, &change.id, unique_key) {
                return Err(PersistenceError::Conflict {
                    entity_type: change.entity_type.to_string(),
                    key: unique_key.clone(),
                });
            }
        }
    }

    match change.operation {
        ChangeOperation::Insert => {
            if documents.contains_key(&key) {
                return Err(PersistenceError::Conflict {
                    entity_type: change.entity_type.to_string(),
                    key: change.id.clone(),
                });
            }
            documents.insert(
                key,
                StoredDocument {
                    unique_key: change.unique_key.clone(),
                    body: change.body.clone(),
                },
            );
        }
        ChangeOperation::Update => {
            let Some(stored) = documents.get_mut(&key) else {
                return Err(not_found(change));
            };
            let created_at = stored.body.get("createdAt").cloned();
            let mut body = change.body.clone();
            restore_created_at(&mut body, created_at.clone());
            stored.unique_key = change.unique_key.clone();
            stored.body = body;
            return Ok(created_at);
        }
        ChangeOperation::Delete => {
            if documents.remove(&key).is_none() {
                return Err(not_found(change));
            }
        }
    }
    Ok(None)
}

fn not_found(change: &PendingChange) -> PersistenceError {
    PersistenceError::NotFound {
        entity_type: change.entity_type.to_string(),
        id: change.id.clone(),
    }
}

#[async_trait]
impl PersistenceEngine for MemoryEngine {
    fn name(&self) -> &str {
        self.database.name()
    }

    fn is_relational(&self) -> bool {
        false
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    async fn pending_migrations(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn apply_migrations(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn commit(&self, changes: &[PendingChange]) -> Result<Vec<Option<Value>>> {
        let mut documents = self.database.write();
        let mut staged = documents.clone();
        let kept = changes
            .iter()
            .map(|change| apply(&mut staged, change))
            .collect::<Result<Vec<_>>>()?;
        *documents = staged;
        Ok(kept)
    }

    async fn find(&self, entity_type: &str, id: &str) -> Result<Option<Value>> {
        let documents = self.database.read();
        Ok(documents
            .get(&(entity_type.to_string(), id.to_string()))
            .map(|d| d.body.clone()))
    }

    async fn find_by_unique_key(&self, entity_type: &str, key: &str) -> Result<Option<Value>> {
        let documents = self.database.read();
        Ok(documents
            .iter()
            .find(|((t, _), d)| t == entity_type && d.unique_key.as_deref() == Some(key))
            .map(|(_, d)| d.body.clone()))
    }

    async fn list(&self, entity_type: &str) -> Result<Vec<Value>> {
        let documents = self.database.read();
        Ok(documents
            .iter()
            .filter(|((t, _), _)| t == entity_type)
            .map(|(_, d)| d.body.clone())
            .collect())
    }
}
