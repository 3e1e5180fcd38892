//! Process-local database
//!
//! A "server" owns named databases; each database is a map of documents
//! keyed by (entity type, id). Nothing is persisted.

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// (entity type, id)
pub type DocumentKey = (String, String);

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub unique_key: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
pub struct MemoryDatabase {
    name: Arc<str>,
    documents: Arc<RwLock<BTreeMap<DocumentKey, StoredDocument>>>,
}

impl MemoryDatabase {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            documents: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read(&self) -> RwLockReadGuard<'_, BTreeMap<DocumentKey, StoredDocument>> {
        self.documents.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<DocumentKey, StoredDocument>> {
        self.documents.write()
    }

    /// Whether two handles point at the same underlying store
    pub fn same_store(&self, other: &MemoryDatabase) -> bool {
        Arc::ptr_eq(&self.documents, &other.documents)
    }
}

pub struct MemoryServer {
    name: String,
    databases: Mutex<HashMap<String, MemoryDatabase>>,
}

impl MemoryServer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            databases: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The named database, created empty on first use
    pub fn database(&self, name: &str) -> MemoryDatabase {
        self.databases
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| MemoryDatabase::new(name))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_hands_out_one_store_per_name() {
        let server = MemoryServer::new("AppDbServer");
        let a = server.database("AppDb");
        let b = server.database("AppDb");
        let other = server.database("AuditDb");

        assert!(a.same_store(&b));
        assert!(!a.same_store(&other));
    }
}
