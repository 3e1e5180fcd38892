//! Persistence engines
//!
//! The unit of work talks to storage only through [`PersistenceEngine`]:
//! a probe for readiness, the migration hooks, an atomic `commit` of a batch
//! of changes, and a few reads. Entities travel as JSON bodies keyed by
//! (entity type, id).
//!
//! - `relational` - sqlx `Any` pool, single `entities` table, embedded migrations
//! - `document` - MongoDB, one collection per entity type, session transactions
//! - `memory` - process-local store

pub mod document;
pub mod memory;
pub mod relational;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use pt_providers::DatabaseHandle;

pub use document::DocumentEngine;
pub use memory::MemoryEngine;
pub use relational::RelationalEngine;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    #[error("Conflict on {entity_type} '{key}'")]
    Conflict { entity_type: String, key: String },

    #[error("{entity_type} '{id}' not found")]
    NotFound { entity_type: String, id: String },

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration '{name}' failed: {reason}")]
    Migration { name: String, reason: String },
}

impl PersistenceError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, PersistenceError::Conflict { .. })
    }
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => PersistenceError::Unavailable(err.to_string()),
            other => PersistenceError::Query(other.to_string()),
        }
    }
}

impl From<mongodb::error::Error> for PersistenceError {
    fn from(err: mongodb::error::Error) -> Self {
        PersistenceError::Query(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

/// One row-level change, already stamped and serialized.
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub operation: ChangeOperation,
    pub entity_type: &'static str,
    pub id: String,
    pub unique_key: Option<String>,
    pub body: Value,
    /// Only meaningful for inserts; stores never rewrite it on update
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PersistenceEngine: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &str;

    /// Whether the store has a schema and therefore migrations
    fn is_relational(&self) -> bool;

    /// Cheapest possible round trip. Reachability only.
    async fn probe(&self) -> Result<()>;

    /// Names of migrations not yet applied, in apply order
    async fn pending_migrations(&self) -> Result<Vec<String>>;

    /// Apply every pending migration as one unit
    async fn apply_migrations(&self) -> Result<Vec<String>>;

    /// Apply all changes atomically: either every change lands or none does.
    ///
    /// Returns one entry per change, in order: the `createdAt` the store
    /// kept for an updated row, `None` for inserts and deletes.
    async fn commit(&self, changes: &[PendingChange]) -> Result<Vec<Option<Value>>>;

    async fn find(&self, entity_type: &str, id: &str) -> Result<Option<Value>>;

    async fn find_by_unique_key(&self, entity_type: &str, key: &str) -> Result<Option<Value>>;

    async fn list(&self, entity_type: &str) -> Result<Vec<Value>>;
}

/// Build the engine matching a resolved database handle.
pub fn engine_for(handle: &DatabaseHandle) -> Arc<dyn PersistenceEngine> {
    match handle {
        DatabaseHandle::Relational(db) => Arc::new(RelationalEngine::new(db)),
        DatabaseHandle::Document(db) => Arc::new(DocumentEngine::new(db)),
        DatabaseHandle::InMemory(db) => Arc::new(MemoryEngine::new(db.clone())),
    }
}

/// Timestamp format used wherever a store keeps times as text. Fixed width,
/// so text order is time order.
pub(crate) fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Put the stored creation time back into a body.
pub(crate) fn restore_created_at(body: &mut Value, created_at: Option<Value>) {
    if let (Value::Object(fields), Some(created_at)) = (body, created_at) {
        if !created_at.is_null() {
            fields.insert("createdAt".to_string(), created_at);
        }
    }
}
