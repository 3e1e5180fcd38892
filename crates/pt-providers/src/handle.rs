//! Resource handles
//!
//! One enum per capability, one variant per backend that is actually built.
//! Callers match exhaustively instead of downcasting.

use std::sync::Arc;

use pt_common::{DatabaseProvider, ResourceKind, StorageProvider, TransportProvider};
use pt_queue::rabbitmq::RabbitMqPublisher;
use pt_queue::sql::SqlTablePublisher;
use pt_queue::sqs::SqsPublisher;
use pt_queue::{EventPublisher, InMemoryBus};

use crate::memory::{MemoryDatabase, MemoryServer};
use crate::relational::{RelationalDatabase, RelationalServer};
use crate::storage::{BlobStorage, LocalDiskStorage};

/// Anything the registry can hand out.
#[derive(Clone)]
pub enum ResourceHandle {
    Database(Arc<DatabaseHandle>),
    Transport(Arc<TransportHandle>),
    Storage(Arc<StorageHandle>),
}

impl ResourceHandle {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceHandle::Database(h) => ResourceKind::Database(h.provider()),
            ResourceHandle::Transport(h) => ResourceKind::Transport(h.provider()),
            ResourceHandle::Storage(h) => ResourceKind::Storage(h.provider()),
        }
    }

    /// Whether both handles are the same cached instance
    pub fn ptr_eq(&self, other: &ResourceHandle) -> bool {
        match (self, other) {
            (ResourceHandle::Database(a), ResourceHandle::Database(b)) => Arc::ptr_eq(a, b),
            (ResourceHandle::Transport(a), ResourceHandle::Transport(b)) => Arc::ptr_eq(a, b),
            (ResourceHandle::Storage(a), ResourceHandle::Storage(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

pub struct DocumentServer {
    pub name: String,
    pub client: mongodb::Client,
}

pub struct DocumentDatabase {
    pub name: String,
    pub client: mongodb::Client,
    pub database: mongodb::Database,
}

/// Server-level handle, shared by every database hosted on it.
pub enum DatabaseServerHandle {
    Relational(RelationalServer),
    Document(DocumentServer),
    InMemory(MemoryServer),
}

impl DatabaseServerHandle {
    pub fn name(&self) -> &str {
        match self {
            DatabaseServerHandle::Relational(s) => &s.name,
            DatabaseServerHandle::Document(s) => &s.name,
            DatabaseServerHandle::InMemory(s) => s.name(),
        }
    }
}

pub enum DatabaseHandle {
    Relational(RelationalDatabase),
    Document(DocumentDatabase),
    InMemory(MemoryDatabase),
}

impl DatabaseHandle {
    pub fn provider(&self) -> DatabaseProvider {
        match self {
            DatabaseHandle::Relational(db) => db.provider,
            DatabaseHandle::Document(_) => DatabaseProvider::MongoDb,
            DatabaseHandle::InMemory(_) => DatabaseProvider::InMemory,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DatabaseHandle::Relational(db) => &db.name,
            DatabaseHandle::Document(db) => &db.name,
            DatabaseHandle::InMemory(db) => db.name(),
        }
    }

    /// Whether the store has a schema, and therefore migrations
    pub fn is_relational(&self) -> bool {
        matches!(self, DatabaseHandle::Relational(_))
    }
}

pub enum TransportHandle {
    RabbitMq(Arc<RabbitMqPublisher>),
    AmazonSqs(Arc<SqsPublisher>),
    Postgres(Arc<SqlTablePublisher>),
    InMemory(Arc<InMemoryBus>),
}

impl TransportHandle {
    pub fn provider(&self) -> TransportProvider {
        match self {
            TransportHandle::RabbitMq(_) => TransportProvider::RabbitMq,
            TransportHandle::AmazonSqs(_) => TransportProvider::AmazonSqs,
            TransportHandle::Postgres(_) => TransportProvider::Postgres,
            TransportHandle::InMemory(_) => TransportProvider::InMemory,
        }
    }

    pub fn publisher(&self) -> Arc<dyn EventPublisher> {
        match self {
            TransportHandle::RabbitMq(p) => p.clone(),
            TransportHandle::AmazonSqs(p) => p.clone(),
            TransportHandle::Postgres(p) => p.clone(),
            TransportHandle::InMemory(p) => p.clone(),
        }
    }
}

pub enum StorageHandle {
    LocalDisk(Arc<LocalDiskStorage>),
}

impl StorageHandle {
    pub fn provider(&self) -> StorageProvider {
        match self {
            StorageHandle::LocalDisk(_) => StorageProvider::LocalDisk,
        }
    }

    pub fn blobs(&self) -> Arc<dyn BlobStorage> {
        match self {
            StorageHandle::LocalDisk(s) => s.clone(),
        }
    }
}
