//! Provider Registry
//!
//! Turns a configured provider kind plus a logical resource name into a
//! backend handle, memoized for the lifetime of the registry:
//!
//! - `registry` - single-flight, per-(kind, name) cache
//! - `connector` - the I/O that builds each handle, behind a trait
//! - `handle` - sum types over every backend the workspace can talk to
//! - `relational` - sqlx server/database two-level connection setup
//! - `memory` - the process-local database used for embedded runs
//! - `storage` - blob storage backends

pub mod connector;
pub mod error;
pub mod handle;
pub mod memory;
pub mod registry;
pub mod relational;
pub mod storage;

pub use connector::{Connector, NativeConnector};
pub use error::ProviderError;
pub use handle::{
    DatabaseHandle, DatabaseServerHandle, DocumentDatabase, DocumentServer, ResourceHandle,
    StorageHandle, TransportHandle,
};
pub use memory::{MemoryDatabase, MemoryServer, StoredDocument};
pub use registry::{ConfiguredResources, ProviderRegistry};
pub use relational::{RelationalDatabase, RelationalServer, SqlDialect};
pub use storage::{BlobStorage, LocalDiskStorage, StorageError};

pub type Result<T> = std::result::Result<T, ProviderError>;
