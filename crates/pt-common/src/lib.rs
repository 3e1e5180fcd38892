//! Project Template Common Types
//!
//! Types shared by every crate in the workspace: the provider kinds that
//! configuration selects between, the entity change events published after
//! a commit, time-ordered identifiers and logging setup.

pub mod event;
pub mod id;
pub mod logging;
pub mod provider;

pub use event::{EntityEvent, EntityEventKind};
pub use id::IdGenerator;
pub use provider::{
    DatabaseFamily, DatabaseProvider, ResourceKind, StorageProvider, TransportProvider,
    UnknownProvider,
};
