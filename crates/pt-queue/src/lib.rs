//! Entity event publishers
//!
//! One [`EventPublisher`] implementation per message transport. Backends that
//! need a third-party client are behind cargo features, mirroring how the
//! transports are enabled in deployment:
//!
//! | Feature    | Module       | Transport                        |
//! |------------|--------------|----------------------------------|
//! | (always)   | `memory`     | tokio broadcast channel          |
//! | `rabbitmq` | `rabbitmq`   | AMQP 0.9.1 via lapin             |
//! | `sqs`      | `sqs`        | Amazon SQS                       |
//! | `sql`      | `sql`        | PostgreSQL table-backed transport|

use async_trait::async_trait;
use pt_common::EntityEvent;

pub mod error;
pub mod memory;

#[cfg(feature = "rabbitmq")]
pub mod rabbitmq;

#[cfg(feature = "sqs")]
pub mod sqs;

#[cfg(feature = "sql")]
pub mod sql;

pub use error::PublishError;
pub use memory::InMemoryBus;

pub type Result<T> = std::result::Result<T, PublishError>;

/// Publishes entity change events onto a transport.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Transport identifier used in logs
    fn identifier(&self) -> &str;

    /// Publish one event. Delivery guarantees are those of the transport.
    async fn publish(&self, event: &EntityEvent) -> Result<()>;

    /// Whether the underlying connection is usable
    fn is_healthy(&self) -> bool {
        true
    }
}
