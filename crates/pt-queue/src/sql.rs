//! PostgreSQL table-backed transport
//!
//! Events are appended to `transport_messages`; consumers claim rows by
//! setting `consumed_at`. Useful when a deployment has a database but no
//! broker.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use pt_common::EntityEvent;

use crate::{EventPublisher, Result};

pub struct SqlTablePublisher {
    name: String,
    pool: PgPool,
}

impl SqlTablePublisher {
    pub fn new(name: impl Into<String>, pool: PgPool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    /// Connect to the transport database and make sure the table exists.
    pub async fn connect(name: &str, url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
        let publisher = Self::new(name, pool);
        publisher.init_schema().await?;
        Ok(publisher)
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transport_messages (
                id TEXT PRIMARY KEY,
                topic TEXT NOT NULL,
                message_group TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                consumed_at TIMESTAMPTZ NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transport_messages_pending
            ON transport_messages (topic, created_at)
            WHERE consumed_at IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!(transport = %self.name, "SQL transport schema initialized");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for SqlTablePublisher {
    fn identifier(&self) -> &str {
        &self.name
    }

    async fn publish(&self, event: &EntityEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;

        sqlx::query(
            r#"
            INSERT INTO transport_messages (id, topic, message_group, payload)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&event.event_id)
        .bind(event.kind.topic())
        .bind(event.message_group())
        .bind(payload)
        .execute(&self.pool)
        .await?;

        debug!(event_id = %event.event_id, transport = %self.name, "Event written to SQL transport");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        !self.pool.is_closed()
    }
}
