use async_trait::async_trait;
use aws_sdk_sqs::types::MessageAttributeValue;
use aws_sdk_sqs::Client;
use tracing::{debug, info};

use pt_common::EntityEvent;

use crate::{EventPublisher, PublishError, Result};

/// Amazon SQS publisher.
///
/// FIFO queues (URL ending in `.fifo`) get a message group per entity and the
/// event id as deduplication id, so events for one entity stay ordered.
pub struct SqsPublisher {
    client: Client,
    queue_url: String,
    queue_name: String,
    fifo: bool,
}

impl SqsPublisher {
    pub fn new(client: Client, queue_url: String) -> Self {
        let queue_name = queue_url
            .rsplit('/')
            .next()
            .unwrap_or("unknown")
            .to_string();
        let fifo = queue_name.ends_with(".fifo");

        Self {
            client,
            queue_url,
            queue_name,
            fifo,
        }
    }

    /// Build a client from the default AWS credential chain.
    pub async fn from_queue_url(queue_url: &str) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let publisher = Self::new(Client::new(&config), queue_url.to_string());
        info!(queue = %publisher.queue_name, fifo = publisher.fifo, "Using SQS transport");
        publisher
    }

    /// Cheap reachability check used when the transport is resolved.
    pub async fn verify(&self) -> Result<()> {
        self.client
            .get_queue_attributes()
            .queue_url(&self.queue_url)
            .send()
            .await
            .map_err(|e| PublishError::Connection(format!("SQS queue not reachable: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for SqsPublisher {
    fn identifier(&self) -> &str {
        &self.queue_name
    }

    async fn publish(&self, event: &EntityEvent) -> Result<()> {
        let body = serde_json::to_string(event)?;

        let kind_attribute = MessageAttributeValue::builder()
            .data_type("String")
            .string_value(event.kind.as_str())
            .build()
            .map_err(|e| PublishError::Publish(e.to_string()))?;

        let mut request = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .message_attributes("kind", kind_attribute);

        if self.fifo {
            request = request
                .message_group_id(event.message_group())
                .message_deduplication_id(&event.event_id);
        }

        request
            .send()
            .await
            .map_err(|e| PublishError::Publish(format!("SQS send error: {}", e)))?;

        debug!(event_id = %event.event_id, queue = %self.queue_name, "Event published to SQS");
        Ok(())
    }
}
