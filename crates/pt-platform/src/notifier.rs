//! Change Notifier
//!
//! Turns committed [`ChangeRecord`]s into entity events. Runs strictly after
//! the commit. A publish failure is logged and counted but never surfaces to
//! the caller: the data is already durable.

use std::sync::Arc;
use tracing::{info, warn};

use pt_common::EntityEvent;
use pt_queue::EventPublisher;

use crate::unit_of_work::{ChangeRecord, MutationKind};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishSummary {
    pub published: usize,
    pub failed: usize,
}

pub struct ChangeNotifier {
    publisher: Arc<dyn EventPublisher>,
}

impl ChangeNotifier {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    /// Publish one event per record, in capture order.
    pub async fn publish_all(&self, records: &[ChangeRecord]) -> PublishSummary {
        let mut summary = PublishSummary::default();

        for record in records {
            let event = EntityEvent::new(
                record.kind.event_kind(),
                record.entity_type_name,
                record.entity_id.clone(),
                record.snapshot.clone(),
            );

            match self.publisher.publish(&event).await {
                Ok(()) => {
                    summary.published += 1;
                    metrics::counter!("pt_entity_events_published_total", "kind" => event.kind.as_str())
                        .increment(1);
                    info!(
                        entity_type = record.entity_type_name,
                        entity_id = %record.entity_id,
                        "{}",
                        log_message(record.kind)
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    metrics::counter!("pt_entity_events_failed_total", "kind" => event.kind.as_str())
                        .increment(1);
                    warn!(
                        transport = self.publisher.identifier(),
                        entity_type = record.entity_type_name,
                        entity_id = %record.entity_id,
                        event_id = %event.event_id,
                        error = %e,
                        "Failed to publish entity event after commit"
                    );
                }
            }
        }

        summary
    }
}

fn log_message(kind: MutationKind) -> &'static str {
    match kind {
        MutationKind::Created => "Entity created",
        MutationKind::Updated => "Entity updated",
        MutationKind::Deleted => "Entity deleted",
    }
}
