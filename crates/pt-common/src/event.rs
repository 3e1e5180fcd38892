//! Entity change events
//!
//! Published once per mutated entity after a unit of work commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::IdGenerator;

/// The three event kinds produced by a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityEventKind {
    EntityCreated,
    EntityUpdated,
    EntityDeleted,
}

impl EntityEventKind {
    pub const ALL: [EntityEventKind; 3] = [
        EntityEventKind::EntityCreated,
        EntityEventKind::EntityUpdated,
        EntityEventKind::EntityDeleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityEventKind::EntityCreated => "EntityCreated",
            EntityEventKind::EntityUpdated => "EntityUpdated",
            EntityEventKind::EntityDeleted => "EntityDeleted",
        }
    }

    /// Kebab-case topic name used by brokers that route on message type.
    pub fn topic(&self) -> &'static str {
        match self {
            EntityEventKind::EntityCreated => "entity-created",
            EntityEventKind::EntityUpdated => "entity-updated",
            EntityEventKind::EntityDeleted => "entity-deleted",
        }
    }
}

/// Event carrying the full entity payload as it was committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityEvent {
    pub event_id: String,
    pub kind: EntityEventKind,
    pub entity_type_name: String,
    pub entity_id: Value,
    pub entity_snapshot: Value,
    pub occurred_at: DateTime<Utc>,
}

impl EntityEvent {
    pub fn new(
        kind: EntityEventKind,
        entity_type_name: impl Into<String>,
        entity_id: impl Into<Value>,
        entity_snapshot: Value,
    ) -> Self {
        Self {
            event_id: IdGenerator::next_id(),
            kind,
            entity_type_name: entity_type_name.into(),
            entity_id: entity_id.into(),
            entity_snapshot,
            occurred_at: Utc::now(),
        }
    }

    /// Message group for ordered transports: one group per entity.
    pub fn message_group(&self) -> String {
        match &self.entity_id {
            Value::String(id) => format!("{}:{}", self.entity_type_name, id),
            other => format!("{}:{}", self.entity_type_name, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape_is_camel_case() {
        let event = EntityEvent::new(
            EntityEventKind::EntityCreated,
            "Role",
            "01J3FNSAXYKYDKB38EAC3AJ11M",
            json!({"name": "GlobalAdministrator"}),
        );
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["kind"], "EntityCreated");
        assert_eq!(value["entityTypeName"], "Role");
        assert_eq!(value["entityId"], "01J3FNSAXYKYDKB38EAC3AJ11M");
        assert_eq!(value["entitySnapshot"]["name"], "GlobalAdministrator");
    }

    #[test]
    fn test_message_group_is_per_entity() {
        let event = EntityEvent::new(EntityEventKind::EntityDeleted, "UserProfile", "u-1", json!({}));
        assert_eq!(event.message_group(), "UserProfile:u-1");
    }
}
