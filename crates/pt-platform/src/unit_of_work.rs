//! Unit of Work
//!
//! Callers track entities with an explicit state, then `commit`. A commit:
//! 1. assigns time-ordered ids to added entities that need one
//! 2. stamps `createdAt` / `updatedAt`
//! 3. captures one [`ChangeRecord`] per added, modified or deleted entity
//! 4. commits the batch atomically through the persistence engine
//! 5. copies the stored `createdAt` into the records of updated entities
//! 6. only then hands the records to the [`ChangeNotifier`]
//!
//! A failed commit publishes nothing and drops the captured records.
//!
//! ```ignore
//! let mut uow = store.begin_unit_of_work();
//! uow.add(Role::new("Editor", "Edits content"));
//! let outcome = uow.commit().await?;
//! ```

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

use pt_common::{EntityEventKind, IdGenerator};

use crate::domain::{AuditStamps, Entity};
use crate::notifier::ChangeNotifier;
use crate::persistence::{
    restore_created_at, ChangeOperation, PendingChange, PersistenceEngine, PersistenceError,
};

#[derive(Error, Debug)]
pub enum UnitOfWorkError {
    #[error("Commit failed: {0}")]
    CommitFailed(#[source] PersistenceError),

    #[error("Invalid {entity_type}: {reason}")]
    InvalidEntity {
        entity_type: &'static str,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl UnitOfWorkError {
    /// Whether the commit lost a uniqueness race
    pub fn is_conflict(&self) -> bool {
        matches!(self, UnitOfWorkError::CommitFailed(e) if e.is_conflict())
    }
}

/// Tracking state of an entity within a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Detached,
    Unchanged,
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Created,
    Updated,
    Deleted,
}

impl MutationKind {
    fn from_state(state: EntityState) -> Option<Self> {
        match state {
            EntityState::Added => Some(MutationKind::Created),
            EntityState::Modified => Some(MutationKind::Updated),
            EntityState::Deleted => Some(MutationKind::Deleted),
            EntityState::Detached | EntityState::Unchanged => None,
        }
    }

    pub fn event_kind(&self) -> EntityEventKind {
        match self {
            MutationKind::Created => EntityEventKind::EntityCreated,
            MutationKind::Updated => EntityEventKind::EntityUpdated,
            MutationKind::Deleted => EntityEventKind::EntityDeleted,
        }
    }

    fn operation(&self) -> ChangeOperation {
        match self {
            MutationKind::Created => ChangeOperation::Insert,
            MutationKind::Updated => ChangeOperation::Update,
            MutationKind::Deleted => ChangeOperation::Delete,
        }
    }
}

/// A mutation captured just before commit, awaiting publication.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub kind: MutationKind,
    pub entity_type_name: &'static str,
    pub entity_id: String,
    pub snapshot: Value,
}

/// What a successful commit changed.
#[derive(Debug, Default)]
pub struct CommitOutcome {
    pub records: Vec<ChangeRecord>,
}

impl CommitOutcome {
    /// Id of the n-th created entity, e.g. to learn a generated key
    pub fn created_id(&self, n: usize) -> Option<&str> {
        self.records
            .iter()
            .filter(|r| r.kind == MutationKind::Created)
            .nth(n)
            .map(|r| r.entity_id.as_str())
    }
}

/// Object-safe view of an [`Entity`] so mixed types can be tracked together.
trait Tracked: Send + Sync {
    fn entity_type(&self) -> &'static str;
    fn generated_id(&self) -> bool;
    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn unique_key(&self) -> Option<String>;
    fn audit_mut(&mut self) -> &mut AuditStamps;
    fn snapshot(&self) -> Result<Value, serde_json::Error>;
}

impl<T: Entity> Tracked for T {
    fn entity_type(&self) -> &'static str {
        T::ENTITY_TYPE
    }

    fn generated_id(&self) -> bool {
        T::GENERATED_ID
    }

    fn id(&self) -> &str {
        Entity::id(self)
    }

    fn set_id(&mut self, id: String) {
        Entity::set_id(self, id)
    }

    fn unique_key(&self) -> Option<String> {
        Entity::unique_key(self)
    }

    fn audit_mut(&mut self) -> &mut AuditStamps {
        Entity::audit_mut(self)
    }

    fn snapshot(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

struct Entry {
    state: EntityState,
    entity: Box<dyn Tracked>,
}

pub struct UnitOfWork {
    engine: Arc<dyn PersistenceEngine>,
    notifier: Arc<ChangeNotifier>,
    entries: Vec<Entry>,
}

impl UnitOfWork {
    pub(crate) fn new(engine: Arc<dyn PersistenceEngine>, notifier: Arc<ChangeNotifier>) -> Self {
        Self {
            engine,
            notifier,
            entries: Vec::new(),
        }
    }

    /// Track an entity in the given state
    pub fn track<T: Entity>(&mut self, entity: T, state: EntityState) {
        self.entries.push(Entry {
            state,
            entity: Box::new(entity),
        });
    }

    pub fn add<T: Entity>(&mut self, entity: T) {
        self.track(entity, EntityState::Added);
    }

    pub fn update<T: Entity>(&mut self, entity: T) {
        self.track(entity, EntityState::Modified);
    }

    pub fn remove<T: Entity>(&mut self, entity: T) {
        self.track(entity, EntityState::Deleted);
    }

    /// Number of tracked entities that a commit would write
    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| MutationKind::from_state(e.state).is_some())
            .count()
    }

    /// Commit every tracked change, then publish one event per change.
    ///
    /// Tracked entities are cleared whether or not the commit succeeds.
    pub async fn commit(&mut self) -> Result<CommitOutcome, UnitOfWorkError> {
        let entries = std::mem::take(&mut self.entries);
        let (changes, mut records) = capture(entries, Utc::now().trunc_subsecs(6))?;

        if changes.is_empty() {
            return Ok(CommitOutcome::default());
        }

        let kept = match self.engine.commit(&changes).await {
            Ok(kept) => kept,
            Err(e) => {
                error!(
                    engine = self.engine.name(),
                    changes = changes.len(),
                    error = %e,
                    "Failed to commit unit of work"
                );
                return Err(UnitOfWorkError::CommitFailed(e));
            }
        };

        // Updates never rewrite createdAt, so events carry the stored value
        for (record, created_at) in records.iter_mut().zip(kept) {
            if record.kind == MutationKind::Updated {
                restore_created_at(&mut record.snapshot, created_at);
            }
        }

        debug!(engine = self.engine.name(), changes = changes.len(), "Unit of work committed");

        self.notifier.publish_all(&records).await;

        Ok(CommitOutcome { records })
    }
}

/// Stamp, key and snapshot every mutated entry.
fn capture(
    entries: Vec<Entry>,
    now: DateTime<Utc>,
) -> Result<(Vec<PendingChange>, Vec<ChangeRecord>), UnitOfWorkError> {
    let mut changes = Vec::new();
    let mut records = Vec::new();

    for Entry { state, mut entity } in entries {
        let Some(kind) = MutationKind::from_state(state) else {
            continue;
        };

        match kind {
            MutationKind::Created => {
                if entity.id().is_empty() {
                    if !entity.generated_id() {
                        return Err(UnitOfWorkError::InvalidEntity {
                            entity_type: entity.entity_type(),
                            reason: "id is required".to_string(),
                        });
                    }
                    entity.set_id(IdGenerator::next_id());
                }
                let audit = entity.audit_mut();
                audit.created_at = Some(now);
                audit.updated_at = Some(now);
            }
            MutationKind::Updated => {
                let audit = entity.audit_mut();
                audit.updated_at = Some(next_update_time(audit.updated_at, now));
            }
            MutationKind::Deleted => {}
        }

        let snapshot = entity.snapshot()?;
        let audit = entity.audit_mut().clone();

        changes.push(PendingChange {
            operation: kind.operation(),
            entity_type: entity.entity_type(),
            id: entity.id().to_string(),
            unique_key: entity.unique_key(),
            body: snapshot.clone(),
            created_at: audit.created_at,
            updated_at: audit.updated_at,
        });
        records.push(ChangeRecord {
            kind,
            entity_type_name: entity.entity_type(),
            entity_id: entity.id().to_string(),
            snapshot,
        });
    }

    Ok((changes, records))
}

/// `updatedAt` only moves forward, even if the clock does not.
fn next_update_time(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(previous) if previous >= now => previous + Duration::microseconds(1),
        _ => now,
    }
}
