//! Data store
//!
//! Typed reads over a [`PersistenceEngine`] and the entry point for writes
//! through a [`UnitOfWork`].

use std::sync::Arc;

use pt_providers::{DatabaseHandle, TransportHandle};

use crate::domain::Entity;
use crate::notifier::ChangeNotifier;
use crate::persistence::{engine_for, PersistenceEngine, PersistenceError};
use crate::unit_of_work::UnitOfWork;

#[derive(Clone)]
pub struct DataStore {
    engine: Arc<dyn PersistenceEngine>,
    notifier: Arc<ChangeNotifier>,
}

impl DataStore {
    pub fn new(engine: Arc<dyn PersistenceEngine>, notifier: Arc<ChangeNotifier>) -> Self {
        Self { engine, notifier }
    }

    /// Store over resolved provider handles
    pub fn from_handles(database: &DatabaseHandle, transport: &TransportHandle) -> Self {
        Self::new(
            engine_for(database),
            Arc::new(ChangeNotifier::new(transport.publisher())),
        )
    }

    pub fn engine(&self) -> &Arc<dyn PersistenceEngine> {
        &self.engine
    }

    pub fn begin_unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::new(self.engine.clone(), self.notifier.clone())
    }

    pub async fn find<T: Entity>(&self, id: &str) -> Result<Option<T>, PersistenceError> {
        self.engine
            .find(T::ENTITY_TYPE, id)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    pub async fn find_by_unique_key<T: Entity>(&self, key: &str) -> Result<Option<T>, PersistenceError> {
        self.engine
            .find_by_unique_key(T::ENTITY_TYPE, key)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    pub async fn list<T: Entity>(&self) -> Result<Vec<T>, PersistenceError> {
        self.engine
            .list(T::ENTITY_TYPE)
            .await?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect()
    }
}
