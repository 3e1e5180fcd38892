//! Document engine
//!
//! One MongoDB collection per entity type. Each document wraps the entity
//! body together with its unique key and timestamps:
//! `{ _id, uniqueKey, body, createdAt, updatedAt }`.
//! Commits run in a multi-document transaction, so a replica set is required.

use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{ClientSession, Client, Collection, Database, IndexModel};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, error, warn};

use pt_providers::DocumentDatabase;

use super::{
    format_timestamp, restore_created_at, ChangeOperation, PendingChange, PersistenceEngine,
    PersistenceError, Result,
};

const DUPLICATE_KEY: i32 = 11000;

pub struct DocumentEngine {
    name: String,
    client: Client,
    database: Database,
    /// Collections whose unique-key index is known to exist
    indexed: Mutex<HashSet<String>>,
}

impl DocumentEngine {
    pub fn new(database: &DocumentDatabase) -> Self {
        Self {
            name: database.name.clone(),
            client: database.client.clone(),
            database: database.database.clone(),
            indexed: Mutex::new(HashSet::new()),
        }
    }

    fn collection(&self, entity_type: &str) -> Collection<Document> {
        self.database.collection::<Document>(entity_type)
    }

    /// Indexes cannot be created inside a transaction, so this runs first.
    async fn ensure_unique_index(&self, entity_type: &str) -> Result<()> {
        let known = self.indexed.lock().contains(entity_type);
        if known {
            return Ok(());
        }

        let index = IndexModel::builder()
            .keys(doc! { "uniqueKey": 1 })
            .options(
                IndexOptions::builder()
                    .name("uq_unique_key".to_string())
                    .unique(true)
                    .partial_filter_expression(doc! { "uniqueKey": { "$type": "string" } })
                    .build(),
            )
            .build();
        self.collection(entity_type).create_index(index).await?;

        debug!(database = %self.name, collection = entity_type, "Unique key index ensured");
        self.indexed.lock().insert(entity_type.to_string());
        Ok(())
    }

    async fn apply_change(&self, session: &mut ClientSession, change: &PendingChange) -> Result<Option<Value>> {
        let collection = self.collection(change.entity_type);
        let body = to_bson(&change.body).map_err(|e| PersistenceError::Query(e.to_string()))?;
        let unique_key = change
            .unique_key
            .as_ref()
            .map(|k| Bson::String(k.clone()))
            .unwrap_or(Bson::Null);
        let updated_at = format_timestamp(&change.updated_at.unwrap_or_else(Utc::now));

        match change.operation {
            ChangeOperation::Insert => {
                let created_at = format_timestamp(&change.created_at.unwrap_or_else(Utc::now));
                collection
                    .insert_one(doc! {
                        "_id": change.id.as_str(),
                        "uniqueKey": unique_key,
                        "body": body,
                        "createdAt": created_at,
                        "updatedAt": updated_at,
                    })
                    .session(&mut *session)
                    .await
                    .map_err(|e| write_error(e, change))?;
            }
            ChangeOperation::Update => {
                let previous = collection
                    .find_one_and_update(
                        doc! { "_id": change.id.as_str() },
                        doc! { "$set": {
                            "uniqueKey": unique_key,
                            "body": body,
                            "updatedAt": updated_at,
                        } },
                    )
                    .projection(doc! { "createdAt": 1 })
                    .session(&mut *session)
                    .await
                    .map_err(|e| write_error(e, change))?
                    .ok_or_else(|| not_found(change))?;
                let created_at = previous
                    .get_str("createdAt")
                    .ok()
                    .map(|s| Value::String(s.to_string()));
                return Ok(created_at);
            }
            ChangeOperation::Delete => {
                let result = collection
                    .delete_one(doc! { "_id": change.id.as_str() })
                    .session(&mut *session)
                    .await?;
                if result.deleted_count == 0 {
                    return Err(not_found(change));
                }
            }
        }
        Ok(None)
    }
}

fn not_found(change: &PendingChange) -> PersistenceError {
    PersistenceError::NotFound {
        entity_type: change.entity_type.to_string(),
        id: change.id.clone(),
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        _ => err.to_string().contains("E11000"),
    }
}

fn write_error(err: mongodb::error::Error, change: &PendingChange) -> PersistenceError {
    if is_duplicate_key(&err) {
        return PersistenceError::Conflict {
            entity_type: change.entity_type.to_string(),
            key: change.unique_key.clone().unwrap_or_else(|| change.id.clone()),
        };
    }
    err.into()
}

fn decode(document: Document) -> Value {
    let mut body = document
        .get("body")
        .cloned()
        .map(Bson::into_relaxed_extjson)
        .unwrap_or(Value::Null);
    let created_at = document
        .get_str("createdAt")
        .ok()
        .map(|s| Value::String(s.to_string()));
    restore_created_at(&mut body, created_at);
    body
}

#[async_trait]
impl PersistenceEngine for DocumentEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_relational(&self) -> bool {
        false
    }

    async fn probe(&self) -> Result<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn pending_migrations(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn apply_migrations(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn commit(&self, changes: &[PendingChange]) -> Result<Vec<Option<Value>>> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }

        for change in changes.iter().filter(|c| c.operation == ChangeOperation::Insert) {
            self.ensure_unique_index(change.entity_type).await?;
        }

        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;

        let mut kept = Vec::with_capacity(changes.len());
        for change in changes {
            match self.apply_change(&mut session, change).await {
                Ok(created_at) => kept.push(created_at),
                Err(e) => {
                    if let Err(abort) = session.abort_transaction().await {
                        warn!(database = %self.name, error = %abort, "Failed to abort transaction");
                    }
                    error!(
                        database = %self.name,
                        entity_type = change.entity_type,
                        id = %change.id,
                        error = %e,
                        "Failed to apply change, transaction aborted"
                    );
                    return Err(e);
                }
            }
        }

        session.commit_transaction().await?;
        Ok(kept)
    }

    async fn find(&self, entity_type: &str, id: &str) -> Result<Option<Value>> {
        let found = self.collection(entity_type).find_one(doc! { "_id": id }).await?;
        Ok(found.map(decode))
    }

    async fn find_by_unique_key(&self, entity_type: &str, key: &str) -> Result<Option<Value>> {
        let found = self
            .collection(entity_type)
            .find_one(doc! { "uniqueKey": key })
            .await?;
        Ok(found.map(decode))
    }

    async fn list(&self, entity_type: &str) -> Result<Vec<Value>> {
        let cursor = self
            .collection(entity_type)
            .find(doc! {})
            .sort(doc! { "_id": 1 })
            .await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        Ok(documents.into_iter().map(decode).collect())
    }
}
