//! Relational engine
//!
//! Entities are stored as JSON bodies in one `entities` table keyed by
//! (entity_type, id), with an optional per-type unique key. Schema changes
//! are embedded, ordered migrations recorded in `_schema_migrations`.
//!
//! All pending migrations apply in one transaction. MySQL commits DDL
//! implicitly, so there a failed apply can leave earlier statements in
//! place; every MySQL migration is therefore safe to run again.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, AnyPool, Row};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use pt_providers::{RelationalDatabase, SqlDialect};

use super::{
    format_timestamp, restore_created_at, ChangeOperation, PendingChange, PersistenceEngine,
    PersistenceError, Result,
};

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    postgres: &'static [&'static str],
    mysql: &'static [&'static str],
    sqlite: &'static [&'static str],
}

impl Migration {
    fn statements(&self, dialect: SqlDialect) -> &'static [&'static str] {
        match dialect {
            SqlDialect::Postgres => self.postgres,
            SqlDialect::MySql => self.mysql,
            SqlDialect::Sqlite => self.sqlite,
        }
    }
}

const CREATE_ENTITIES: &str = "CREATE TABLE IF NOT EXISTS entities (
    entity_type VARCHAR(100) NOT NULL,
    id VARCHAR(64) NOT NULL,
    unique_key VARCHAR(255),
    body TEXT NOT NULL,
    created_at VARCHAR(32) NOT NULL,
    updated_at VARCHAR(32) NOT NULL,
    PRIMARY KEY (entity_type, id),
    UNIQUE (entity_type, unique_key)
)";

const CREATE_ENTITIES_MYSQL: &str = "CREATE TABLE IF NOT EXISTS entities (
    entity_type VARCHAR(100) NOT NULL,
    id VARCHAR(64) NOT NULL,
    unique_key VARCHAR(255),
    body LONGTEXT NOT NULL,
    created_at VARCHAR(32) NOT NULL,
    updated_at VARCHAR(32) NOT NULL,
    PRIMARY KEY (entity_type, id),
    UNIQUE KEY uq_entities_unique_key (entity_type, unique_key)
)";

const INDEX_UPDATED_AT: &str =
    "CREATE INDEX IF NOT EXISTS idx_entities_type_updated ON entities (entity_type, updated_at)";

// MySQL has no CREATE INDEX IF NOT EXISTS; a rerun hits "Duplicate key name"
const INDEX_UPDATED_AT_MYSQL: &str =
    "CREATE INDEX idx_entities_type_updated ON entities (entity_type, updated_at)";

/// Embedded migrations, in apply order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "0001_create_entities",
        postgres: &[CREATE_ENTITIES],
        mysql: &[CREATE_ENTITIES_MYSQL],
        sqlite: &[CREATE_ENTITIES],
    },
    Migration {
        version: 2,
        name: "0002_index_entities_updated_at",
        postgres: &[INDEX_UPDATED_AT],
        mysql: &[INDEX_UPDATED_AT_MYSQL],
        sqlite: &[INDEX_UPDATED_AT],
    },
];

const CREATE_MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS _schema_migrations (
    version BIGINT NOT NULL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    applied_at VARCHAR(32) NOT NULL
)";

pub struct RelationalEngine {
    name: String,
    dialect: SqlDialect,
    pool: AnyPool,
}

impl RelationalEngine {
    pub fn new(database: &RelationalDatabase) -> Self {
        Self {
            name: database.name.clone(),
            dialect: database.dialect,
            pool: database.pool.clone(),
        }
    }

    fn p(&self, n: usize) -> String {
        self.dialect.placeholder(n)
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let sql = match self.dialect {
            SqlDialect::Postgres => {
                "SELECT 1 FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = $1"
            }
            SqlDialect::MySql => {
                "SELECT 1 FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = ?"
            }
            SqlDialect::Sqlite => "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
        };
        let row = sqlx::query(sql).bind(table).fetch_optional(&self.pool).await?;
        Ok(row.is_some())
    }

    async fn pending(&self) -> Result<Vec<&'static Migration>> {
        if !self.table_exists("_schema_migrations").await? {
            return Ok(MIGRATIONS.iter().collect());
        }

        let rows = sqlx::query("SELECT version FROM _schema_migrations")
            .fetch_all(&self.pool)
            .await?;
        let applied = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("version"))
            .collect::<std::result::Result<HashSet<i64>, _>>()?;

        Ok(MIGRATIONS
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .collect())
    }

    async fn apply_change(&self, conn: &mut AnyConnection, change: &PendingChange) -> Result<Option<Value>> {
        let affected = match change.operation {
            ChangeOperation::Insert => {
                let sql = format!(
                    "INSERT INTO entities (entity_type, id, unique_key, body, created_at, updated_at) VALUES ({})",
                    self.dialect.placeholders(1, 6)
                );
                let now = Utc::now();
                sqlx::query(&sql)
                    .bind(change.entity_type)
                    .bind(change.id.as_str())
                    .bind(change.unique_key.clone())
                    .bind(serde_json::to_string(&change.body)?)
                    .bind(format_timestamp(&change.created_at.unwrap_or(now)))
                    .bind(format_timestamp(&change.updated_at.unwrap_or(now)))
                    .execute(&mut *conn)
                    .await
            }
            ChangeOperation::Update => {
                let sql = format!(
                    "UPDATE entities SET unique_key = {}, body = {}, updated_at = {} WHERE entity_type = {} AND id = {}",
                    self.p(1),
                    self.p(2),
                    self.p(3),
                    self.p(4),
                    self.p(5)
                );
                sqlx::query(&sql)
                    .bind(change.unique_key.clone())
                    .bind(serde_json::to_string(&change.body)?)
                    .bind(format_timestamp(&change.updated_at.unwrap_or_else(Utc::now)))
                    .bind(change.entity_type)
                    .bind(change.id.as_str())
                    .execute(&mut *conn)
                    .await
            }
            ChangeOperation::Delete => {
                let sql = format!(
                    "DELETE FROM entities WHERE entity_type = {} AND id = {}",
                    self.p(1),
                    self.p(2)
                );
                sqlx::query(&sql)
                    .bind(change.entity_type)
                    .bind(change.id.as_str())
                    .execute(&mut *conn)
                    .await
            }
        }
        .map_err(|e| write_error(e, change))?
        .rows_affected();

        if affected == 0 && change.operation != ChangeOperation::Insert {
            return Err(PersistenceError::NotFound {
                entity_type: change.entity_type.to_string(),
                id: change.id.clone(),
            });
        }

        if change.operation != ChangeOperation::Update {
            return Ok(None);
        }
        let sql = format!(
            "SELECT created_at FROM entities WHERE entity_type = {} AND id = {}",
            self.p(1),
            self.p(2)
        );
        let row = sqlx::query(&sql)
            .bind(change.entity_type)
            .bind(change.id.as_str())
            .fetch_one(&mut *conn)
            .await?;
        let created_at: String = row.try_get("created_at")?;
        Ok(Some(Value::String(created_at)))
    }

    async fn fetch_one_where(&self, column: &str, entity_type: &str, value: &str) -> Result<Option<Value>> {
        let sql = format!(
            "SELECT body, created_at FROM entities WHERE entity_type = {} AND {} = {}",
            self.p(1),
            column,
            self.p(2)
        );
        let row = sqlx::query(&sql)
            .bind(entity_type)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode_row(&r)).transpose()
    }
}

fn decode_row(row: &AnyRow) -> Result<Value> {
    let body: String = row.try_get("body")?;
    let created_at: String = row.try_get("created_at")?;
    let mut body: Value = serde_json::from_str(&body)?;
    restore_created_at(&mut body, Some(Value::String(created_at)));
    Ok(body)
}

/// MySQL error 1061
fn is_duplicate_index(message: &str) -> bool {
    message.contains("Duplicate key name")
}

fn write_error(err: sqlx::Error, change: &PendingChange) -> PersistenceError {
    let unique_violation = err
        .as_database_error()
        .is_some_and(|e| e.is_unique_violation());
    if unique_violation {
        return PersistenceError::Conflict {
            entity_type: change.entity_type.to_string(),
            key: change.unique_key.clone().unwrap_or_else(|| change.id.clone()),
        };
    }
    err.into()
}

#[async_trait]
impl PersistenceEngine for RelationalEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_relational(&self) -> bool {
        true
    }

    async fn probe(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn pending_migrations(&self) -> Result<Vec<String>> {
        Ok(self.pending().await?.iter().map(|m| m.name.to_string()).collect())
    }

    async fn apply_migrations(&self) -> Result<Vec<String>> {
        let pending = self.pending().await?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(CREATE_MIGRATIONS_TABLE).execute(&mut *tx).await?;

        let record = format!(
            "INSERT INTO _schema_migrations (version, name, applied_at) VALUES ({})",
            self.dialect.placeholders(1, 3)
        );

        let mut applied = Vec::with_capacity(pending.len());
        for migration in pending {
            debug!(database = %self.name, migration = migration.name, "Applying migration");
            for statement in migration.statements(self.dialect) {
                match sqlx::query(statement).execute(&mut *tx).await {
                    Ok(_) => {}
                    Err(e) if self.dialect == SqlDialect::MySql && is_duplicate_index(&e.to_string()) => {
                        warn!(
                            database = %self.name,
                            migration = migration.name,
                            "Index already exists from an interrupted apply"
                        );
                    }
                    Err(e) => {
                        return Err(PersistenceError::Migration {
                            name: migration.name.to_string(),
                            reason: e.to_string(),
                        })
                    }
                }
            }
            sqlx::query(&record)
                .bind(migration.version)
                .bind(migration.name)
                .bind(format_timestamp(&Utc::now()))
                .execute(&mut *tx)
                .await
                .map_err(|e| PersistenceError::Migration {
                    name: migration.name.to_string(),
                    reason: e.to_string(),
                })?;
            applied.push(migration.name.to_string());
        }

        tx.commit().await?;
        info!(database = %self.name, count = applied.len(), "Migrations applied");
        Ok(applied)
    }

    async fn commit(&self, changes: &[PendingChange]) -> Result<Vec<Option<Value>>> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut kept = Vec::with_capacity(changes.len());
        for change in changes {
            kept.push(self.apply_change(&mut tx, change).await?);
        }
        tx.commit().await?;
        Ok(kept)
    }

    async fn find(&self, entity_type: &str, id: &str) -> Result<Option<Value>> {
        self.fetch_one_where("id", entity_type, id).await
    }

    async fn find_by_unique_key(&self, entity_type: &str, key: &str) -> Result<Option<Value>> {
        self.fetch_one_where("unique_key", entity_type, key).await
    }

    async fn list(&self, entity_type: &str) -> Result<Vec<Value>> {
        let sql = format!(
            "SELECT body, created_at FROM entities WHERE entity_type = {} ORDER BY id",
            self.p(1)
        );
        let rows = sqlx::query(&sql)
            .bind(entity_type)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_index_message() {
        assert!(is_duplicate_index(
            "error returned from database: 1061 (42000): Duplicate key name 'idx_entities_type_updated'"
        ));
        assert!(!is_duplicate_index("error returned from database: 1146 (42S02): Table 'entities' doesn't exist"));
    }

    #[test]
    fn test_migrations_are_ordered_and_rerunnable() {
        let versions: Vec<i64> = MIGRATIONS.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2]);

        for migration in MIGRATIONS {
            for dialect in [SqlDialect::Postgres, SqlDialect::Sqlite] {
                assert!(migration
                    .statements(dialect)
                    .iter()
                    .all(|s| s.contains("IF NOT EXISTS")));
            }
        }
    }
}
