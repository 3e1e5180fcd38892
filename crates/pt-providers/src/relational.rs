//! Relational server and database handles over sqlx's `Any` driver
//!
//! The connection string configured for a logical database names the
//! *server*. The server handle keeps a single-connection admin pool used to
//! create databases on demand; each database handle is its own pool pointed
//! at `<server>/<database>`. SQLite has no server: the connection string is a
//! directory (or `:memory:`) and every database is a file inside it.

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::time::Duration;
use tracing::info;
use url::Url;

use pt_common::{DatabaseProvider, ResourceKind};

use crate::{ProviderError, Result};

const ADMIN_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const DATABASE_MAX_CONNECTIONS: u32 = 10;

/// SQL flavour, for the few places where syntax differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    MySql,
    Sqlite,
}

impl SqlDialect {
    pub fn for_provider(provider: DatabaseProvider) -> Option<Self> {
        match provider {
            DatabaseProvider::Postgres => Some(SqlDialect::Postgres),
            DatabaseProvider::MySql | DatabaseProvider::MariaDb => Some(SqlDialect::MySql),
            DatabaseProvider::Sqlite => Some(SqlDialect::Sqlite),
            DatabaseProvider::SqlServer
            | DatabaseProvider::CosmosDb
            | DatabaseProvider::MongoDb
            | DatabaseProvider::InMemory => None,
        }
    }

    /// Bind parameter `n` (1-based)
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${}", n),
            SqlDialect::MySql | SqlDialect::Sqlite => "?".to_string(),
        }
    }

    /// Comma-separated placeholders `first..first+count`
    pub fn placeholders(&self, first: usize, count: usize) -> String {
        (first..first + count)
            .map(|n| self.placeholder(n))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub struct RelationalServer {
    pub provider: DatabaseProvider,
    pub dialect: SqlDialect,
    pub name: String,
    connection_string: String,
    admin: Option<AnyPool>,
}

impl RelationalServer {
    /// Validate the server connection string and, for networked engines,
    /// open the admin connection.
    pub async fn connect(
        provider: DatabaseProvider,
        name: &str,
        connection_string: &str,
    ) -> Result<Self> {
        let dialect = SqlDialect::for_provider(provider).ok_or(ProviderError::NotImplemented {
            kind: ResourceKind::Database(provider),
        })?;

        sqlx::any::install_default_drivers();

        let admin = match dialect {
            SqlDialect::Sqlite => None,
            SqlDialect::Postgres | SqlDialect::MySql => {
                let url = server_url(dialect, connection_string).map_err(|e| ProviderError::unavailable(name, e))?;
                let pool = AnyPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(ADMIN_ACQUIRE_TIMEOUT)
                    .connect(&url)
                    .await
                    .map_err(|e| ProviderError::unavailable(name, e))?;
                sqlx::query("SELECT 1")
                    .execute(&pool)
                    .await
                    .map_err(|e| ProviderError::unavailable(name, e))?;
                Some(pool)
            }
        };

        info!(server = name, provider = %provider, "Connected to database server");

        Ok(Self {
            provider,
            dialect,
            name: name.to_string(),
            connection_string: connection_string.to_string(),
            admin,
        })
    }

    /// Open a pool on `database`, creating the database first if the engine
    /// supports it and it does not exist yet.
    pub async fn open_database(&self, database: &str) -> Result<RelationalDatabase> {
        validate_identifier(database)?;

        let url = match self.dialect {
            SqlDialect::Sqlite => {
                let (url, directory) = sqlite_url(&self.connection_string, database);
                if let Some(directory) = directory {
                    tokio::fs::create_dir_all(&directory)
                        .await
                        .map_err(|e| ProviderError::unavailable(database, e))?;
                }
                url
            }
            SqlDialect::Postgres | SqlDialect::MySql => {
                self.ensure_database(database).await?;
                database_url(self.dialect, &self.connection_string, database)
                    .map_err(|e| ProviderError::unavailable(database, e))?
            }
        };

        let pool = AnyPoolOptions::new()
            .max_connections(DATABASE_MAX_CONNECTIONS)
            .connect(&url)
            .await
            .map_err(|e| ProviderError::unavailable(database, e))?;

        info!(server = %self.name, database, "Opened database pool");

        Ok(RelationalDatabase {
            provider: self.provider,
            dialect: self.dialect,
            name: database.to_string(),
            pool,
        })
    }

    async fn ensure_database(&self, database: &str) -> Result<()> {
        let Some(admin) = &self.admin else {
            return Ok(());
        };

        match self.dialect {
            SqlDialect::Postgres => {
                let exists = sqlx::query("SELECT 1 FROM pg_database WHERE datname = $1")
                    .bind(database)
                    .fetch_optional(admin)
                    .await
                    .map_err(|e| ProviderError::unavailable(&self.name, e))?
                    .is_some();
                if exists {
                    return Ok(());
                }

                let sql = format!("CREATE DATABASE \"{}\"", database);
                match sqlx::query(&sql).execute(admin).await {
                    Ok(_) => {
                        info!(server = %self.name, database, "Created database");
                        Ok(())
                    }
                    // 42P04: another instance created it first
                    Err(e) if database_error_code(&e).as_deref() == Some("42P04") => Ok(()),
                    Err(e) => Err(ProviderError::unavailable(&self.name, e)),
                }
            }
            SqlDialect::MySql => {
                let sql = format!("CREATE DATABASE IF NOT EXISTS `{}`", database);
                sqlx::query(&sql)
                    .execute(admin)
                    .await
                    .map_err(|e| ProviderError::unavailable(&self.name, e))?;
                Ok(())
            }
            SqlDialect::Sqlite => Ok(()),
        }
    }
}

pub struct RelationalDatabase {
    pub provider: DatabaseProvider,
    pub dialect: SqlDialect,
    pub name: String,
    pub pool: AnyPool,
}

fn database_error_code(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|e| e.code())
        .map(|code| code.into_owned())
}

/// Database names end up inside DDL, so keep them to a safe alphabet.
fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ProviderError::InvalidName(name.to_string()))
    }
}

fn normalized(dialect: SqlDialect, connection_string: &str) -> std::result::Result<Url, String> {
    let mut url = Url::parse(connection_string).map_err(|e| format!("invalid connection string: {}", e))?;
    let scheme = match dialect {
        SqlDialect::Postgres => "postgres",
        SqlDialect::MySql => "mysql",
        SqlDialect::Sqlite => "sqlite",
    };
    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        return Err(format!("cannot use scheme '{}' for {:?}", url.scheme(), dialect));
    }
    Ok(url)
}

/// URL for the admin connection: the maintenance database on Postgres, no
/// database on MySQL.
fn server_url(dialect: SqlDialect, connection_string: &str) -> std::result::Result<String, String> {
    let mut url = normalized(dialect, connection_string)?;
    match dialect {
        SqlDialect::Postgres => url.set_path("/postgres"),
        _ => url.set_path(""),
    }
    Ok(url.to_string())
}

fn database_url(
    dialect: SqlDialect,
    connection_string: &str,
    database: &str,
) -> std::result::Result<String, String> {
    let mut url = normalized(dialect, connection_string)?;
    url.set_path(&format!("/{}", database));
    Ok(url.to_string())
}

/// SQLite URL for `database` plus the directory that must exist for it.
fn sqlite_url(connection_string: &str, database: &str) -> (String, Option<String>) {
    let location = connection_string
        .strip_prefix("sqlite://")
        .or_else(|| connection_string.strip_prefix("sqlite:"))
        .unwrap_or(connection_string)
        .trim_end_matches('/');

    if location.is_empty() || location == ":memory:" {
        (format!("sqlite://{}?mode=memory&cache=shared", database), None)
    } else {
        (
            format!("sqlite://{}/{}.db?mode=rwc", location, database),
            Some(location.to_string()),
        )
    }
}
