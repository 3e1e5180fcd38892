//! Domain entities
//!
//! Every persisted type implements [`Entity`], which is all the unit of work
//! needs to assign keys, stamp audit times and publish change events.

pub mod email_template;
pub mod role;
pub mod user_profile;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use email_template::EmailTemplate;
pub use role::Role;
pub use user_profile::UserProfile;

/// Creation and last-modification times.
///
/// Both are `None` until the entity is first committed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStamps {
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A persisted domain type.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Type name used for storage and in published events
    const ENTITY_TYPE: &'static str;

    /// Whether an empty id is replaced by a time-ordered id on insert
    const GENERATED_ID: bool = false;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    /// Value that must be unique among entities of this type
    fn unique_key(&self) -> Option<String> {
        None
    }

    fn audit(&self) -> &AuditStamps;

    fn audit_mut(&mut self) -> &mut AuditStamps;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Role '{0}' cannot be renamed")]
    NameLocked(String),

    #[error("Template must be at least {min} characters, got {actual}")]
    TemplateTooShort { min: usize, actual: usize },
}
