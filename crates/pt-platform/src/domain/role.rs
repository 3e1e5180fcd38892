//! Roles
//!
//! A role is a named bag of permission strings. The privileged role has a
//! fixed id so every instance can look it up without coordination.

use serde::{Deserialize, Serialize};

use super::{AuditStamps, DomainError, Entity};

/// Well-known id of the privileged role
pub const GLOBAL_ADMINISTRATOR_ROLE_ID: &str = "01J3FNSAXYKYDKB38EAC3AJ11M";
pub const GLOBAL_ADMINISTRATOR_ROLE_NAME: &str = "GlobalAdministrator";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(flatten)]
    pub audit: AuditStamps,
}

impl Role {
    /// New role; the id is assigned on first commit.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            description: description.into(),
            permissions: Vec::new(),
            audit: AuditStamps::default(),
        }
    }

    /// The privileged role, carrying the given permission set.
    pub fn global_administrator(permissions: Vec<String>) -> Self {
        Self {
            id: GLOBAL_ADMINISTRATOR_ROLE_ID.to_string(),
            name: GLOBAL_ADMINISTRATOR_ROLE_NAME.to_string(),
            description: "Global Administrator".to_string(),
            permissions,
            audit: AuditStamps::default(),
        }
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn is_global_administrator(&self) -> bool {
        self.id == GLOBAL_ADMINISTRATOR_ROLE_ID
    }

    /// Rename, unless this is the privileged role.
    pub fn rename(&mut self, name: impl Into<String>) -> Result<(), DomainError> {
        if self.is_global_administrator() {
            return Err(DomainError::NameLocked(self.name.clone()));
        }
        self.name = name.into();
        Ok(())
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

impl Entity for Role {
    const ENTITY_TYPE: &'static str = "Role";
    const GENERATED_ID: bool = true;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn unique_key(&self) -> Option<String> {
        Some(self.name.clone())
    }

    fn audit(&self) -> &AuditStamps {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditStamps {
        &mut self.audit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privileged_role_cannot_be_renamed() {
        let mut role = Role::global_administrator(vec![]);
        assert_eq!(
            role.rename("Root"),
            Err(DomainError::NameLocked("GlobalAdministrator".to_string()))
        );
        assert_eq!(role.name, GLOBAL_ADMINISTRATOR_ROLE_NAME);

        let mut editor = Role::new("Editor", "Edits things");
        editor.rename("Author").unwrap();
        assert_eq!(editor.name, "Author");
    }

    #[test]
    fn test_serialized_shape() {
        let role = Role::global_administrator(vec!["Role:Read".to_string()]);
        let value = serde_json::to_value(&role).unwrap();

        assert_eq!(value["id"], GLOBAL_ADMINISTRATOR_ROLE_ID);
        assert_eq!(value["permissions"][0], "Role:Read");
        assert!(value.get("createdAt").is_some());
        assert!(value.get("audit").is_none());
    }
}
