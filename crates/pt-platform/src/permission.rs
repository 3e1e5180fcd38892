//! Permissions
//!
//! Permissions are derived from a static table of entity kinds and the
//! actions allowed on them, formatted `"{Entity}:{Action}"`.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::domain::role::GLOBAL_ADMINISTRATOR_ROLE_NAME;
use crate::domain::Role;
use crate::persistence::PersistenceError;
use crate::store::DataStore;

/// Actions allowed on one entity kind
pub struct EntityPermissions {
    pub entity: &'static str,
    pub actions: &'static [&'static str],
}

impl EntityPermissions {
    pub fn names(&self) -> impl Iterator<Item = String> + '_ {
        self.actions
            .iter()
            .map(move |action| permission_name(self.entity, action))
    }
}

pub const USER_PROFILE: EntityPermissions = EntityPermissions {
    entity: "UserProfile",
    actions: &["Create", "Read", "Update", "Delete", "ManageRoles"],
};

pub const ROLE: EntityPermissions = EntityPermissions {
    entity: "Role",
    actions: &["Create", "Read", "Update", "Delete", "ManagePermissions"],
};

pub const EMAIL_TEMPLATE: EntityPermissions = EntityPermissions {
    entity: "EmailTemplate",
    actions: &["Create", "Read", "Update", "Delete"],
};

/// Every entity kind that carries permissions
pub const ENTITY_PERMISSIONS: &[EntityPermissions] = &[USER_PROFILE, ROLE, EMAIL_TEMPLATE];

pub fn permission_name(entity: &str, action: &str) -> String {
    format!("{}:{}", entity, action)
}

/// Source of the full permission set the system knows about.
pub trait PermissionRegistry: Send + Sync {
    fn all_known_permissions(&self) -> Vec<String>;
}

/// Registry backed by [`ENTITY_PERMISSIONS`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticPermissionRegistry;

impl PermissionRegistry for StaticPermissionRegistry {
    fn all_known_permissions(&self) -> Vec<String> {
        ENTITY_PERMISSIONS.iter().flat_map(|e| e.names()).collect()
    }
}

/// Resolves the effective permissions of a set of role names.
pub struct PermissionService {
    store: DataStore,
    registry: Arc<dyn PermissionRegistry>,
}

impl PermissionService {
    pub fn new(store: DataStore, registry: Arc<dyn PermissionRegistry>) -> Self {
        Self { store, registry }
    }

    /// The privileged role grants everything; other roles grant the union
    /// of their stored permissions. Unknown role names grant nothing.
    pub async fn permissions_for_roles(
        &self,
        role_names: &[String],
    ) -> Result<BTreeSet<String>, PersistenceError> {
        if role_names.iter().any(|r| r == GLOBAL_ADMINISTRATOR_ROLE_NAME) {
            return Ok(self.registry.all_known_permissions().into_iter().collect());
        }

        let mut permissions = BTreeSet::new();
        for name in role_names {
            if let Some(role) = self.store.find_by_unique_key::<Role>(name).await? {
                permissions.extend(role.permissions);
            }
        }
        Ok(permissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_registry() {
        let all = StaticPermissionRegistry.all_known_permissions();

        assert_eq!(all.len(), 14);
        assert_eq!(all[0], "UserProfile:Create");
        assert!(all.contains(&"UserProfile:ManageRoles".to_string()));
        assert!(all.contains(&"Role:ManagePermissions".to_string()));
        assert!(all.contains(&"EmailTemplate:Delete".to_string()));
        assert!(!all.contains(&"EmailTemplate:ManageRoles".to_string()));
    }
}
