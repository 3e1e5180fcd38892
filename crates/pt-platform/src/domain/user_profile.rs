use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::role::GLOBAL_ADMINISTRATOR_ROLE_ID;
use super::{AuditStamps, Entity};

/// Well-known development accounts: (id, name, email, is administrator)
pub const DEVELOPMENT_ACCOUNTS: [(&str, &str, &str, bool); 2] = [
    (
        "4592defe-abdf-43bd-833d-4dede705b5aa",
        "Administrator",
        "test-user-1@test.com",
        true,
    ),
    (
        "ef8ba546-2efc-4347-b81e-4a0210b9b7a3",
        "User",
        "test-user-2@test.com",
        false,
    ),
];

/// A user known to the platform. The id is the identity provider's subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    /// Role ids
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub audit: AuditStamps,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: name.into(),
            roles: Vec::new(),
            deleted_at: None,
            audit: AuditStamps::default(),
        }
    }

    pub fn with_role(mut self, role_id: impl Into<String>) -> Self {
        self.roles.push(role_id.into());
        self
    }

    /// The seeded development accounts
    pub fn development_accounts() -> Vec<UserProfile> {
        DEVELOPMENT_ACCOUNTS
            .iter()
            .map(|(id, name, email, admin)| {
                let user = UserProfile::new(*id, *email, *name);
                if *admin {
                    user.with_role(GLOBAL_ADMINISTRATOR_ROLE_ID)
                } else {
                    user
                }
            })
            .collect()
    }

    /// Soft delete; the row is purged later by the worker.
    pub fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
    }

    pub fn is_due_for_purge(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_some_and(|at| at <= now)
    }
}

impl Entity for UserProfile {
    const ENTITY_TYPE: &'static str = "UserProfile";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn unique_key(&self) -> Option<String> {
        Some(self.email.to_ascii_lowercase())
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
    use chrono::Duration;

    #[test]
    fn test_development_accounts() {
        let accounts = UserProfile::development_accounts();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].roles, vec![GLOBAL_ADMINISTRATOR_ROLE_ID.to_string()]);
        assert!(accounts[1].roles.is_empty());
        assert_eq!(accounts[1].email, "test-user-2@test.com");
    }

    #[test]
    fn test_purge_due_only_after_deletion_time() {
        let now = Utc::now();
        let mut user = UserProfile::new("u-1", "a@b.c", "A");
        assert!(!user.is_due_for_purge(now));

        user.mark_deleted(now + Duration::hours(1));
        assert!(!user.is_due_for_purge(now));
        assert!(user.is_due_for_purge(now + Duration::hours(2)));
    }

    #[test]
    fn test_email_key_is_case_insensitive() {
        let user = UserProfile::new("u-1", "Someone@Example.COM", "Someone");
        assert_eq!(user.unique_key().as_deref(), Some("someone@example.com"));
    }
}
