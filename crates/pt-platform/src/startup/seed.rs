use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{Entity, Role, UserProfile};
use crate::permission::PermissionRegistry;
use crate::store::DataStore;

use super::StartupError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub role_created: bool,
    pub accounts_created: usize,
}

/// Inserts the baseline records every deployment needs. Existing records are
/// never modified, so running this on every start is safe.
pub struct SeedCoordinator {
    store: DataStore,
    permissions: Arc<dyn PermissionRegistry>,
    development: bool,
}

impl SeedCoordinator {
    pub fn new(store: DataStore, permissions: Arc<dyn PermissionRegistry>, development: bool) -> Self {
        Self {
            store,
            permissions,
            development,
        }
    }

    pub async fn ensure_baseline(&self) -> Result<SeedReport, StartupError> {
        let mut report = SeedReport::default();

        let role = Role::global_administrator(self.permissions.all_known_permissions());
        report.role_created = self.insert_if_absent(role).await?;

        if self.development {
            for account in UserProfile::development_accounts() {
                if self.insert_if_absent(account).await? {
                    report.accounts_created += 1;
                }
            }
        }

        info!(
            role_created = report.role_created,
            accounts_created = report.accounts_created,
            development = self.development,
            "Baseline data ensured"
        );
        Ok(report)
    }

    /// `true` if this call inserted the record. A concurrent insert by a
    /// peer surfaces as a conflict and counts as present.
    async fn insert_if_absent<T: Entity>(&self, entity: T) -> Result<bool, StartupError> {
        let id = entity.id().to_string();

        if self
            .store
            .find::<T>(&id)
            .await
            .map_err(StartupError::SeedLookup)?
            .is_some()
        {
            return Ok(false);
        }

        let mut uow = self.store.begin_unit_of_work();
        uow.add(entity);
        match uow.commit().await {
            Ok(_) => {
                info!(entity_type = T::ENTITY_TYPE, entity_id = %id, "Seeded record");
                Ok(true)
            }
            Err(e) if e.is_conflict() => {
                warn!(
                    entity_type = T::ENTITY_TYPE,
                    entity_id = %id,
                    error = %e,
                    "SeedConflict: record inserted concurrently, treating as present"
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

