//! Schema migrations for Entwine storage backends
//!
//! Provides version tracking and migration functions for on-disk layout changes.

use crate::StorageResult;

/// Current on-disk layout version
pub const CURRENT_VERSION: u32 = 1;

/// Layout migration information
#[derive(Debug, Clone)]
pub struct SchemaVersion {
    pub version: u32,
    pub description: &'static str,
}

/// All layout versions with their migrations
pub fn get_migrations() -> Vec<SchemaVersion> {
    vec![
        SchemaVersion {
            version: 1,
            description: "Entities keyed by (type, id) with per-type id sequences",
        },
    ]
}

/// Migration trait for storage backends
pub trait Migratable {
    /// Get the current layout version from storage; 0 for a fresh store
    fn get_schema_version(&self) -> StorageResult<u32>;

    /// Set the layout version in storage
    fn set_schema_version(&self, version: u32) -> StorageResult<()>;

    /// Run migrations from current version to target version
    fn migrate_to(&self, target_version: u32) -> StorageResult<()> {
        let current = self.get_schema_version()?;

        if current == target_version {
            tracing::debug!("Storage already at version {}", target_version);
            return Ok(());
        }

        if current > target_version {
            tracing::warn!(
                "Storage version {} is newer than target {}. Downgrades not supported.",
                current,
                target_version
            );
            return Ok(());
        }

        tracing::info!("Migrating storage from v{} to v{}", current, target_version);

        for version in (current + 1)..=target_version {
            self.run_migration(version)?;
            self.set_schema_version(version)?;
            tracing::info!("Migrated to storage version {}", version);
        }

        Ok(())
    }

    /// Run a specific migration
    fn run_migration(&self, version: u32) -> StorageResult<()>;

    /// Migrate to the latest version
    fn migrate_to_latest(&self) -> StorageResult<()> {
        self.migrate_to(CURRENT_VERSION)
    }
}
