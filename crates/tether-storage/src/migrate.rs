//! Forward-only schema migrations for stored snapshots.
//!
//! A migration is registered for the version it produces. Loading a snapshot
//! stored at version `v` with a running schema version `c > v` applies the
//! migrations for `v+1 ..= c` in order, then stamps `c`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::{PersistedSnapshot, Slices, SnapshotStage, StorageResult};

pub type Migration = Arc<dyn Fn(Slices) -> anyhow::Result<Slices> + Send + Sync>;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("no migration registered for schema version {version}")]
    Missing { version: u32 },
    #[error("migration registered for version {version} beyond current schema version {current}")]
    BeyondCurrent { version: u32, current: u32 },
    #[error("stored schema version {stored} is newer than running schema version {current}")]
    FutureVersion { stored: u32, current: u32 },
    #[error("migration to schema version {version} failed: {source}")]
    Failed {
        version: u32,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Clone)]
pub struct MigrationChain {
    current: u32,
    migrations: BTreeMap<u32, Migration>,
}

impl fmt::Debug for MigrationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationChain")
            .field("current", &self.current)
            .field("versions", &self.migrations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MigrationChain {
    pub fn new(current: u32) -> Self {
        Self {
            current,
            migrations: BTreeMap::new(),
        }
    }

    /// Build from an ordered list: element `i` produces version `i + 1`.
    pub fn from_list(current: u32, migrations: Vec<Migration>) -> Result<Self, MigrationError> {
        let mut chain = Self::new(current);
        for (index, migration) in migrations.into_iter().enumerate() {
            chain.register(index as u32 + 1, migration)?;
        }
        Ok(chain)
    }

    pub fn register(&mut self, version: u32, migration: Migration) -> Result<(), MigrationError> {
        if version == 0 || version > self.current {
            return Err(MigrationError::BeyondCurrent {
                version,
                current: self.current,
            });
        }
        self.migrations.insert(version, migration);
        Ok(())
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// Check that every step from `stored` up to the current version exists.
    pub fn validate_from(&self, stored: u32) -> Result<(), MigrationError> {
        if stored > self.current {
            return Err(MigrationError::FutureVersion {
                stored,
                current: self.current,
            });
        }
        for version in stored + 1..=self.current {
            if !self.migrations.contains_key(&version) {
                return Err(MigrationError::Missing { version });
            }
        }
        Ok(())
    }

    pub fn migrate(&self, snapshot: PersistedSnapshot) -> Result<PersistedSnapshot, MigrationError> {
        let stored = snapshot.schema_version;
        self.validate_from(stored)?;
        let mut slices = snapshot.slices;
        for (version, migration) in self.migrations.range(stored + 1..=self.current) {
            log::info!("migrating stored snapshot to schema version {version}");
            slices = migration(slices).map_err(|source| MigrationError::Failed {
                version: *version,
                source,
            })?;
        }
        Ok(PersistedSnapshot::new(self.current, slices))
    }
}

impl SnapshotStage for MigrationChain {
    fn name(&self) -> &'static str {
        "migrate"
    }

    fn on_load(&self, snapshot: PersistedSnapshot) -> StorageResult<PersistedSnapshot> {
        Ok(self.migrate(snapshot)?)
    }

    fn on_save(&self, mut snapshot: PersistedSnapshot) -> StorageResult<PersistedSnapshot> {
        snapshot.schema_version = self.current;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn add_active() -> Migration {
        Arc::new(|mut slices: Slices| {
            if let Some(Value::Object(user)) = slices.get_mut("user") {
                user.insert("active".into(), json!(true));
            }
            Ok(slices)
        })
    }

    fn rename_name_to_display() -> Migration {
        Arc::new(|mut slices: Slices| {
            if let Some(Value::Object(user)) = slices.get_mut("user") {
                if let Some(name) = user.remove("name") {
                    user.insert("display".into(), name);
                }
            }
            Ok(slices)
        })
    }

    fn v0() -> PersistedSnapshot {
        let mut slices = Slices::new();
        slices.insert("user".into(), json!({ "name": "x" }));
        PersistedSnapshot::new(0, slices)
    }

    #[test]
    fn single_migration_adds_field_and_stamps_version() {
        let chain = MigrationChain::from_list(1, vec![add_active()]).unwrap();
        let migrated = chain.migrate(v0()).unwrap();
        assert_eq!(migrated.schema_version, 1);
        assert_eq!(migrated.slices["user"], json!({ "name": "x", "active": true }));
    }

    #[test]
    fn chain_equals_sequential_application() {
        let chain = MigrationChain::from_list(2, vec![add_active(), rename_name_to_display()]).unwrap();
        let migrated = chain.migrate(v0()).unwrap();

        let direct = rename_name_to_display()(add_active()(v0().slices).unwrap()).unwrap();
        assert_eq!(migrated.slices, direct);
        assert_eq!(migrated.schema_version, 2);
    }

    #[test]
    fn only_newer_migrations_run() {
        let chain = MigrationChain::from_list(2, vec![add_active(), rename_name_to_display()]).unwrap();
        let mut stored = v0();
        stored.schema_version = 1;
        let migrated = chain.migrate(stored).unwrap();
        assert_eq!(migrated.slices["user"], json!({ "display": "x" }));
    }

    #[test]
    fn current_snapshot_is_untouched() {
        let chain = MigrationChain::new(0);
        assert_eq!(chain.migrate(v0()).unwrap(), v0());
    }

    #[test]
    fn missing_intermediate_migration_is_fatal() {
        let mut chain = MigrationChain::new(3);
        chain.register(1, add_active()).unwrap();
        chain.register(3, add_active()).unwrap();
        let err = chain.migrate(v0()).unwrap_err();
        assert!(matches!(err, MigrationError::Missing { version: 2 }));
    }

    #[test]
    fn newer_stored_version_is_rejected() {
        let chain = MigrationChain::new(1);
        let mut stored = v0();
        stored.schema_version = 4;
        assert!(matches!(
            chain.migrate(stored),
            Err(MigrationError::FutureVersion { stored: 4, current: 1 })
        ));
    }

    #[test]
    fn migration_beyond_current_is_rejected() {
        assert!(matches!(
            MigrationChain::from_list(0, vec![add_active()]),
            Err(MigrationError::BeyondCurrent { version: 1, current: 0 })
        ));
    }

    #[test]
    fn failing_migration_reports_version() {
        let failing: Migration = Arc::new(|_| Err(anyhow::anyhow!("bad data")));
        let chain = MigrationChain::from_list(2, vec![add_active(), failing]).unwrap();
        let err = chain.migrate(v0()).unwrap_err();
        assert!(matches!(err, MigrationError::Failed { version: 2, .. }));
    }
}
