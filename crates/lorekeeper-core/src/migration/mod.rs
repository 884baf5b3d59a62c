//! Schema migrations between stored data versions.
//!
//! A migration is a chain of registered steps walked from the stored version
//! to the configured target. Every run takes a backup first; any step failure
//! restores that backup, and the version stamp is only advanced after the
//! whole chain has applied cleanly.

pub mod validate;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::EntityKind;
use crate::persistence::{LoadOptions, PersistenceManager, SaveOptions};
use crate::store::StructuredStore;

use validate::{validate_entity, Severity};

const META_STORE: &str = "meta";
const VERSION_KEY: &str = "schema_version";

/// Transform applied to each entity payload of one kind during a step.
pub type StepTransform =
    Arc<dyn Fn(EntityKind, serde_json::Value) -> Result<serde_json::Value> + Send + Sync>;

/// One registered migration step.
#[derive(Clone)]
pub struct MigrationStep {
    /// Version the step upgrades from
    pub from: &'static str,
    /// Version the step produces
    pub to: &'static str,
    transform: StepTransform,
}

impl MigrationStep {
    /// Register a step between two adjacent versions.
    pub fn new(
        from: &'static str,
        to: &'static str,
        transform: impl Fn(EntityKind, serde_json::Value) -> Result<serde_json::Value>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            from,
            to,
            transform: Arc::new(transform),
        }
    }
}

/// Ordered set of known migration steps.
#[derive(Clone, Default)]
pub struct MigrationRegistry {
    steps: Vec<MigrationStep>,
}

impl MigrationRegistry {
    /// Empty registry.
    pub const fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Add a step.
    #[must_use]
    pub fn with_step(mut self, step: MigrationStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Walk the step chain from one version to another. Fails when no chain
    /// of registered steps links the two.
    pub fn path(&self, from: &str, to: &str) -> Result<Vec<&MigrationStep>> {
        let mut chain = Vec::new();
        let mut cursor = from;
        while cursor != to {
            let Some(step) = self.steps.iter().find(|step| step.from == cursor) else {
                return Err(Error::NoMigrationPath {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            };
            cursor = step.to;
            chain.push(step);
            if chain.len() > self.steps.len() {
                return Err(Error::NoMigrationPath {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }
        Ok(chain)
    }
}

/// The built-in upgrade chain for this application's data.
pub fn default_registry() -> MigrationRegistry {
    MigrationRegistry::new()
        .with_step(MigrationStep::new("1.0.0", "1.1.0", |kind, mut value| {
            if let Some(object) = value.as_object_mut() {
                match kind {
                    // Characters gain an explicit role.
                    EntityKind::Character => {
                        object
                            .entry("characterType")
                            .or_insert_with(|| serde_json::Value::String("PC".to_string()));
                    }
                    // Sessions gain an ordinal.
                    EntityKind::Session => {
                        object
                            .entry("session_number")
                            .or_insert_with(|| serde_json::Value::from(0));
                    }
                    EntityKind::Campaign | EntityKind::Preferences => {}
                }
            }
            Ok(value)
        }))
        .with_step(MigrationStep::new("1.1.0", "1.2.0", |kind, mut value| {
            if let Some(object) = value.as_object_mut() {
                match kind {
                    // Characters gain an ability-score block.
                    EntityKind::Character => {
                        object.entry("stats").or_insert_with(|| {
                            serde_json::json!({
                                "strength": 10, "dexterity": 10, "constitution": 10,
                                "intelligence": 10, "wisdom": 10, "charisma": 10,
                            })
                        });
                    }
                    // Campaigns gain a game-system label.
                    EntityKind::Campaign => {
                        object
                            .entry("game_system")
                            .or_insert_with(|| serde_json::Value::String(String::new()));
                    }
                    EntityKind::Session | EntityKind::Preferences => {}
                }
            }
            Ok(value)
        }))
}

/// What a migration run did.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub from: String,
    pub to: String,
    /// Versions passed through, `from` excluded
    pub steps: Vec<String>,
    pub entities_migrated: u64,
    /// Id of the safety backup taken before the run
    pub backup_id: String,
}

#[derive(Serialize, Deserialize)]
struct VersionStamp {
    version: String,
    stamped_at: chrono::DateTime<chrono::Utc>,
}

/// Runs registered migrations over the persisted data.
#[derive(Clone)]
pub struct MigrationManager {
    persistence: PersistenceManager,
    structured: StructuredStore,
    registry: MigrationRegistry,
}

impl MigrationManager {
    /// Wire the manager over the persistence layer.
    pub fn new(
        persistence: PersistenceManager,
        structured: StructuredStore,
        registry: MigrationRegistry,
    ) -> Self {
        Self {
            persistence,
            structured,
            registry,
        }
    }

    /// The version the stored data was last written under. `None` on a fresh
    /// database.
    pub async fn stored_version(&self) -> Result<Option<String>> {
        match self.structured.get(META_STORE, VERSION_KEY).await? {
            Some(payload) => {
                let stamp: VersionStamp = serde_json::from_str(&payload)?;
                Ok(Some(stamp.version))
            }
            None => Ok(None),
        }
    }

    /// Whether the stored data is behind the configured target version.
    pub async fn needs_migration(&self) -> Result<bool> {
        let target = &self.persistence.config().schema_version;
        Ok(self
            .stored_version()
            .await?
            .is_some_and(|stored| &stored != target))
    }

    /// Bring the stored data up to the configured target version.
    ///
    /// A fresh database is stamped with the target directly. Otherwise the
    /// registry's chain is applied step by step; the first failing step
    /// restores the pre-run backup and aborts.
    pub async fn migrate(&self) -> Result<Option<MigrationReport>> {
        let target = self.persistence.config().schema_version.clone();
        let Some(stored) = self.stored_version().await? else {
            self.stamp_version(&target).await?;
            tracing::info!("Fresh database stamped at {target}");
            return Ok(None);
        };
        if stored == target {
            return Ok(None);
        }

        // Resolve the chain before touching any data.
        let chain: Vec<MigrationStep> = self
            .registry
            .path(&stored, &target)?
            .into_iter()
            .cloned()
            .collect();
        tracing::info!(
            "Migrating {stored} -> {target} in {} step(s)",
            chain.len()
        );

        let backup = self.persistence.create_backup("pre-migration").await?;
        let mut entities_migrated = 0;
        let mut steps = Vec::new();

        for step in &chain {
            match self.apply_step(step).await {
                Ok(count) => {
                    entities_migrated += count;
                    steps.push(step.to.to_string());
                }
                Err(error) => {
                    tracing::error!(
                        "Step {} -> {} failed: {error}; restoring pre-migration backup",
                        step.from,
                        step.to
                    );
                    self.persistence.restore_from_backup(&backup).await?;
                    return Err(Error::MigrationStep {
                        from: step.from.to_string(),
                        to: step.to.to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }

        self.stamp_version(&target).await?;
        Ok(Some(MigrationReport {
            from: stored,
            to: target,
            steps,
            entities_migrated,
            backup_id: backup.metadata.id.clone(),
        }))
    }

    async fn apply_step(&self, step: &MigrationStep) -> Result<u64> {
        let mut migrated = 0;
        for kind in EntityKind::ALL {
            for id in self.persistence.entity_ids(kind).await? {
                let Some(data) = self
                    .persistence
                    .load(kind, &id, LoadOptions::default())
                    .await?
                else {
                    continue;
                };
                let transformed = (step.transform)(kind, data)?;

                // A step must not leave an entity structurally broken.
                let critical = validate_entity(kind, &id, &transformed)
                    .into_iter()
                    .find(|issue| issue.severity == Severity::Critical);
                if let Some(issue) = critical {
                    return Err(Error::InvalidInput(format!(
                        "transformed {kind}/{id} failed validation: {}",
                        issue.message
                    )));
                }

                self.persistence
                    .save(
                        kind,
                        &id,
                        &transformed,
                        SaveOptions {
                            skip_offline_queue: true,
                            ..SaveOptions::default()
                        },
                    )
                    .await?;
                migrated += 1;
            }
        }
        Ok(migrated)
    }

    async fn stamp_version(&self, version: &str) -> Result<()> {
        let stamp = VersionStamp {
            version: version.to_string(),
            stamped_at: chrono::Utc::now(),
        };
        let payload = serde_json::to_string(&stamp)?;
        self.structured.put(META_STORE, VERSION_KEY, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::{default_schema, MemoryKvStore};
    use crate::sync::{ConnectionStatus, SyncQueue};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> (MigrationManager, PersistenceManager) {
        let structured = StructuredStore::open_in_memory(default_schema(), 1024 * 1024)
            .await
            .unwrap();
        let config = StoreConfig::default();
        let queue = SyncQueue::new(structured.clone(), config.offline_storage_limit);
        let persistence = PersistenceManager::new(
            structured.clone(),
            Arc::new(MemoryKvStore::new()),
            queue,
            ConnectionStatus::new(true),
            config,
        );
        let manager = MigrationManager::new(persistence.clone(), structured, default_registry());
        (manager, persistence)
    }

    #[test]
    fn registry_walks_multi_step_chains() {
        let registry = default_registry();
        let path = registry.path("1.0.0", "1.2.0").unwrap();
        let versions: Vec<&str> = path.iter().map(|step| step.to).collect();
        assert_eq!(versions, vec!["1.1.0", "1.2.0"]);
    }

    #[test]
    fn registry_rejects_unknown_versions() {
        let registry = default_registry();
        assert!(matches!(
            registry.path("0.9.0", "1.2.0"),
            Err(Error::NoMigrationPath { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fresh_database_is_stamped_without_migrating() {
        let (manager, _) = setup().await;
        assert_eq!(manager.stored_version().await.unwrap(), None);
        assert_eq!(manager.migrate().await.unwrap().map(|r| r.steps), None);
        assert_eq!(
            manager.stored_version().await.unwrap().as_deref(),
            Some("1.2.0")
        );
        assert!(!manager.needs_migration().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn chain_upgrades_old_entities() {
        let (manager, persistence) = setup().await;
        manager.stamp_version("1.0.0").await.unwrap();

        // A 1.0.0-era character: no characterType, no stats.
        persistence
            .save(
                EntityKind::Character,
                "ch1",
                &json!({"id": "ch1", "campaign_id": "c1", "name": "Tharn"}),
                SaveOptions::default(),
            )
            .await
            .unwrap();
        persistence
            .save(
                EntityKind::Campaign,
                "c1",
                &json!({"id": "c1", "title": "Iron Keep"}),
                SaveOptions::default(),
            )
            .await
            .unwrap();

        let report = manager.migrate().await.unwrap().unwrap();
        assert_eq!(report.from, "1.0.0");
        assert_eq!(report.to, "1.2.0");
        assert_eq!(report.steps, vec!["1.1.0", "1.2.0"]);

        let character = persistence
            .load(EntityKind::Character, "ch1", LoadOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(character["characterType"], "PC");
        assert_eq!(character["stats"]["strength"], 10);

        let campaign = persistence
            .load(EntityKind::Campaign, "c1", LoadOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(campaign["game_system"], "");

        assert_eq!(
            manager.stored_version().await.unwrap().as_deref(),
            Some("1.2.0")
        );
        // Existing values were left alone where present.
        assert_eq!(campaign["title"], "Iron Keep");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn migration_takes_a_safety_backup() {
        let (manager, persistence) = setup().await;
        manager.stamp_version("1.1.0").await.unwrap();
        persistence
            .save(
                EntityKind::Campaign,
                "c1",
                &json!({"id": "c1", "title": "Iron Keep"}),
                SaveOptions::default(),
            )
            .await
            .unwrap();

        manager.migrate().await.unwrap().unwrap();
        let backups = persistence.list_backups().await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].label, "pre-migration");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_step_rolls_back_and_keeps_version() {
        let structured = StructuredStore::open_in_memory(default_schema(), 1024 * 1024)
            .await
            .unwrap();
        let config = StoreConfig {
            schema_version: "2.0.0".to_string(),
            ..StoreConfig::default()
        };
        let queue = SyncQueue::new(structured.clone(), config.offline_storage_limit);
        let persistence = PersistenceManager::new(
            structured.clone(),
            Arc::new(MemoryKvStore::new()),
            queue,
            ConnectionStatus::new(true),
            config,
        );
        let registry = MigrationRegistry::new().with_step(MigrationStep::new(
            "1.2.0",
            "2.0.0",
            |_, _| Err(Error::InvalidInput("poisoned step".to_string())),
        ));
        let manager = MigrationManager::new(persistence.clone(), structured, registry);
        manager.stamp_version("1.2.0").await.unwrap();

        persistence
            .save(
                EntityKind::Campaign,
                "c1",
                &json!({"id": "c1", "title": "Iron Keep"}),
                SaveOptions::default(),
            )
            .await
            .unwrap();

        let error = manager.migrate().await;
        assert!(matches!(error, Err(Error::MigrationStep { .. })));

        // Data survived and the stamp did not move.
        let campaign = persistence
            .load(EntityKind::Campaign, "c1", LoadOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(campaign["title"], "Iron Keep");
        assert_eq!(
            manager.stored_version().await.unwrap().as_deref(),
            Some("1.2.0")
        );
    }
}
