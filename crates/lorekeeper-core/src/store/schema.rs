//! Named-store schema configuration for the structured store.

/// Secondary index over a JSON field of the stored payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index column name
    pub name: &'static str,
    /// JSON pointer into the payload, e.g. `$.data.campaign_id`
    pub json_path: &'static str,
}

/// A named store and its secondary indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSchema {
    /// Store (table) name
    pub name: &'static str,
    /// Secondary indexes extracted from the payload at write time
    pub indexes: &'static [IndexSpec],
}

impl StoreSchema {
    /// Store without secondary indexes.
    pub const fn plain(name: &'static str) -> Self {
        Self { name, indexes: &[] }
    }
}

const CHARACTER_INDEXES: &[IndexSpec] = &[
    IndexSpec {
        name: "campaign_id",
        json_path: "$.data.campaign_id",
    },
    IndexSpec {
        name: "character_type",
        json_path: "$.data.characterType",
    },
];

const SESSION_INDEXES: &[IndexSpec] = &[
    IndexSpec {
        name: "campaign_id",
        json_path: "$.data.campaign_id",
    },
    IndexSpec {
        name: "timestamp",
        json_path: "$.timestamp",
    },
];

const QUEUE_INDEXES: &[IndexSpec] = &[
    IndexSpec {
        name: "entity_type",
        json_path: "$.entity_type",
    },
    IndexSpec {
        name: "entity_id",
        json_path: "$.entity_id",
    },
];

const HISTORY_INDEXES: &[IndexSpec] = &[IndexSpec {
    name: "entity_id",
    json_path: "$.entity_id",
}];

/// The full set of stores the structured database carries.
pub fn default_schema() -> Vec<StoreSchema> {
    vec![
        StoreSchema::plain("campaigns"),
        StoreSchema {
            name: "characters",
            indexes: CHARACTER_INDEXES,
        },
        StoreSchema {
            name: "sessions",
            indexes: SESSION_INDEXES,
        },
        StoreSchema::plain("preferences"),
        StoreSchema::plain("ai_cache"),
        StoreSchema {
            name: "sync_queue",
            indexes: QUEUE_INDEXES,
        },
        StoreSchema::plain("sync_conflicts"),
        StoreSchema {
            name: "version_history",
            indexes: HISTORY_INDEXES,
        },
        StoreSchema::plain("backups"),
        StoreSchema::plain("backup_metadata"),
        StoreSchema::plain("meta"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schema_names_required_stores() {
        let schema = default_schema();
        let names: Vec<&str> = schema.iter().map(|store| store.name).collect();
        for required in [
            "campaigns",
            "characters",
            "sessions",
            "ai_cache",
            "sync_queue",
            "sync_conflicts",
            "version_history",
            "backups",
            "backup_metadata",
        ] {
            assert!(names.contains(&required), "missing store {required}");
        }
    }

    #[test]
    fn characters_are_indexed_by_campaign_and_type() {
        let schema = default_schema();
        let characters = schema
            .iter()
            .find(|store| store.name == "characters")
            .unwrap();
        let index_names: Vec<&str> = characters.indexes.iter().map(|index| index.name).collect();
        assert!(index_names.contains(&"campaign_id"));
        assert!(index_names.contains(&"character_type"));
    }
}
