//! Campaign-manager entity models.
//!
//! Entities are a tagged union rather than untyped blobs so every store and
//! validator can match exhaustively on the kind.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inclusive lower bound for ability scores.
pub const STAT_MIN: i32 = 1;
/// Inclusive upper bound for ability scores.
pub const STAT_MAX: i32 = 30;

/// Entity kind discriminant, used as the store selector and the sync
/// endpoint path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Top-level campaign
    Campaign,
    /// Player character, NPC, or monster
    Character,
    /// Play session
    Session,
    /// App preferences
    Preferences,
}

impl EntityKind {
    /// Name of the structured store holding this kind.
    pub const fn store_name(self) -> &'static str {
        match self {
            Self::Campaign => "campaigns",
            Self::Character => "characters",
            Self::Session => "sessions",
            Self::Preferences => "preferences",
        }
    }

    /// Path segment used by the remote sync endpoint.
    pub const fn path_segment(self) -> &'static str {
        self.store_name()
    }

    /// All kinds that hold user data (preferences included).
    pub const ALL: [Self; 4] = [
        Self::Campaign,
        Self::Character,
        Self::Session,
        Self::Preferences,
    ];
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.store_name())
    }
}

impl FromStr for EntityKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "campaigns" | "campaign" => Ok(Self::Campaign),
            "characters" | "character" => Ok(Self::Character),
            "sessions" | "session" => Ok(Self::Session),
            "preferences" => Ok(Self::Preferences),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown entity kind: {other}"
            ))),
        }
    }
}

/// A campaign: the top-level container everything else hangs off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    /// Unique identifier
    pub id: String,
    /// Campaign title
    pub title: String,
    /// Free-text description
    #[serde(default)]
    pub description: String,
    /// Game system, e.g. "D&D 5e"
    #[serde(default)]
    pub game_system: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Create a new campaign with a fresh id.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: String::new(),
            game_system: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Character role within a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum CharacterType {
    /// Player character
    #[default]
    Pc,
    /// Non-player character
    Npc,
    /// Monster / adversary
    Monster,
}

/// The six classic ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterStats {
    pub strength: i32,
    pub dexterity: i32,
    pub constitution: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub charisma: i32,
}

impl Default for CharacterStats {
    fn default() -> Self {
        Self {
            strength: 10,
            dexterity: 10,
            constitution: 10,
            intelligence: 10,
            wisdom: 10,
            charisma: 10,
        }
    }
}

impl CharacterStats {
    /// Iterate named scores, for validation and repair.
    pub fn scores(&self) -> [(&'static str, i32); 6] {
        [
            ("strength", self.strength),
            ("dexterity", self.dexterity),
            ("constitution", self.constitution),
            ("intelligence", self.intelligence),
            ("wisdom", self.wisdom),
            ("charisma", self.charisma),
        ]
    }
}

/// A character sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    /// Unique identifier
    pub id: String,
    /// Owning campaign
    pub campaign_id: String,
    /// Character name
    pub name: String,
    /// Role within the campaign
    #[serde(rename = "characterType", default)]
    pub character_type: CharacterType,
    /// Character level
    #[serde(default = "default_level")]
    pub level: u32,
    /// Ability scores
    #[serde(default)]
    pub stats: CharacterStats,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

const fn default_level() -> u32 {
    1
}

impl Character {
    /// Create a new character in the given campaign.
    pub fn new(campaign_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            campaign_id: campaign_id.into(),
            name: name.into(),
            character_type: CharacterType::default(),
            level: 1,
            stats: CharacterStats::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A play session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: String,
    /// Owning campaign
    pub campaign_id: String,
    /// Session title
    pub title: String,
    /// Session notes
    #[serde(default)]
    pub notes: String,
    /// Ordinal within the campaign
    #[serde(default)]
    pub session_number: u32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session in the given campaign.
    pub fn new(campaign_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            campaign_id: campaign_id.into(),
            title: title.into(),
            notes: String::new(),
            session_number: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Theme mode options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
    #[default]
    System,
}

/// Application preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Preferences are a singleton entity; the id is fixed
    #[serde(default = "default_preferences_id")]
    pub id: String,
    /// Theme mode
    #[serde(default)]
    pub theme: ThemeMode,
    /// Whether auto-save is enabled
    #[serde(default = "default_true")]
    pub auto_save: bool,
    /// UI language tag
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_preferences_id() -> String {
    "preferences".to_string()
}

const fn default_true() -> bool {
    true
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            id: default_preferences_id(),
            theme: ThemeMode::System,
            auto_save: true,
            language: default_language(),
        }
    }
}

/// Tagged union over every persisted entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entityType", rename_all = "snake_case")]
pub enum Entity {
    Campaign(Campaign),
    Character(Character),
    Session(Session),
    Preferences(Preferences),
}

impl Entity {
    /// Kind discriminant.
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Campaign(_) => EntityKind::Campaign,
            Self::Character(_) => EntityKind::Character,
            Self::Session(_) => EntityKind::Session,
            Self::Preferences(_) => EntityKind::Preferences,
        }
    }

    /// Entity id.
    pub fn id(&self) -> &str {
        match self {
            Self::Campaign(campaign) => &campaign.id,
            Self::Character(character) => &character.id,
            Self::Session(session) => &session.id,
            Self::Preferences(preferences) => &preferences.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn campaign_new_stamps_timestamps() {
        let campaign = Campaign::new("Curse of the Iron Keep");
        assert_eq!(campaign.title, "Curse of the Iron Keep");
        assert_eq!(campaign.created_at, campaign.updated_at);
        assert!(!campaign.id.is_empty());
    }

    #[test]
    fn character_defaults_to_pc() {
        let character = Character::new("c1", "Tharn");
        assert_eq!(character.character_type, CharacterType::Pc);
        assert_eq!(character.level, 1);
        assert_eq!(character.stats.strength, 10);
    }

    #[test]
    fn entity_tag_round_trips() {
        let entity = Entity::Character(Character::new("c1", "Tharn"));
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["entityType"], "character");
        assert_eq!(json["characterType"], "PC");
        let parsed: Entity = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, entity);
    }

    #[test]
    fn entity_kind_parses_both_forms() {
        assert_eq!(
            "characters".parse::<EntityKind>().unwrap(),
            EntityKind::Character
        );
        assert_eq!(
            "character".parse::<EntityKind>().unwrap(),
            EntityKind::Character
        );
        assert!("widgets".parse::<EntityKind>().is_err());
    }

    #[test]
    fn kind_maps_to_store_name() {
        assert_eq!(EntityKind::Campaign.store_name(), "campaigns");
        assert_eq!(EntityKind::Session.path_segment(), "sessions");
    }
}
