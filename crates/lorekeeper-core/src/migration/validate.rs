//! Structural validation of stored entity payloads.
//!
//! Works over raw JSON rather than the typed models so damaged payloads can
//! still be inspected and, where possible, repaired in place. Shared by the
//! migration manager (post-step validation) and the integrity monitor.

use serde::Serialize;

use crate::models::{EntityKind, STAT_MAX, STAT_MIN};

const CHARACTER_TYPES: [&str; 3] = ["PC", "NPC", "MONSTER"];
const THEME_MODES: [&str; 3] = ["light", "dark", "system"];
const STAT_NAMES: [&str; 6] = [
    "strength",
    "dexterity",
    "constitution",
    "intelligence",
    "wisdom",
    "charisma",
];

/// What kind of damage an issue describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// Payload is unreadable or not an object
    Corruption,
    /// A required field is absent
    MissingField,
    /// A field holds an out-of-range or mistyped value
    InvalidValue,
    /// References an entity that does not exist
    OrphanedReference,
    /// Stored checksum does not match the payload
    ChecksumMismatch,
}

/// How bad an issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

/// One problem found in a stored payload.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub issue_type: IssueType,
    pub severity: Severity,
    /// Field the issue concerns, when it concerns one
    pub field: Option<String>,
    pub message: String,
    /// Whether `repair_entity` can fix this in place
    pub repairable: bool,
}

impl ValidationIssue {
    fn new(
        entity_type: EntityKind,
        entity_id: &str,
        issue_type: IssueType,
        severity: Severity,
        field: Option<&str>,
        message: impl Into<String>,
        repairable: bool,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.to_string(),
            issue_type,
            severity,
            field: field.map(str::to_string),
            message: message.into(),
            repairable,
        }
    }
}

/// Validate one stored payload against its kind's structural rules.
pub fn validate_entity(
    kind: EntityKind,
    id: &str,
    value: &serde_json::Value,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let Some(object) = value.as_object() else {
        issues.push(ValidationIssue::new(
            kind,
            id,
            IssueType::Corruption,
            Severity::Critical,
            None,
            "payload is not a JSON object",
            false,
        ));
        return issues;
    };

    let require_string = |issues: &mut Vec<ValidationIssue>, field: &str| {
        match object.get(field) {
            None => issues.push(ValidationIssue::new(
                kind,
                id,
                IssueType::MissingField,
                Severity::Critical,
                Some(field),
                format!("required field {field} is missing"),
                false,
            )),
            Some(value) if !value.is_string() => issues.push(ValidationIssue::new(
                kind,
                id,
                IssueType::InvalidValue,
                Severity::Critical,
                Some(field),
                format!("field {field} must be a string"),
                false,
            )),
            Some(_) => {}
        }
    };

    require_string(&mut issues, "id");

    match kind {
        EntityKind::Campaign => {
            require_string(&mut issues, "title");
        }
        EntityKind::Character => {
            require_string(&mut issues, "campaign_id");
            require_string(&mut issues, "name");
            check_character_type(kind, id, object, &mut issues);
            check_stats(kind, id, object, &mut issues);
        }
        EntityKind::Session => {
            require_string(&mut issues, "campaign_id");
            require_string(&mut issues, "title");
        }
        EntityKind::Preferences => {
            if let Some(theme) = object.get("theme") {
                let valid = theme
                    .as_str()
                    .is_some_and(|theme| THEME_MODES.contains(&theme));
                if !valid {
                    issues.push(ValidationIssue::new(
                        kind,
                        id,
                        IssueType::InvalidValue,
                        Severity::Warning,
                        Some("theme"),
                        format!("theme must be one of {THEME_MODES:?}"),
                        true,
                    ));
                }
            }
        }
    }

    issues
}

fn check_character_type(
    kind: EntityKind,
    id: &str,
    object: &serde_json::Map<String, serde_json::Value>,
    issues: &mut Vec<ValidationIssue>,
) {
    match object.get("characterType") {
        None => issues.push(ValidationIssue::new(
            kind,
            id,
            IssueType::MissingField,
            Severity::Warning,
            Some("characterType"),
            "characterType is missing",
            true,
        )),
        Some(value) => {
            let valid = value
                .as_str()
                .is_some_and(|character_type| CHARACTER_TYPES.contains(&character_type));
            if !valid {
                issues.push(ValidationIssue::new(
                    kind,
                    id,
                    IssueType::InvalidValue,
                    Severity::Warning,
                    Some("characterType"),
                    format!("characterType must be one of {CHARACTER_TYPES:?}"),
                    true,
                ));
            }
        }
    }
}

fn check_stats(
    kind: EntityKind,
    id: &str,
    object: &serde_json::Map<String, serde_json::Value>,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(stats) = object.get("stats") else {
        return;
    };
    let Some(stats) = stats.as_object() else {
        issues.push(ValidationIssue::new(
            kind,
            id,
            IssueType::InvalidValue,
            Severity::Warning,
            Some("stats"),
            "stats must be an object",
            true,
        ));
        return;
    };
    for name in STAT_NAMES {
        let Some(score) = stats.get(name) else {
            continue;
        };
        let in_range = score
            .as_i64()
            .is_some_and(|score| (i64::from(STAT_MIN)..=i64::from(STAT_MAX)).contains(&score));
        if !in_range {
            issues.push(ValidationIssue::new(
                kind,
                id,
                IssueType::InvalidValue,
                Severity::Warning,
                Some(name),
                format!("{name} must be an integer between {STAT_MIN} and {STAT_MAX}"),
                true,
            ));
        }
    }
}

/// Fix the repairable issues in a payload in place. Returns a description of
/// each applied fix; an empty list means nothing was changed.
pub fn repair_entity(kind: EntityKind, value: &mut serde_json::Value) -> Vec<String> {
    let mut fixes = Vec::new();
    let Some(object) = value.as_object_mut() else {
        return fixes;
    };

    match kind {
        EntityKind::Character => {
            let type_ok = object
                .get("characterType")
                .and_then(serde_json::Value::as_str)
                .is_some_and(|character_type| CHARACTER_TYPES.contains(&character_type));
            if !type_ok {
                object.insert(
                    "characterType".to_string(),
                    serde_json::Value::String("PC".to_string()),
                );
                fixes.push("set characterType to PC".to_string());
            }
            if let Some(stats) = object.get_mut("stats") {
                if let Some(stats) = stats.as_object_mut() {
                    for name in STAT_NAMES {
                        let Some(score) = stats.get(name) else {
                            continue;
                        };
                        let clamped = score.as_i64().map_or(10, |score| {
                            score.clamp(i64::from(STAT_MIN), i64::from(STAT_MAX))
                        });
                        if score.as_i64() != Some(clamped) {
                            stats.insert(name.to_string(), serde_json::Value::from(clamped));
                            fixes.push(format!("clamped {name} to {clamped}"));
                        }
                    }
                } else {
                    *stats = serde_json::json!({
                        "strength": 10, "dexterity": 10, "constitution": 10,
                        "intelligence": 10, "wisdom": 10, "charisma": 10,
                    });
                    fixes.push("reset malformed stats block".to_string());
                }
            }
        }
        EntityKind::Preferences => {
            let theme_ok = object
                .get("theme")
                .is_none_or(|theme| theme.as_str().is_some_and(|theme| THEME_MODES.contains(&theme)));
            if !theme_ok {
                object.insert(
                    "theme".to_string(),
                    serde_json::Value::String("system".to_string()),
                );
                fixes.push("reset theme to system".to_string());
            }
        }
        EntityKind::Campaign | EntityKind::Session => {}
    }
    fixes
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn well_formed_character_passes() {
        let character = json!({
            "id": "ch1",
            "campaign_id": "c1",
            "name": "Tharn",
            "characterType": "NPC",
            "stats": {"strength": 18, "dexterity": 12},
        });
        assert!(validate_entity(EntityKind::Character, "ch1", &character).is_empty());
    }

    #[test]
    fn missing_character_type_is_a_repairable_warning() {
        let character = json!({
            "id": "ch1",
            "campaign_id": "c1",
            "name": "Tharn",
        });
        let issues = validate_entity(EntityKind::Character, "ch1", &character);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, IssueType::MissingField);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert!(issues[0].repairable);
    }

    #[test]
    fn missing_id_is_critical() {
        let campaign = json!({"title": "Iron Keep"});
        let issues = validate_entity(EntityKind::Campaign, "c1", &campaign);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert!(!issues[0].repairable);
    }

    #[test]
    fn non_object_payload_is_corruption() {
        let issues = validate_entity(EntityKind::Campaign, "c1", &json!("scrambled"));
        assert_eq!(issues[0].issue_type, IssueType::Corruption);
    }

    #[test]
    fn out_of_range_stat_is_flagged() {
        let character = json!({
            "id": "ch1",
            "campaign_id": "c1",
            "name": "Tharn",
            "characterType": "PC",
            "stats": {"strength": 45},
        });
        let issues = validate_entity(EntityKind::Character, "ch1", &character);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field.as_deref(), Some("strength"));
    }

    #[test]
    fn repair_defaults_character_type_and_clamps_stats() {
        let mut character = json!({
            "id": "ch1",
            "campaign_id": "c1",
            "name": "Tharn",
            "stats": {"strength": 45, "dexterity": 0},
        });
        let fixes = repair_entity(EntityKind::Character, &mut character);
        assert_eq!(fixes.len(), 3);
        assert_eq!(character["characterType"], "PC");
        assert_eq!(character["stats"]["strength"], 30);
        assert_eq!(character["stats"]["dexterity"], 1);
        assert!(validate_entity(EntityKind::Character, "ch1", &character).is_empty());
    }

    #[test]
    fn repair_resets_invalid_theme() {
        let mut preferences = json!({"id": "app", "theme": "neon"});
        let fixes = repair_entity(EntityKind::Preferences, &mut preferences);
        assert_eq!(fixes, vec!["reset theme to system".to_string()]);
        assert_eq!(preferences["theme"], "system");
    }
}
