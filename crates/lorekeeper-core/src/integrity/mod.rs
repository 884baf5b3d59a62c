//! Periodic data-health checks over the persisted entities.
//!
//! A check enumerates every entity, validates its structure, cross-checks
//! references between collections, drains checksum mismatches observed on
//! reads, and probes both storage tiers. Repairs only ever touch issues the
//! validators know how to fix; anything else is reported for the user.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::migration::validate::{
    repair_entity, validate_entity, IssueType, Severity, ValidationIssue,
};
use crate::models::EntityKind;
use crate::persistence::{LoadOptions, PersistenceManager, SaveOptions, TierProbe};

/// Result of one full health check.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub checked_at: DateTime<Utc>,
    /// Entities examined
    pub entities_checked: u64,
    pub issues: Vec<ValidationIssue>,
    pub tier_probes: Vec<TierProbe>,
}

impl IntegrityReport {
    /// Whether nothing is wrong.
    pub fn healthy(&self) -> bool {
        self.issues.is_empty() && self.tier_probes.iter().all(|probe| probe.ok)
    }

    /// Issues at or above critical severity.
    pub fn critical_issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Critical)
    }

    /// Issues the repair pass can fix.
    pub fn repairable_issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|issue| issue.repairable)
    }
}

/// Options for a repair pass.
#[derive(Debug, Clone, Default)]
pub struct RepairOptions {
    /// Take a backup before changing anything
    pub backup_first: bool,
    /// Proceed even when the report also contains unrepairable critical
    /// issues. Those are left in place either way; this flag only
    /// acknowledges them.
    pub acknowledge_critical: bool,
}

/// What a repair pass did.
#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub entities_repaired: u64,
    /// Critical issues the pass could not fix and left in place
    pub skipped_critical: u64,
    pub fixes: Vec<String>,
    pub backup_id: Option<String>,
}

/// Coalescing window for external-change notifications.
const CHANGE_DEBOUNCE: Duration = Duration::from_millis(250);

struct Shared {
    persistence: PersistenceManager,
    last_report: tokio::sync::Mutex<Option<IntegrityReport>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    change: Arc<tokio::sync::Notify>,
}

/// Watches the persisted data for structural damage.
#[derive(Clone)]
pub struct IntegrityMonitor {
    shared: Arc<Shared>,
}

impl IntegrityMonitor {
    /// Create a monitor over the persistence layer.
    pub fn new(persistence: PersistenceManager) -> Self {
        Self {
            shared: Arc::new(Shared {
                persistence,
                last_report: tokio::sync::Mutex::new(None),
                task: std::sync::Mutex::new(None),
                change: Arc::new(tokio::sync::Notify::new()),
            }),
        }
    }

    /// Run one full health check.
    pub async fn run_check(&self) -> Result<IntegrityReport> {
        let report = check(&self.shared.persistence).await?;
        if report.healthy() {
            tracing::debug!("Integrity check clean: {} entities", report.entities_checked);
        } else {
            tracing::warn!(
                "Integrity check found {} issue(s) across {} entities",
                report.issues.len(),
                report.entities_checked
            );
        }
        *self.shared.last_report.lock().await = Some(report.clone());
        Ok(report)
    }

    /// The most recent report, if a check has run.
    pub async fn last_report(&self) -> Option<IntegrityReport> {
        self.shared.last_report.lock().await.clone()
    }

    /// Fix every repairable issue in the given report.
    ///
    /// Refuses to run when unrepairable critical issues are present and
    /// unacknowledged, so damage is not papered over silently.
    pub async fn repair(
        &self,
        report: &IntegrityReport,
        options: RepairOptions,
    ) -> Result<RepairReport> {
        if report.critical_issues().next().is_some() && !options.acknowledge_critical {
            return Err(Error::InvalidInput(
                "critical issues present; acknowledge them to repair the rest".to_string(),
            ));
        }

        let persistence = &self.shared.persistence;
        let backup_id = if options.backup_first {
            Some(
                persistence
                    .create_backup("pre-repair")
                    .await?
                    .metadata
                    .id
                    .clone(),
            )
        } else {
            None
        };

        let mut targets: Vec<(EntityKind, String)> = Vec::new();
        for issue in report.repairable_issues() {
            let target = (issue.entity_type, issue.entity_id.clone());
            if !targets.contains(&target) {
                targets.push(target);
            }
        }

        let mut fixes = Vec::new();
        let mut entities_repaired = 0;
        for (kind, id) in targets {
            let Some(mut data) = persistence.load(kind, &id, LoadOptions::default()).await? else {
                continue;
            };
            let applied = repair_entity(kind, &mut data);
            if applied.is_empty() {
                continue;
            }
            persistence
                .save(
                    kind,
                    &id,
                    &data,
                    SaveOptions {
                        skip_offline_queue: true,
                        ..SaveOptions::default()
                    },
                )
                .await?;
            entities_repaired += 1;
            for fix in applied {
                fixes.push(format!("{kind}/{id}: {fix}"));
            }
        }
        let skipped_critical = u64::try_from(report.critical_issues().count()).unwrap_or(u64::MAX);
        if skipped_critical > 0 {
            tracing::warn!(
                "Repaired {entities_repaired} entities, {skipped_critical} critical issue(s) left in place"
            );
        } else {
            tracing::info!("Repaired {entities_repaired} entities");
        }
        Ok(RepairReport {
            entities_repaired,
            skipped_critical,
            fixes,
            backup_id,
        })
    }

    /// Signal that persisted data may have changed outside the normal write
    /// path. The monitoring task re-checks after a short debounce window.
    pub fn notify_change(&self) {
        self.shared.change.notify_one();
    }

    /// Start monitoring on the configured interval.
    pub fn start(&self) {
        self.start_monitoring(self.shared.persistence.config().integrity_interval());
    }

    /// Run one check now, then re-check on the given interval (or on an
    /// external-change signal) until stopped.
    pub fn start_monitoring(&self, interval: Duration) {
        let weak = Arc::downgrade(&self.shared);
        let change = Arc::clone(&self.shared.change);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = change.notified() => {
                        tokio::time::sleep(CHANGE_DEBOUNCE).await;
                    }
                }
                let Some(shared) = weak.upgrade() else { break };
                match check(&shared.persistence).await {
                    Ok(report) => {
                        if !report.healthy() {
                            tracing::warn!(
                                "Periodic integrity check found {} issue(s)",
                                report.issues.len()
                            );
                        }
                        *shared.last_report.lock().await = Some(report);
                    }
                    Err(error) => {
                        tracing::error!("Periodic integrity check failed: {error}");
                    }
                }
            }
        });
        let mut guard = self
            .shared
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = guard.replace(handle) {
            previous.abort();
        }
    }

    /// Stop periodic checking.
    pub fn stop_monitoring(&self) {
        let mut guard = self
            .shared
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }

    /// Full diagnostics export: health, storage statistics, configuration
    /// capabilities. Runs a fresh check.
    pub async fn diagnostics(&self) -> Result<serde_json::Value> {
        let persistence = &self.shared.persistence;
        let report = self.run_check().await?;
        let overview = persistence.storage_overview().await?;
        let config = persistence.config();
        Ok(json!({
            "generated_at": Utc::now(),
            "schema_version": config.schema_version,
            "health": {
                "healthy": report.healthy(),
                "report": report,
                "suggestions": suggestions(&report),
            },
            "storage": overview,
            "capabilities": {
                "compression": config.compression_enabled,
                "ephemeral_encryption": config.ephemeral_encryption,
                "sync_configured": config.endpoint.is_configured(),
                "online": persistence.status().is_online(),
            },
        }))
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let guard = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = guard.as_ref() {
            handle.abort();
        }
    }
}

async fn check(persistence: &PersistenceManager) -> Result<IntegrityReport> {
    let mut issues = Vec::new();
    let mut entities_checked = 0;

    let campaign_ids = persistence.entity_ids(EntityKind::Campaign).await?;

    for kind in EntityKind::ALL {
        for id in persistence.entity_ids(kind).await? {
            entities_checked += 1;
            let options = LoadOptions {
                validate_checksum: true,
                ..LoadOptions::default()
            };
            match persistence.load(kind, &id, options).await {
                Ok(Some(data)) => {
                    issues.extend(validate_entity(kind, &id, &data));
                    if matches!(kind, EntityKind::Character | EntityKind::Session) {
                        let campaign_id = data.get("campaign_id").and_then(serde_json::Value::as_str);
                        if let Some(campaign_id) = campaign_id {
                            if !campaign_ids.contains(&campaign_id.to_string()) {
                                issues.push(orphan_issue(kind, &id, campaign_id));
                            }
                        }
                    }
                }
                Ok(None) => issues.push(missing_issue(kind, &id)),
                Err(error) => issues.push(unreadable_issue(kind, &id, &error)),
            }
        }
    }

    // Checksum mismatches surfaced by the validated loads above.
    for event in persistence.take_corruption_events() {
        if let Ok(kind) = event.store.parse::<EntityKind>() {
            issues.push(ValidationIssue {
                entity_type: kind,
                entity_id: event.id,
                issue_type: IssueType::ChecksumMismatch,
                severity: Severity::Warning,
                field: None,
                message: format!(
                    "stored checksum {} does not match payload checksum {}",
                    event.expected, event.actual
                ),
                repairable: false,
            });
        }
    }

    Ok(IntegrityReport {
        checked_at: Utc::now(),
        entities_checked,
        issues,
        tier_probes: persistence.probe_tiers().await,
    })
}

fn orphan_issue(kind: EntityKind, id: &str, campaign_id: &str) -> ValidationIssue {
    ValidationIssue {
        entity_type: kind,
        entity_id: id.to_string(),
        issue_type: IssueType::OrphanedReference,
        severity: Severity::Warning,
        field: Some("campaign_id".to_string()),
        message: format!("references missing campaign {campaign_id}"),
        repairable: false,
    }
}

fn missing_issue(kind: EntityKind, id: &str) -> ValidationIssue {
    ValidationIssue {
        entity_type: kind,
        entity_id: id.to_string(),
        issue_type: IssueType::Corruption,
        severity: Severity::Critical,
        field: None,
        message: "entity is listed but its payload is missing".to_string(),
        repairable: false,
    }
}

fn unreadable_issue(kind: EntityKind, id: &str, error: &Error) -> ValidationIssue {
    ValidationIssue {
        entity_type: kind,
        entity_id: id.to_string(),
        issue_type: IssueType::Corruption,
        severity: Severity::Critical,
        field: None,
        message: format!("payload is unreadable: {error}"),
        repairable: false,
    }
}

/// Human-readable next steps per issue class found in a report.
pub fn suggestions(report: &IntegrityReport) -> Vec<&'static str> {
    let mut out = Vec::new();
    let mut add = |suggestion| {
        if !out.contains(&suggestion) {
            out.push(suggestion);
        }
    };
    for issue in &report.issues {
        match issue.issue_type {
            IssueType::Corruption => add("restore the affected entities from a backup"),
            IssueType::MissingField | IssueType::InvalidValue => {
                add("run a repair pass to fill defaults and clamp values");
            }
            IssueType::OrphanedReference => {
                add("reassign or delete entities whose campaign no longer exists");
            }
            IssueType::ChecksumMismatch => {
                add("restore the affected entities from version history or a backup");
            }
        }
    }
    if report.tier_probes.iter().any(|probe| !probe.ok) {
        add("check storage permissions and free disk space");
    }
    out
}
