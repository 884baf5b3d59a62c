use lorekeeper_core::integrity::{suggestions, RepairOptions};

use crate::commands::common::AppStack;
use crate::error::CliError;

pub async fn run_check(stack: &AppStack, as_json: bool) -> Result<(), CliError> {
    let report = stack.integrity.run_check().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Checked {} entities: {}",
        report.entities_checked,
        if report.healthy() {
            "healthy"
        } else {
            "issues found"
        }
    );
    for issue in &report.issues {
        println!(
            "  [{:?}] {}/{}: {}{}",
            issue.severity,
            issue.entity_type,
            issue.entity_id,
            issue.message,
            if issue.repairable { " (repairable)" } else { "" }
        );
    }
    for probe in &report.tier_probes {
        if !probe.ok {
            println!(
                "  [Critical] storage tier {} failed its probe: {}",
                probe.tier,
                probe.message.as_deref().unwrap_or("unknown")
            );
        }
    }
    for suggestion in suggestions(&report) {
        println!("  -> {suggestion}");
    }
    Ok(())
}

pub async fn run_repair(
    stack: &AppStack,
    backup_first: bool,
    force: bool,
) -> Result<(), CliError> {
    let report = stack.integrity.run_check().await?;
    if report.healthy() {
        println!("Nothing to repair.");
        return Ok(());
    }

    let repair = stack
        .integrity
        .repair(
            &report,
            RepairOptions {
                backup_first,
                acknowledge_critical: force,
            },
        )
        .await?;

    println!("Repaired {} entities.", repair.entities_repaired);
    for fix in &repair.fixes {
        println!("  {fix}");
    }
    if let Some(backup_id) = &repair.backup_id {
        println!("Safety backup: {backup_id}");
    }
    if repair.skipped_critical > 0 {
        println!(
            "{} critical issue(s) were left in place.",
            repair.skipped_critical
        );
    }
    let remaining = report
        .issues
        .iter()
        .filter(|issue| !issue.repairable)
        .count();
    if remaining > 0 {
        println!("{remaining} issue(s) need manual attention; see `lorekeeper integrity check`.");
    }
    Ok(())
}
