use lorekeeper_core::sync::ConflictResolution;

use crate::commands::common::AppStack;
use crate::error::CliError;

pub async fn run_sync(stack: &AppStack) -> Result<(), CliError> {
    let manager = stack.sync_required()?;
    let report = manager.run_sync_pass().await?;
    if report.skipped {
        println!("Sync skipped (offline or already running).");
        return Ok(());
    }
    println!(
        "Sync finished: {} delivered, {} conflicts ({} auto-resolved), {} failed.",
        report.delivered, report.conflicts, report.resolved, report.failed
    );
    Ok(())
}

pub async fn run_conflicts(stack: &AppStack, as_json: bool) -> Result<(), CliError> {
    let manager = stack.sync_required()?;
    let conflicts = manager.conflicts().pending().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No pending conflicts.");
        return Ok(());
    }
    for conflict in &conflicts {
        println!(
            "{}  {}/{}  {:?}  local {} vs remote {}",
            conflict.id,
            conflict.entity_type,
            conflict.entity_id,
            conflict.conflict_type,
            conflict.local_timestamp,
            conflict.remote_timestamp
        );
    }
    Ok(())
}

pub async fn run_resolve(stack: &AppStack, id: &str, keep_local: bool) -> Result<(), CliError> {
    let manager = stack.sync_required()?;
    if manager.conflicts().get(id).await?.is_none() {
        return Err(CliError::ConflictNotFound(id.to_string()));
    }
    let resolution = if keep_local {
        ConflictResolution::UseLocal
    } else {
        ConflictResolution::UseRemote
    };
    manager.resolve_conflict(id, resolution).await?;
    println!(
        "Conflict {id} resolved, keeping the {} copy.",
        if keep_local { "local" } else { "remote" }
    );
    Ok(())
}
