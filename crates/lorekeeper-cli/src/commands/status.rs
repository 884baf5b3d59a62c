use serde::Serialize;

use crate::commands::common::AppStack;
use crate::error::CliError;

#[derive(Serialize)]
struct StatusOutput {
    schema_version: String,
    stores: Vec<lorekeeper_core::store::StoreStats>,
    cache: lorekeeper_core::store::CacheStats,
    queue_length: u64,
    sync: Option<lorekeeper_core::sync::SyncStatus>,
}

pub async fn run_status(stack: &AppStack, as_json: bool) -> Result<(), CliError> {
    let overview = stack.persistence.storage_overview().await?;
    let sync = match &stack.sync {
        Some(manager) => Some(manager.status().await?),
        None => None,
    };

    if as_json {
        let output = StatusOutput {
            schema_version: stack.persistence.config().schema_version.clone(),
            stores: overview.stores,
            cache: overview.cache,
            queue_length: overview.queue_length,
            sync,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "Schema version: {}",
        stack.persistence.config().schema_version
    );
    println!("Queued mutations: {}", overview.queue_length);
    for store in &overview.stores {
        if store.entries > 0 {
            println!(
                "  {}: {} entries, {} bytes",
                store.name, store.entries, store.payload_bytes
            );
        }
    }
    match sync {
        Some(status) => {
            println!(
                "Sync: {} ({} pending, {} conflicts)",
                if status.online { "online" } else { "offline" },
                status.pending_items,
                status.pending_conflicts
            );
            if let Some(last_sync) = status.last_sync {
                println!("Last sync: {last_sync}");
            }
        }
        None => println!("Sync: not configured"),
    }
    Ok(())
}
