use crate::commands::common::AppStack;
use crate::error::CliError;

pub async fn run_create(stack: &AppStack, label: &str) -> Result<(), CliError> {
    let backup = stack.persistence.create_backup(label).await?;
    println!(
        "Backup {} created ({} bytes, label \"{}\").",
        backup.metadata.id, backup.metadata.size, backup.metadata.label
    );
    Ok(())
}

pub async fn run_list(stack: &AppStack, as_json: bool) -> Result<(), CliError> {
    let backups = stack.persistence.list_backups().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&backups)?);
        return Ok(());
    }

    if backups.is_empty() {
        println!("No backups stored.");
        return Ok(());
    }
    for metadata in &backups {
        println!(
            "{}  {}  {}  \"{}\"",
            metadata.id, metadata.timestamp, metadata.version, metadata.label
        );
    }
    Ok(())
}

pub async fn run_restore(stack: &AppStack, id_prefix: &str) -> Result<(), CliError> {
    let backups = stack.persistence.list_backups().await?;
    let matches: Vec<_> = backups
        .iter()
        .filter(|metadata| metadata.id.starts_with(id_prefix))
        .collect();
    let metadata = match matches.as_slice() {
        [] => return Err(CliError::BackupNotFound(id_prefix.to_string())),
        [metadata] => *metadata,
        _ => {
            return Err(CliError::AmbiguousBackupId(format!(
                "backup id prefix {id_prefix} matches {} backups",
                matches.len()
            )))
        }
    };

    let backup = stack.persistence.backups().load(&metadata.id).await?;
    let restored = stack.persistence.restore_from_backup(&backup).await?;
    println!(
        "Restored {restored} entities from backup {} (\"{}\").",
        metadata.id, metadata.label
    );
    Ok(())
}
