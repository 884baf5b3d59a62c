use std::path::Path;

use crate::commands::common::AppStack;
use crate::error::CliError;

pub async fn run_diagnostics(stack: &AppStack, output: Option<&Path>) -> Result<(), CliError> {
    let diagnostics = stack.integrity.diagnostics().await?;
    let rendered = serde_json::to_string_pretty(&diagnostics)?;

    match output {
        Some(path) => {
            std::fs::write(path, &rendered)?;
            println!("Diagnostics written to {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
