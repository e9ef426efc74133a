use crate::output::Output;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use playledger_config::PathManager;
use playledger_core::{export_backend, write_backup};
use serde_json::json;
use std::path::PathBuf;
use super::{load_config, open_storage};

pub async fn run_backup(backend: String, destination: Option<PathBuf>, paths: &PathManager, output: &Output) -> Result<()> {
    let config = load_config(paths)?;
    config.backend(&backend).map_err(|e| eyre!("{}", e))?;
    let storage = open_storage(&config, paths)?;

    let records = export_backend(storage.as_ref(), &backend)?;
    if records.is_empty() {
        output.info(format!("No stored records carry a {} snapshot", backend));
    }

    let destination = destination.unwrap_or_else(|| paths.backup_file(&backend));
    write_backup(&records, &destination)?;

    output.json(&json!({
        "backend": backend,
        "records": records.len(),
        "file": destination.display().to_string(),
    }));
    output.success(format!(
        "Backed up {} records for {} to {}",
        records.len(),
        backend,
        destination.display()
    ));
    Ok(())
}
