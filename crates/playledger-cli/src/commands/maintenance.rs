use crate::output::Output;
use color_eyre::Result;
use playledger_config::PathManager;
use playledger_core::StorageAdapter;
use serde_json::json;
use super::{load_config, open_storage};

pub async fn run_maintenance(paths: &PathManager, output: &Output) -> Result<()> {
    let config = load_config(paths)?;
    let storage = open_storage(&config, paths)?;

    let before = storage.size()?;
    let report = storage.maintenance()?;
    let after = storage.size()?;

    output.json(&json!({
        "maintenance": report,
        "size_before": before,
        "size_after": after,
    }));

    if report.removed_unidentifiable > 0 {
        output.warn(format!(
            "Removed {} records without a usable identity",
            report.removed_unidentifiable
        ));
    }
    output.success(format!(
        "Maintenance done: {} records, state file {} -> {} bytes",
        report.records, before, after
    ));
    Ok(())
}
