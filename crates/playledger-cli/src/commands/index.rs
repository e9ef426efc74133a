use crate::output::{styled_table, Output};
use color_eyre::Result;
use comfy_table::Cell;
use playledger_config::PathManager;
use playledger_core::{IndexOptions, StorageAdapter};
use serde_json::json;
use super::{load_config, open_storage};

pub async fn run_index(dry_run: bool, force_reindex: bool, paths: &PathManager, output: &Output) -> Result<()> {
    let config = load_config(paths)?;
    let storage = open_storage(&config, paths)?;

    let report = storage.ensure_index(&IndexOptions { dry_run, force_reindex })?;
    output.json(&json!({ "dry_run": dry_run, "index": report }));

    let mut table = styled_table(&["Keys", "Missing", "Stale", "Rebuilt"]);
    table.add_row(vec![
        Cell::new(report.keys),
        Cell::new(report.missing),
        Cell::new(report.stale),
        Cell::new(report.rebuilt),
    ]);
    output.table(&table);

    let pending = report.missing + report.stale;
    if report.rebuilt {
        output.success(format!("Pointer index rebuilt with {} keys", report.keys));
    } else if pending == 0 {
        output.success("Pointer index is healthy");
    } else {
        output.warn(format!("Pointer index needs {} changes (dry run, nothing written)", pending));
    }
    Ok(())
}
