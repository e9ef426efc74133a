use crate::output::{counters_table, styled_table, summary_table, Output};
use chrono::{DateTime, Utc};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use comfy_table::{Cell, Color};
use futures::{stream, StreamExt};
use playledger_backends::{create_normalizer, parse_request_body, BackendContext, WebhookNormalizer, WebhookRejection};
use playledger_config::PathManager;
use playledger_core::{AddOptions, InMemoryCounters, MapperOptions, ReconciliationMapper};
use playledger_models::Entity;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use super::{load_config, open_storage};

/// Payloads normalized at the same time; each may hit the backend API.
const CONCURRENT_PAYLOADS: usize = 8;

/// Response for one payload file.
struct PayloadResult {
    file: PathBuf,
    status: u16,
    outcome: String,
}

async fn normalize_file(
    normalizer: &dyn WebhookNormalizer,
    file: &Path,
    received_at: DateTime<Utc>,
) -> Result<Entity, WebhookRejection> {
    let body = tokio::fs::read(file)
        .await
        .map_err(|e| WebhookRejection::bad_request(format!("Unable to read {}: {}", file.display(), e)))?;
    let payload = parse_request_body(&body);
    normalizer.normalize(payload.as_ref(), received_at).await
}

pub async fn run_webhook(
    backend: String,
    files: Vec<PathBuf>,
    import_unwatched: bool,
    dry_run: bool,
    paths: &PathManager,
    output: &Output,
) -> Result<()> {
    let config = load_config(paths)?;
    let backend_config = config.backend(&backend).map_err(|e| eyre!("{}", e))?;
    let rules = config.webhook_rules_table().map_err(|e| eyre!("{}", e))?;
    let context = BackendContext::from_config(&backend, backend_config, &rules);
    let normalizer = create_normalizer(context)?;

    let received_at = Utc::now();
    let normalizer_ref = normalizer.as_ref();
    let mut normalized: Vec<(usize, PathBuf, Result<Entity, WebhookRejection>)> = stream::iter(files.into_iter().enumerate())
        .map(|(position, file)| async move {
            let result = normalize_file(normalizer_ref, &file, received_at).await;
            (position, file, result)
        })
        .buffer_unordered(CONCURRENT_PAYLOADS)
        .collect()
        .await;
    normalized.sort_by_key(|(position, _, _)| *position);
    debug!("{}: normalized {} payloads", backend, normalized.len());

    let counters = Arc::new(InMemoryCounters::new());
    let options = MapperOptions {
        dry_run: dry_run || config.mapper.dry_run,
        trace: config.mapper.trace,
        tracked_fields: config.mapper.tracked_fields().map_err(|e| eyre!("{}", e))?,
    };
    let storage = open_storage(&config, paths)?;
    let mut mapper = ReconciliationMapper::new(storage, counters.clone()).with_options(options);
    let add_options = AddOptions {
        import_unwatched: import_unwatched || config.mapper.import_unwatched,
        after: None,
    };

    let mut results = Vec::with_capacity(normalized.len());
    for (_, file, result) in normalized {
        let (status, outcome) = match result {
            Ok(entity) => (200, mapper.add(entity, &add_options)?.to_string()),
            Err(rejection) => {
                info!("{}: {} -> {}", backend, file.display(), rejection);
                (rejection.status, rejection.message)
            }
        };
        results.push(PayloadResult { file, status, outcome });
    }

    let summary = mapper.commit()?;
    let counters = counters.snapshot();

    output.json(&json!({
        "backend": backend,
        "dry_run": mapper.in_dry_run_mode(),
        "payloads": results
            .iter()
            .map(|r| json!({ "file": r.file.display().to_string(), "status": r.status, "result": r.outcome }))
            .collect::<Vec<_>>(),
        "summary": summary,
        "counters": counters,
    }));

    let mut table = styled_table(&["Payload", "Status", "Result"]);
    for result in &results {
        let status = match result.status {
            200 => Cell::new(result.status).fg(Color::Green),
            _ => Cell::new(result.status).fg(Color::Red),
        };
        table.add_row(vec![Cell::new(result.file.display()), status, Cell::new(&result.outcome)]);
    }
    output.table(&table);
    output.table(&summary_table(&summary));
    output.table(&counters_table(&counters));

    let total = summary.total();
    if mapper.in_dry_run_mode() {
        output.warn(format!(
            "Dry run: {} would be added, {} updated. Nothing was written.",
            total.added, total.updated
        ));
    } else if total.failed > 0 {
        output.warn(format!("{} records failed to commit", total.failed));
    } else {
        output.success(format!("Committed {} added, {} updated", total.added, total.updated));
    }
    Ok(())
}
