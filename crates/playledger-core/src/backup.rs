use playledger_models::{EntityType, Guids};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use crate::error::StorageError;
use crate::storage::StorageAdapter;

/// One backend's view of a stored record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupRecord {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    pub watched: u8,
    pub updated: i64,
    pub guids: Guids,
    #[serde(skip_serializing_if = "Guids::is_empty", default)]
    pub parent: Guids,
}

/// Every stored record the backend has reported on, as that backend saw it.
pub fn export_backend(storage: &dyn StorageAdapter, backend: &str) -> Result<Vec<BackupRecord>, StorageError> {
    let records = storage
        .get_all(None)?
        .into_iter()
        .filter_map(|record| {
            let snapshot = record.metadata.get(backend)?;
            Some(BackupRecord {
                entity_type: record.entity_type,
                title: record.title.clone(),
                year: record.year,
                season: record.season,
                episode: record.episode,
                watched: snapshot.watched,
                updated: snapshot.played_at.unwrap_or(record.updated),
                guids: if snapshot.guids.is_empty() {
                    record.guids.clone()
                } else {
                    snapshot.guids.clone()
                },
                parent: record.parent.clone(),
            })
        })
        .collect();

    Ok(records)
}

/// Write records as pretty JSON, via a temp file and rename.
pub fn write_backup(records: &[BackupRecord], path: &Path) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(records).map_err(|e| StorageError::Codec(e.to_string()))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, json)?;
    std::fs::rename(&temp_path, path)?;

    info!("Wrote {} backup records to {:?}", records.len(), path);
    Ok(())
}
