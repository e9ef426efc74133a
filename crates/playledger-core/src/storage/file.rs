use bincode::{deserialize, serialize};
use chrono::{DateTime, Utc};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use playledger_models::Entity;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use crate::error::StorageError;
use super::{CommitSummary, IndexOptions, IndexReport, MaintenanceReport, RecordSet, StorageAdapter};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    next_id: u64,
    records: Vec<Entity>,
}

/// State snapshot on disk.
///
/// Records live in memory behind a lock and the whole set is rewritten,
/// bincode-encoded and optionally gzip-compressed, after every mutation.
pub struct FileStorage {
    path: PathBuf,
    use_compression: bool,
    state: Mutex<RecordSet>,
}

impl FileStorage {
    /// Open (or create) the snapshot at `path`.
    pub fn open(path: impl Into<PathBuf>, use_compression: bool) -> Result<Self, StorageError> {
        let path = path.into();
        let state = Self::load(&path, use_compression)?;
        Ok(Self {
            path,
            use_compression,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot file size in bytes, 0 when nothing was written yet.
    pub fn size(&self) -> Result<u64, StorageError> {
        if self.path.exists() {
            Ok(std::fs::metadata(&self.path)?.len())
        } else {
            Ok(0)
        }
    }

    fn load(path: &Path, use_compression: bool) -> Result<RecordSet, StorageError> {
        if !path.exists() {
            debug!("State file {:?} does not exist, starting empty", path);
            return Ok(RecordSet::default());
        }

        let start = std::time::Instant::now();
        let data = std::fs::read(path)?;

        let decoded = if use_compression {
            let mut decoder = GzDecoder::new(&data[..]);
            let mut decompressed = Vec::new();
            decoder.read_to_end(&mut decompressed)?;
            decompressed
        } else {
            data
        };

        let snapshot: Snapshot = match deserialize::<Snapshot>(&decoded) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => snapshot,
            outcome => {
                let reason = match outcome {
                    Ok(snapshot) => format!("unsupported version {}", snapshot.version),
                    Err(e) => e.to_string(),
                };
                let backup_path = path.with_extension("bak");
                if let Err(backup_err) = std::fs::copy(path, &backup_path) {
                    warn!(
                        "Failed to back up incompatible state file: {}. Starting with empty state.",
                        backup_err
                    );
                } else {
                    info!(
                        "State file incompatible ({}). Backed up to {:?} and starting with empty state.",
                        reason, backup_path
                    );
                }
                return Ok(RecordSet::default());
            }
        };

        let state = RecordSet::from_records(snapshot.records, snapshot.next_id);
        info!("Loaded {} records from {:?} in {:?}", state.len(), path, start.elapsed());
        Ok(state)
    }

    fn save(&self, state: &RecordSet) -> Result<(), StorageError> {
        let start = std::time::Instant::now();

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            next_id: state.next_id(),
            records: state.records().cloned().collect(),
        };
        let serialized = serialize(&snapshot)?;

        let encoded = if self.use_compression {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&serialized)?;
            encoder.finish()?
        } else {
            serialized
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Atomic write: temp file, then rename
        let temp_path = self.path.with_extension("tmp");
        std::fs::write(&temp_path, encoded)?;
        std::fs::rename(&temp_path, &self.path)?;

        debug!("Saved {} records to {:?} in {:?}", state.len(), self.path, start.elapsed());
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, RecordSet>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Backend("file storage lock poisoned".to_string()))
    }
}

// Writers change a copy of the record set and swap it in after the save.
impl StorageAdapter for FileStorage {
    fn get(&self, entity: &Entity) -> Result<Option<Entity>, StorageError> {
        Ok(self.lock()?.find(entity).cloned())
    }

    fn get_all(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Entity>, StorageError> {
        Ok(self.lock()?.since(since))
    }

    fn commit(&self, entities: &[Entity]) -> Result<CommitSummary, StorageError> {
        let mut state = self.lock()?;
        let mut next = state.clone();
        let summary = next.commit(entities);
        self.save(&next)?;
        *state = next;
        Ok(summary)
    }

    fn remove(&self, entity: &Entity) -> Result<bool, StorageError> {
        let mut state = self.lock()?;
        let mut next = state.clone();
        if !next.remove(entity) {
            return Ok(false);
        }
        self.save(&next)?;
        *state = next;
        Ok(true)
    }

    fn ensure_index(&self, opts: &IndexOptions) -> Result<IndexReport, StorageError> {
        let report = self.lock()?.ensure_index(opts);
        info!(
            "Index check: {} keys, {} missing, {} stale{}",
            report.keys,
            report.missing,
            report.stale,
            if report.rebuilt { ", rebuilt" } else { "" }
        );
        Ok(report)
    }

    fn maintenance(&self) -> Result<MaintenanceReport, StorageError> {
        let mut state = self.lock()?;
        let mut next = state.clone();
        let report = next.maintenance();
        self.save(&next)?;
        *state = next;
        info!(
            "Maintenance finished: {} records kept, {} removed",
            report.records, report.removed_unidentifiable
        );
        Ok(report)
    }
}
