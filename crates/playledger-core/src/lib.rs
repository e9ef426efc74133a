pub mod backup;
pub mod error;
pub mod mapper;
pub mod metrics;
pub mod storage;

pub use backup::{export_backend, write_backup, BackupRecord};
pub use error::StorageError;
pub use mapper::{AddOptions, AddOutcome, MapperOptions, ReconciliationMapper};
pub use metrics::{InMemoryCounters, MetricsSink, NoopMetrics};
pub use storage::{
    CommitSummary, FileStorage, IndexOptions, IndexReport, MaintenanceReport, MemoryStorage, StorageAdapter,
    TypeSummary,
};
