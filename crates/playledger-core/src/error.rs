use thiserror::Error;

/// Failures raised by a storage adapter.
///
/// The mapper never retries these; they are propagated to the caller as-is.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode or decode the state snapshot: {0}")]
    Codec(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Codec(e.to_string())
    }
}
