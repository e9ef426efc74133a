use thiserror::Error;

/// An entity could not be constructed from the fields it was given.
///
/// Fatal to the producing call and never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("entity is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' has an invalid value: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("entity id is already assigned ({existing}), refusing to change it to {requested}")]
    IdReassigned { existing: u64, requested: u64 },
}
