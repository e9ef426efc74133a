pub mod entity;
pub mod error;
pub mod guid;

pub use entity::{BackendSnapshot, Entity, EntityType, MergeOutcome, TrackedField, TrackedFields};
pub use error::ValidationError;
pub use guid::{GuidRegistry, Guids, RELATIVE_NAMESPACE, VIRTUAL_NAMESPACE};
