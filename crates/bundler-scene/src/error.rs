//! Scene errors

use crate::model::{AttributeHandle, EntityId};
use thiserror::Error;

/// Errors raised by scene access
#[derive(Debug, Error)]
pub enum SceneError {
    /// The attribute was removed from the scene
    #[error("attribute {0} no longer exists")]
    AttributeMissing(AttributeHandle),

    /// No entity with this id
    #[error("entity {0} does not exist")]
    EntityMissing(EntityId),

    /// World JSON failed to parse
    #[error("invalid world description: {0}")]
    InvalidWorld(#[from] serde_json::Error),

    /// Reading or writing the world file failed
    #[error("world I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
