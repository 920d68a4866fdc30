//! Bundler Scene - the scene as the pipeline sees it
//!
//! This crate provides:
//! - A closed component/attribute model (`ComponentKind`, `AttributeName`, `AttributeValue`)
//! - The `SceneStore` trait hosts implement over their scene graph
//! - `RewriteJournal`: one rollback entry per rewritten attribute
//! - `MemoryWorld`: a JSON-backed scene and asset system
//!
//! # Example
//!
//! ```rust,ignore
//! use bundler_scene::{MemoryWorld, SceneStore, ComponentKind};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let world = MemoryWorld::load(std::path::Path::new("town.json")).await?;
//! for mesh in world.components(ComponentKind::Mesh) {
//!     println!("mesh component {} on entity {}", mesh.id, mesh.entity);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

pub mod error;
pub mod journal;
pub mod model;
pub mod store;
pub mod world;

pub use error::SceneError;
pub use journal::{RewriteEntry, RewriteJournal};
pub use model::{
    AttributeHandle, AttributeName, AttributeValue, ChangeScope, ComponentId, ComponentInfo,
    ComponentKind, EntityFlags, EntityId,
};
pub use store::SceneStore;
pub use world::{
    AssetDescription, ComponentDescription, EntityDescription, MemoryWorld, SceneChange,
    SceneDescription, WorldDescription,
};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        AttributeHandle, AttributeName, AttributeValue, ChangeScope, ComponentKind, MemoryWorld,
        RewriteJournal, SceneStore,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
