//! Asset classes
//!
//! Every processed asset belongs to exactly one class. Classes have
//! independent shard numbering and byte budgets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset class of a bundled file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    /// Mesh referenced by a mesh component
    Mesh,
    /// Material script referenced by a mesh or generated material
    Material,
    /// Texture referenced from inside a material script
    Texture,
    /// Texture referenced by a generated material's parameters
    GeneratedTexture,
}

impl AssetClass {
    /// All classes in bundling order
    pub const ALL: [AssetClass; 4] = [
        AssetClass::Mesh,
        AssetClass::Material,
        AssetClass::Texture,
        AssetClass::GeneratedTexture,
    ];

    /// Dense index, used for per-class arrays
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            AssetClass::Mesh => 0,
            AssetClass::Material => 1,
            AssetClass::Texture => 2,
            AssetClass::GeneratedTexture => 3,
        }
    }

    /// Working directory folder (and archive name) stem
    #[inline]
    #[must_use]
    pub const fn folder(self) -> &'static str {
        match self {
            AssetClass::Mesh => "models",
            AssetClass::Material => "materials",
            AssetClass::Texture => "textures",
            AssetClass::GeneratedTexture => "textures-generated",
        }
    }

    /// Whether this class is transcoded as a texture
    #[inline]
    #[must_use]
    pub const fn is_texture(self) -> bool {
        matches!(self, AssetClass::Texture | AssetClass::GeneratedTexture)
    }

    /// Textures live in a different bundle than the material that
    /// references them, so their bundle refs carry the storage base URL.
    #[inline]
    #[must_use]
    pub const fn uses_absolute_refs(self) -> bool {
        self.is_texture()
    }

    /// Human readable label for reports
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            AssetClass::Mesh => "Meshes",
            AssetClass::Material => "Materials",
            AssetClass::Texture => "Textures",
            AssetClass::GeneratedTexture => "Generated material textures",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_dense_and_unique() {
        let mut seen = [false; 4];
        for class in AssetClass::ALL {
            assert!(!seen[class.index()]);
            seen[class.index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn only_textures_use_absolute_refs() {
        assert!(!AssetClass::Mesh.uses_absolute_refs());
        assert!(!AssetClass::Material.uses_absolute_refs());
        assert!(AssetClass::Texture.uses_absolute_refs());
        assert!(AssetClass::GeneratedTexture.uses_absolute_refs());
    }

    #[test]
    fn folders_are_disjoint() {
        assert_eq!(AssetClass::Texture.folder(), "textures");
        assert_eq!(AssetClass::GeneratedTexture.folder(), "textures-generated");
        assert_ne!(AssetClass::Mesh.folder(), AssetClass::Material.folder());
    }
}
