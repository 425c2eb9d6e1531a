//! Rendering engine seam
//!
//! The network layer never touches engine objects. Everything that needs the
//! engine is queued on the [`crate::dispatcher`] and applied there through
//! this trait, on whichever task owns the engine.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::appearance::Material;

/// Opaque reference to a loaded asset, issued by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetHandle(pub u64);

impl std::fmt::Display for AssetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "asset#{}", self.0)
    }
}

/// Opaque reference to a spawned point marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarkerHandle(pub u64);

impl std::fmt::Display for MarkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "marker#{}", self.0)
    }
}

/// One named sub-part of a loaded asset
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: String,
    /// `None` when the part has nothing to render
    pub material: Option<Material>,
}

impl Part {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            material: Some(Material::default()),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },
}

/// Operations the dispatcher needs from the rendering host
pub trait Engine: Send + 'static {
    /// Decode and show the asset at `path` under `name`
    fn load(&mut self, path: &Path, name: &str) -> Result<AssetHandle, EngineError>;

    /// Remove a loaded asset from the scene
    fn destroy(&mut self, handle: AssetHandle);

    /// Sub-parts of a live asset, in enumeration order
    fn parts(&self, handle: AssetHandle) -> Option<&[Part]>;

    fn parts_mut(&mut self, handle: AssetHandle) -> Option<&mut [Part]>;

    /// Spawn the `ordinal`-th point marker at the reference location
    ///
    /// Returns `None` when the reference location does not exist.
    fn spawn_marker(&mut self, ordinal: usize) -> Option<MarkerHandle>;

    fn destroy_marker(&mut self, marker: MarkerHandle);

    /// Update the on-screen point counter
    fn show_point_count(&mut self, _count: usize) {}
}
