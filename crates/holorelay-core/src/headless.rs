//! In-memory engine for running without a rendering host
//!
//! Models are decoded just far enough to enumerate their parts: every OBJ
//! `o` or `g` directive starts a new part. Nothing is drawn; the engine keeps
//! the scene state so it can be inspected.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::appearance::Material;
use crate::engine::{AssetHandle, Engine, EngineError, MarkerHandle, Part};

/// Part name used when a model declares no groups
pub const DEFAULT_PART: &str = "default";

const MARKER_SCALE: f32 = 0.05;
const MARKER_COLOR: [f32; 3] = [0.0, 1.0, 0.0];

/// A model held by the headless scene
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub name: String,
    pub path: PathBuf,
    pub parts: Vec<Part>,
}

/// A point marker held by the headless scene
#[derive(Debug, Clone)]
pub struct Marker {
    pub name: String,
    pub position: [f32; 3],
    pub scale: f32,
    pub material: Material,
}

/// Part names of an OBJ document, in declaration order
pub fn parse_obj_groups(content: &str) -> Vec<String> {
    let mut groups: Vec<String> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        let rest = match line.split_once(char::is_whitespace) {
            Some(("o", rest)) | Some(("g", rest)) => rest.trim(),
            _ => continue,
        };
        if rest.is_empty() {
            continue;
        }
        if groups.last().map(String::as_str) != Some(rest) {
            groups.push(rest.to_string());
        }
    }

    if groups.is_empty() {
        groups.push(DEFAULT_PART.to_string());
    }
    groups
}

/// Scene state without a renderer
#[derive(Debug, Default)]
pub struct HeadlessEngine {
    next_id: u64,
    anchor: Option<[f32; 3]>,
    assets: HashMap<AssetHandle, LoadedModel>,
    markers: HashMap<MarkerHandle, Marker>,
    destroyed: Vec<AssetHandle>,
    point_label: String,
}

impl HeadlessEngine {
    /// Create an engine; markers spawn at `anchor` when it is set
    pub fn new(anchor: Option<[f32; 3]>) -> Self {
        Self {
            anchor,
            ..Default::default()
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn live_assets(&self) -> usize {
        self.assets.len()
    }

    pub fn is_live(&self, handle: AssetHandle) -> bool {
        self.assets.contains_key(&handle)
    }

    /// Live handles showing a model called `name`
    pub fn handles_named(&self, name: &str) -> Vec<AssetHandle> {
        let mut handles: Vec<AssetHandle> = self
            .assets
            .iter()
            .filter(|(_, model)| model.name == name)
            .map(|(handle, _)| *handle)
            .collect();
        handles.sort_by_key(|h| h.0);
        handles
    }

    pub fn model(&self, handle: AssetHandle) -> Option<&LoadedModel> {
        self.assets.get(&handle)
    }

    /// Handles destroyed so far, oldest first
    pub fn destroyed(&self) -> &[AssetHandle] {
        &self.destroyed
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn marker(&self, handle: MarkerHandle) -> Option<&Marker> {
        self.markers.get(&handle)
    }

    /// Text of the on-screen point counter
    pub fn point_label(&self) -> &str {
        &self.point_label
    }
}

impl Engine for HeadlessEngine {
    fn load(&mut self, path: &Path, name: &str) -> Result<AssetHandle, EngineError> {
        let content = std::fs::read(path)?;
        let parts: Vec<Part> = parse_obj_groups(&String::from_utf8_lossy(&content))
            .into_iter()
            .map(Part::new)
            .collect();

        let handle = AssetHandle(self.next_id());
        debug!(model = %name, handle = %handle, parts = parts.len(), "Headless model loaded");
        self.assets.insert(
            handle,
            LoadedModel {
                name: name.to_string(),
                path: path.to_path_buf(),
                parts,
            },
        );
        Ok(handle)
    }

    fn destroy(&mut self, handle: AssetHandle) {
        if self.assets.remove(&handle).is_some() {
            self.destroyed.push(handle);
        }
    }

    fn parts(&self, handle: AssetHandle) -> Option<&[Part]> {
        self.assets.get(&handle).map(|model| model.parts.as_slice())
    }

    fn parts_mut(&mut self, handle: AssetHandle) -> Option<&mut [Part]> {
        self.assets
            .get_mut(&handle)
            .map(|model| model.parts.as_mut_slice())
    }

    fn spawn_marker(&mut self, ordinal: usize) -> Option<MarkerHandle> {
        let position = self.anchor?;
        let handle = MarkerHandle(self.next_id());
        self.markers.insert(
            handle,
            Marker {
                name: format!("GreenSphere_{}", ordinal),
                position,
                scale: MARKER_SCALE,
                material: Material {
                    color: MARKER_COLOR,
                    ..Default::default()
                },
            },
        );
        Some(handle)
    }

    fn destroy_marker(&mut self, marker: MarkerHandle) {
        self.markers.remove(&marker);
    }

    fn show_point_count(&mut self, count: usize) {
        self.point_label = format!("Point Number :{}", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_obj_groups() {
        let obj = "# exported\nmtllib skin.mtl\no 皮肤\nv 0 0 0\ng 皮肤\nf 1 1 1\no Hematoma\nusemtl red\ng\no  Channel \n";
        assert_eq!(parse_obj_groups(obj), vec!["皮肤", "Hematoma", "Channel"]);
    }

    #[test]
    fn test_parse_obj_without_groups() {
        assert_eq!(parse_obj_groups("v 0 0 0\nf 1 1 1\n"), vec![DEFAULT_PART]);
        assert_eq!(parse_obj_groups(""), vec![DEFAULT_PART]);
    }

    #[test]
    fn test_load_and_destroy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.obj");
        std::fs::write(&path, "o Body\nv 1\n").unwrap();

        let mut engine = HeadlessEngine::new(None);
        let handle = engine.load(&path, "a").unwrap();
        assert!(engine.is_live(handle));
        assert_eq!(engine.parts(handle).unwrap()[0].name, "Body");
        assert_eq!(engine.handles_named("a"), vec![handle]);

        engine.destroy(handle);
        assert!(!engine.is_live(handle));
        assert_eq!(engine.destroyed(), &[handle]);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut engine = HeadlessEngine::new(None);
        let err = engine.load(&dir.path().join("gone.obj"), "gone").unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
    }

    #[test]
    fn test_markers_need_anchor() {
        let mut engine = HeadlessEngine::new(None);
        assert!(engine.spawn_marker(1).is_none());

        let mut engine = HeadlessEngine::new(Some([0.0, 1.5, 0.0]));
        let marker = engine.spawn_marker(1).unwrap();
        let spawned = engine.marker(marker).unwrap();
        assert_eq!(spawned.name, "GreenSphere_1");
        assert_eq!(spawned.position, [0.0, 1.5, 0.0]);
        assert_eq!(spawned.material.color, MARKER_COLOR);

        engine.destroy_marker(marker);
        assert_eq!(engine.marker_count(), 0);
    }
}
