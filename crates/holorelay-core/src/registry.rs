//! Model registry: live asset handles and their child metadata
//!
//! The handle map and the info map sit behind separate locks, so a load
//! installing a handle never blocks a heartbeat reading child metadata and
//! the other way round. Keys are logical names and are lower-cased on every
//! call.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::engine::{AssetHandle, Part};

/// Metadata for one child part, as broadcast on the heartbeat channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f32>,
}

impl ChildDescriptor {
    pub fn from_part(part: &Part) -> Self {
        Self {
            name: part.name.clone(),
            color: part.material.map(|m| m.color),
            alpha: part.material.map(|m| m.alpha),
        }
    }
}

/// Describe parts in enumeration order
pub fn describe_parts(parts: &[Part]) -> Vec<ChildDescriptor> {
    parts.iter().map(ChildDescriptor::from_part).collect()
}

/// Filtered view of the info map sent to heartbeat clients
///
/// Serializes to `{}` or `{"skin":[...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeartbeatSnapshot(pub BTreeMap<String, Vec<ChildDescriptor>>);

impl HeartbeatSnapshot {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode as one newline-terminated JSON line
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

fn registry_key(name: &str) -> String {
    name.to_lowercase()
}

/// Shared registry of loaded models
#[derive(Debug, Default)]
pub struct ModelRegistry {
    handles: RwLock<HashMap<String, AssetHandle>>,
    info: RwLock<HashMap<String, Vec<ChildDescriptor>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` under `name`, returning the handle it replaced
    ///
    /// The caller owns retiring the returned handle through the engine.
    pub async fn upsert(&self, name: &str, handle: AssetHandle) -> Option<AssetHandle> {
        self.handles.write().await.insert(registry_key(name), handle)
    }

    pub async fn get(&self, name: &str) -> Option<AssetHandle> {
        self.handles.read().await.get(&registry_key(name)).copied()
    }

    /// Logical names with a live handle, sorted
    pub async fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Replace the child metadata for `name` wholesale
    pub async fn set_info(&self, name: &str, descriptors: Vec<ChildDescriptor>) {
        self.info.write().await.insert(registry_key(name), descriptors);
    }

    pub async fn get_info(&self, name: &str) -> Option<Vec<ChildDescriptor>> {
        self.info.read().await.get(&registry_key(name)).cloned()
    }

    /// Copy of the whole info map
    pub async fn info_snapshot(&self) -> HashMap<String, Vec<ChildDescriptor>> {
        self.info.read().await.clone()
    }

    /// Snapshot containing only `model`, or nothing if it has no metadata
    pub async fn heartbeat_snapshot(&self, model: &str) -> HeartbeatSnapshot {
        let key = registry_key(model);
        let descriptors = self.info.read().await.get(&key).cloned();

        let mut snapshot = BTreeMap::new();
        if let Some(descriptors) = descriptors {
            snapshot.insert(key, descriptors);
        }
        HeartbeatSnapshot(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appearance::Material;

    fn descriptor(name: &str, color: [f32; 3], alpha: f32) -> ChildDescriptor {
        ChildDescriptor {
            name: name.to_string(),
            color: Some(color),
            alpha: Some(alpha),
        }
    }

    #[tokio::test]
    async fn test_upsert_returns_previous() {
        let registry = ModelRegistry::new();
        assert_eq!(registry.upsert("Skin", AssetHandle(1)).await, None);
        assert_eq!(registry.upsert("skin", AssetHandle(2)).await, Some(AssetHandle(1)));
        assert_eq!(registry.get("SKIN").await, Some(AssetHandle(2)));
        assert_eq!(registry.models().await, vec!["skin"]);
    }

    #[tokio::test]
    async fn test_info_is_replaced_wholesale() {
        let registry = ModelRegistry::new();
        registry
            .set_info("skin", vec![descriptor("a", [1.0, 1.0, 1.0], 1.0), descriptor("b", [0.0, 0.0, 0.0], 1.0)])
            .await;
        registry.set_info("skin", vec![descriptor("c", [0.5, 0.5, 0.5], 0.5)]).await;

        let info = registry.get_info("skin").await.unwrap();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].name, "c");
        assert!(registry.get_info("mark").await.is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_snapshot_empty() {
        let registry = ModelRegistry::new();
        registry.set_info("mark", vec![descriptor("m", [1.0, 1.0, 1.0], 1.0)]).await;

        let snapshot = registry.heartbeat_snapshot("skin").await;
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.to_line().unwrap(), "{}\n");
    }

    #[tokio::test]
    async fn test_heartbeat_snapshot_shape() {
        let registry = ModelRegistry::new();
        registry.set_info("skin", vec![descriptor("皮肤", [1.0, 0.5, 0.25], 0.75)]).await;
        registry.set_info("mark", vec![descriptor("m", [1.0, 1.0, 1.0], 1.0)]).await;

        let line = registry.heartbeat_snapshot("skin").await.to_line().unwrap();
        assert_eq!(
            line,
            "{\"skin\":[{\"name\":\"皮肤\",\"color\":[1.0,0.5,0.25],\"alpha\":0.75}]}\n"
        );
    }

    #[test]
    fn test_descriptor_without_material() {
        let mut part = Part::new("wire");
        part.material = None;
        let json = serde_json::to_string(&ChildDescriptor::from_part(&part)).unwrap();
        assert_eq!(json, "{\"name\":\"wire\"}");

        let part = Part {
            name: "body".to_string(),
            material: Some(Material::default()),
        };
        let descriptors = describe_parts(&[part]);
        assert_eq!(descriptors[0].color, Some([1.0, 1.0, 1.0]));
        assert_eq!(descriptors[0].alpha, Some(1.0));
    }
}
