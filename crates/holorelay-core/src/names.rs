//! Skin part names received through the reserved name-list file

use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared, wholesale-replaced list of skin part names
#[derive(Debug, Clone, Default)]
pub struct NameList {
    names: Arc<RwLock<Vec<String>>>,
}

impl NameList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list, returning the new length
    pub async fn replace(&self, names: Vec<String>) -> usize {
        let count = names.len();
        *self.names.write().await = names;
        count
    }

    pub async fn get(&self) -> Vec<String> {
        self.names.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.names.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.names.read().await.is_empty()
    }
}
