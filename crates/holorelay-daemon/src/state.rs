//! Application state management

use anyhow::{Context, Result};
use holorelay_core::{
    Dispatcher, DispatcherHandle, Engine, ModelRegistry, NameList, RelayEvent,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::Config;
use crate::heartbeat::HeartbeatClients;

/// Shared application state
pub struct AppState {
    /// Configuration
    pub config: Config,
    /// Live model handles and cached part metadata
    pub registry: Arc<ModelRegistry>,
    /// Skin part names from the last name-list file
    pub names: NameList,
    /// Queue into the engine
    pub dispatcher: DispatcherHandle,
    /// Connected heartbeat clients
    pub clients: HeartbeatClients,
    /// Event broadcast for monitoring and tests
    pub events: broadcast::Sender<RelayEvent>,
}

impl AppState {
    /// Create new application state and start the engine dispatcher
    pub async fn new<E: Engine>(config: Config, engine: E) -> Result<Arc<Self>> {
        let storage_root = &config.transfer.storage_root;
        tokio::fs::create_dir_all(storage_root)
            .await
            .with_context(|| format!("creating storage root {}", storage_root.display()))?;
        info!(path = %storage_root.display(), "Storage root ready");

        let registry = Arc::new(ModelRegistry::new());
        let names = NameList::new();
        let (events, _) = broadcast::channel(256);

        let (dispatcher, _task) = Dispatcher::new(
            engine,
            registry.clone(),
            names.clone(),
            config.dispatch_options(),
            events.clone(),
        )
        .spawn();

        Ok(Arc::new(Self {
            config,
            registry,
            names,
            dispatcher,
            clients: HeartbeatClients::new(),
            events,
        }))
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: RelayEvent) {
        let _ = self.events.send(event);
    }

    /// Current number of point markers
    pub fn point_count(&self) -> usize {
        self.dispatcher.point_count()
    }
}
