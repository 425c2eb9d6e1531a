//! Engine dispatcher
//!
//! Network tasks never call the engine. They enqueue an [`EngineRequest`]
//! through a [`DispatcherHandle`], which never blocks, and the one thread that
//! owns the engine applies requests in FIFO order. That thread is also the
//! only writer of the info map, and the only owner of the point marker
//! stack.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::appearance::{mark_gradient, skin_color, Material};
use crate::engine::{AssetHandle, Engine, MarkerHandle, Part};
use crate::event::RelayEvent;
use crate::names::NameList;
use crate::registry::{describe_parts, ModelRegistry};

/// Work queued for the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineRequest {
    /// Load a stored model under its logical name
    LoadAsset { path: PathBuf, name: String },
    SetOpacity {
        model: String,
        child: String,
        opacity: f32,
    },
    SetColor {
        model: String,
        child: String,
        rgb: [f32; 3],
    },
    AddPoint,
    RemovePoint,
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Engine dispatcher has stopped")]
    Closed,
}

/// Model names with load-time presets, and cache policy
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Model whose parts are renamed from the name list
    pub skin_model: String,
    /// Model whose parts get the yellow to white gradient
    pub mark_model: String,
    /// Rewrite cached metadata after every appearance change
    pub refresh_on_mutation: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            skin_model: "skin".to_string(),
            mark_model: "mark".to_string(),
            refresh_on_mutation: false,
        }
    }
}

/// Last-in first-out stack of spawned point markers
#[derive(Debug, Default)]
pub struct MarkerStack {
    markers: Vec<MarkerHandle>,
}

impl MarkerStack {
    pub fn push(&mut self, marker: MarkerHandle) {
        self.markers.push(marker);
    }

    pub fn pop(&mut self) -> Option<MarkerHandle> {
        self.markers.pop()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

/// Cloneable sender side of the dispatcher queue
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<EngineRequest>,
    point_count: watch::Receiver<usize>,
}

impl DispatcherHandle {
    /// Enqueue a request without waiting for it to be applied
    pub fn send(&self, request: EngineRequest) -> Result<(), DispatchError> {
        self.tx.send(request).map_err(|_| DispatchError::Closed)
    }

    /// Current number of point markers
    pub fn point_count(&self) -> usize {
        *self.point_count.borrow()
    }
}

/// Owner of the engine and applier of queued requests
pub struct Dispatcher<E: Engine> {
    engine: E,
    registry: Arc<ModelRegistry>,
    names: NameList,
    markers: MarkerStack,
    options: DispatchOptions,
    events: broadcast::Sender<RelayEvent>,
    point_count: watch::Sender<usize>,
}

impl<E: Engine> Dispatcher<E> {
    pub fn new(
        engine: E,
        registry: Arc<ModelRegistry>,
        names: NameList,
        options: DispatchOptions,
        events: broadcast::Sender<RelayEvent>,
    ) -> Self {
        let (point_count, _) = watch::channel(0);
        Self {
            engine,
            registry,
            names,
            markers: MarkerStack::default(),
            options,
            events,
            point_count,
        }
    }

    /// Run on a dedicated blocking thread, so engine calls that block (file
    /// reads, decoding) never stall the runtime workers. The thread ends,
    /// handing back the engine, once every handle is dropped.
    pub fn spawn(self) -> (DispatcherHandle, JoinHandle<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = DispatcherHandle {
            tx,
            point_count: self.point_count.subscribe(),
        };
        let runtime = Handle::current();
        let task = tokio::task::spawn_blocking(move || runtime.block_on(self.run(rx)));
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineRequest>) -> E {
        info!("Engine dispatcher started");
        while let Some(request) = rx.recv().await {
            self.apply(request).await;
        }
        info!("Engine dispatcher stopped");
        self.engine
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn point_count(&self) -> usize {
        self.markers.len()
    }

    /// Apply one request
    pub async fn apply(&mut self, request: EngineRequest) {
        debug!(request = ?request, "Applying engine request");
        match request {
            EngineRequest::LoadAsset { path, name } => self.load_asset(path, name).await,
            EngineRequest::SetOpacity {
                model,
                child,
                opacity,
            } => {
                self.update_material(model, child, |material| material.apply_opacity(opacity))
                    .await
            }
            EngineRequest::SetColor { model, child, rgb } => {
                self.update_material(model, child, |material| material.apply_color(rgb))
                    .await
            }
            EngineRequest::AddPoint => self.add_point(),
            EngineRequest::RemovePoint => self.remove_point(),
        }
    }

    fn emit(&self, event: RelayEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn load_asset(&mut self, path: PathBuf, name: String) {
        let handle = match self.engine.load(&path, &name) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(model = %name, path = %path.display(), error = %e, "Failed to load model");
                self.emit(RelayEvent::AssetLoadFailed {
                    model: name,
                    error: e.to_string(),
                });
                return;
            }
        };

        if name == self.options.skin_model.to_lowercase() {
            let names = self.names.get().await;
            if let Some(parts) = self.engine.parts_mut(handle) {
                for (part, new_name) in parts.iter_mut().zip(names.iter()) {
                    debug!(from = %part.name, to = %new_name, "Renaming skin part");
                    part.name = new_name.clone();
                    if let Some(material) = part.material.as_mut() {
                        material.apply_color(skin_color(new_name));
                    }
                }
            }
        }

        if name == self.options.mark_model.to_lowercase() {
            if let Some(parts) = self.engine.parts_mut(handle) {
                apply_mark_gradient(parts);
            }
        }

        let descriptors = self
            .engine
            .parts(handle)
            .map(describe_parts)
            .unwrap_or_default();
        let parts = descriptors.len();

        let previous = self.registry.upsert(&name, handle).await;
        if let Some(previous) = previous.filter(|previous| *previous != handle) {
            debug!(model = %name, handle = %previous, "Retiring previous model");
            self.engine.destroy(previous);
        }
        self.registry.set_info(&name, descriptors).await;

        info!(model = %name, handle = %handle, parts, replaced = previous.is_some(), "Model loaded");
        self.emit(RelayEvent::AssetLoaded {
            model: name,
            parts,
            replaced: previous.is_some(),
        });
    }

    async fn update_material<F>(&mut self, model: String, child: String, change: F)
    where
        F: FnOnce(&mut Material),
    {
        let Some(handle) = self.registry.get(&model).await else {
            warn!(model = %model, "Model not found");
            self.emit(RelayEvent::UnknownModel { model });
            return;
        };

        if let Err(event) = change_part(&mut self.engine, handle, &model, &child, change) {
            self.emit(event);
            return;
        }

        if self.options.refresh_on_mutation {
            let descriptors = self
                .engine
                .parts(handle)
                .map(describe_parts)
                .unwrap_or_default();
            self.registry.set_info(&model, descriptors).await;
        }

        self.emit(RelayEvent::AppearanceUpdated { model, child });
    }

    fn publish_count(&mut self) -> usize {
        let count = self.markers.len();
        self.engine.show_point_count(count);
        self.point_count.send_replace(count);
        count
    }

    fn add_point(&mut self) {
        let ordinal = self.markers.len() + 1;
        match self.engine.spawn_marker(ordinal) {
            Some(marker) => {
                self.markers.push(marker);
                let count = self.publish_count();
                info!(marker = %marker, count, "Added point");
                self.emit(RelayEvent::PointAdded { count });
            }
            None => {
                warn!("Marker reference location not found");
                self.emit(RelayEvent::MarkerAnchorMissing);
            }
        }
    }

    fn remove_point(&mut self) {
        match self.markers.pop() {
            Some(marker) => {
                self.engine.destroy_marker(marker);
                let count = self.publish_count();
                info!(marker = %marker, count, "Removed point");
                self.emit(RelayEvent::PointRemoved { count });
            }
            None => {
                self.publish_count();
                info!("No point to remove");
                self.emit(RelayEvent::NothingToRemove);
            }
        }
    }
}

/// Resolve `child` on a live model and apply `change` to its material
fn change_part<E, F>(
    engine: &mut E,
    handle: AssetHandle,
    model: &str,
    child: &str,
    change: F,
) -> Result<(), RelayEvent>
where
    E: Engine,
    F: FnOnce(&mut Material),
{
    let Some(parts) = engine.parts_mut(handle) else {
        warn!(model = %model, handle = %handle, "Model handle is no longer live");
        return Err(RelayEvent::UnknownModel {
            model: model.to_string(),
        });
    };
    let Some(part) = parts.iter_mut().find(|part| part.name == child) else {
        warn!(model = %model, child = %child, "Child not found in model");
        return Err(RelayEvent::UnknownChild {
            model: model.to_string(),
            child: child.to_string(),
        });
    };
    let Some(material) = part.material.as_mut() else {
        warn!(model = %model, child = %child, "Material missing on child");
        return Err(RelayEvent::MaterialMissing {
            model: model.to_string(),
            child: child.to_string(),
        });
    };

    change(material);
    info!(
        model = %model,
        child = %child,
        color = ?material.color,
        alpha = material.alpha,
        blend = ?material.blend,
        "Updated appearance"
    );
    Ok(())
}

/// Yellow to white across the parts; the step only advances on parts that
/// have a material, while the span counts every part
pub fn apply_mark_gradient(parts: &mut [Part]) {
    let total = parts.len();
    let mut index = 0;
    for part in parts.iter_mut() {
        if let Some(material) = part.material.as_mut() {
            material.apply_color(mark_gradient(index, total));
            index += 1;
        }
    }
}
