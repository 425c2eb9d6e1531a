//! holorelay core - protocol, registry and dispatch types
//!
//! This crate holds everything the listeners share:
//! - Asset transfer frame codec and received file classification
//! - Control channel command decoding
//! - Model registry with separately locked handle and metadata maps
//! - Engine seam, the FIFO engine dispatcher, and a headless engine

pub mod appearance;
pub mod asset;
pub mod command;
pub mod dispatcher;
pub mod engine;
pub mod event;
pub mod frame;
pub mod headless;
pub mod names;
pub mod registry;

pub use appearance::{BlendMode, Material};
pub use asset::{AssetKind, AssetRules};
pub use command::{Command, CommandError};
pub use dispatcher::{DispatchError, DispatchOptions, Dispatcher, DispatcherHandle, EngineRequest};
pub use engine::{AssetHandle, Engine, EngineError, MarkerHandle, Part};
pub use event::RelayEvent;
pub use frame::{FrameError, FrameHeader, FrameLimits};
pub use headless::HeadlessEngine;
pub use names::NameList;
pub use registry::{ChildDescriptor, HeartbeatSnapshot, ModelRegistry};
