//! Observable outcomes of transfers, commands and heartbeat membership

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Relay event for logging sinks, tests and monitoring
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A received file was written to the storage root
    AssetStored {
        file_name: String,
        path: PathBuf,
        bytes: u64,
        sha256: String,
        received_at: DateTime<Utc>,
    },
    /// The skin name list was replaced
    NameListUpdated { count: usize },
    /// A model finished loading and its metadata was cached
    AssetLoaded {
        model: String,
        parts: usize,
        replaced: bool,
    },
    /// The engine could not load a model; any previous handle stays live
    AssetLoadFailed { model: String, error: String },
    /// An opacity or color command was applied
    AppearanceUpdated { model: String, child: String },
    UnknownModel { model: String },
    UnknownChild { model: String, child: String },
    /// The child exists but has no material to change
    MaterialMissing { model: String, child: String },
    UnknownCommand { kind: String },
    /// A control line could not be decoded; its connection is closed
    MalformedCommand { error: String },
    PointAdded { count: usize },
    PointRemoved { count: usize },
    NothingToRemove,
    /// The engine has no reference location for markers
    MarkerAnchorMissing,
    HeartbeatClientJoined { id: String },
    HeartbeatClientLeft { id: String },
}
