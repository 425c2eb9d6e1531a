//! HoloRelay daemon
//!
//! TCP listeners for asset transfer, control commands and heartbeats, wired
//! to the engine dispatcher from `holorelay-core`.

pub mod client;
pub mod config;
pub mod control;
pub mod heartbeat;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod transfer;
