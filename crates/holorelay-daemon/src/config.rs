//! Configuration loading and validation

use anyhow::Result;
use holorelay_core::{AssetRules, DispatchOptions, FrameLimits};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub markers: MarkersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Host address all three listeners bind to
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Concurrent connections per listener; further clients wait in the backlog
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// How long shutdown waits for connection workers before aborting them
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_connections: default_max_connections(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_max_connections() -> usize {
    64
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_transfer_port")]
    pub port: u16,
    /// Directory received files are written to
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    /// Extensions (without dot) that trigger a model load
    #[serde(default = "default_model_extensions")]
    pub model_extensions: Vec<String>,
    /// Largest accepted payload
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,
    /// Longest accepted file name, in bytes
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            port: default_transfer_port(),
            storage_root: default_storage_root(),
            model_extensions: default_model_extensions(),
            max_payload_bytes: default_max_payload_bytes(),
            max_name_len: default_max_name_len(),
        }
    }
}

fn default_transfer_port() -> u16 {
    9000
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./received")
}

fn default_model_extensions() -> Vec<String> {
    vec!["obj".to_string()]
}

fn default_max_payload_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_max_name_len() -> usize {
    255
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_port")]
    pub port: u16,
    /// Longest accepted command line, in bytes
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            port: default_control_port(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

fn default_control_port() -> u16 {
    9100
}

fn default_max_line_bytes() -> usize {
    64 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_port")]
    pub port: u16,
    /// Delay between two heartbeat lines to one client
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
    /// The only model included in heartbeat snapshots
    #[serde(default = "default_skin_model")]
    pub model: String,
    /// Refresh cached part metadata after color/opacity commands
    #[serde(default)]
    pub refresh_on_mutation: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            port: default_heartbeat_port(),
            interval_ms: default_heartbeat_interval_ms(),
            model: default_skin_model(),
            refresh_on_mutation: false,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_heartbeat_port() -> u16 {
    9200
}

fn default_heartbeat_interval_ms() -> u64 {
    1000 // One line per second
}

fn default_skin_model() -> String {
    "skin".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// Model whose parts are renamed from the name list
    #[serde(default = "default_skin_model")]
    pub skin_model: String,
    /// Model colored with the yellow to white gradient
    #[serde(default = "default_mark_model")]
    pub mark_model: String,
    /// Reserved file carrying skin part names
    #[serde(default = "default_name_list_file")]
    pub name_list_file: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            skin_model: default_skin_model(),
            mark_model: default_mark_model(),
            name_list_file: default_name_list_file(),
        }
    }
}

fn default_mark_model() -> String {
    "mark".to_string()
}

fn default_name_list_file() -> String {
    "name.txt".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkersConfig {
    /// Where point markers spawn; without it add_point does nothing
    #[serde(default)]
    pub anchor: Option<[f32; 3]>,
}

impl Config {
    /// Frame header limits for the transfer channel
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_payload_bytes: self.transfer.max_payload_bytes,
            max_name_len: self.transfer.max_name_len,
        }
    }

    /// Rules for classifying received files
    pub fn asset_rules(&self) -> AssetRules {
        AssetRules {
            model_extensions: self.transfer.model_extensions.clone(),
            name_list_file: self.assets.name_list_file.clone(),
        }
    }

    /// Dispatcher presets and cache policy
    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            skin_model: self.assets.skin_model.clone(),
            mark_model: self.assets.mark_model.clone(),
            refresh_on_mutation: self.heartbeat.refresh_on_mutation,
        }
    }

    /// Reject values the listeners cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.daemon.max_connections == 0 {
            anyhow::bail!("daemon.max_connections must be at least 1");
        }
        if self.heartbeat.interval_ms == 0 {
            anyhow::bail!("heartbeat.interval_ms must be at least 1");
        }
        if self.control.max_line_bytes == 0 {
            anyhow::bail!("control.max_line_bytes must be at least 1");
        }
        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        config
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Config::default()
    };
    config.validate()?;
    Ok(config)
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let config = Config {
        markers: MarkersConfig {
            anchor: Some([0.0, 0.0, 1.5]),
        },
        ..Default::default()
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}
