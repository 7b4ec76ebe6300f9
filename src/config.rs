//! Configuration management for PTZ control

use crate::tally::TallyConfig;
use crate::visca::{DEFAULT_MEMORY_SPEED, DEFAULT_PORT, MAX_POSITION};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Upper bound for any configured interval or timeout
const MAX_SECS: f64 = 86_400.0;

/// The handshake carries the id count in one byte
const MAX_TALLY_IDS: usize = 255;

const KEEPALIVE_ID: u8 = 0xFF;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Cameras in tally order; PTZ-capable cameras must come first
    #[serde(default, rename = "camera")]
    pub cameras: Vec<CameraEntry>,

    #[serde(default)]
    pub visca: ViscaConfig,

    #[serde(default)]
    pub tally: TallySettings,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

/// Control and status servers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    /// HTTP status endpoint port
    #[serde(default = "default_web_port")]
    pub web_port: u16,

    /// WebSocket control port
    #[serde(default = "default_control_port")]
    pub control_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            web_port: default_web_port(),
            control_port: default_control_port(),
        }
    }
}

/// One camera on the VISCA network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraEntry {
    pub address: IpAddr,

    /// Non-PTZ cameras only receive the global power and focus-lock commands
    #[serde(default = "default_true")]
    pub ptz: bool,
}

/// Camera protocol settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViscaConfig {
    #[serde(default = "default_visca_port")]
    pub port: u16,

    /// Pan/tilt speed used for memory recall (0x01-0x18)
    #[serde(default = "default_memory_speed")]
    pub memory_speed: u8,

    /// Upper bound for single camera operations (seconds)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: f64,

    /// Upper bound for a complete recall sequence (seconds)
    #[serde(default = "default_recall_timeout")]
    pub recall_timeout_secs: f64,
}

impl Default for ViscaConfig {
    fn default() -> Self {
        Self {
            port: default_visca_port(),
            memory_speed: default_memory_speed(),
            command_timeout_secs: default_command_timeout(),
            recall_timeout_secs: default_recall_timeout(),
        }
    }
}

/// Tally source connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TallySettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_tally_host")]
    pub host: String,

    #[serde(default = "default_tally_port")]
    pub port: u16,

    /// Tally device ids in camera order, as numbered by the vision mixer
    #[serde(default)]
    pub ids: Vec<u8>,

    #[serde(default = "default_keepalive")]
    pub keepalive_secs: f64,

    #[serde(default = "default_reconnect_floor")]
    pub reconnect_floor_secs: f64,

    #[serde(default = "default_reconnect_ceiling")]
    pub reconnect_ceiling_secs: f64,
}

impl Default for TallySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_tally_host(),
            port: default_tally_port(),
            ids: Vec::new(),
            keepalive_secs: default_keepalive(),
            reconnect_floor_secs: default_reconnect_floor(),
            reconnect_ceiling_secs: default_reconnect_ceiling(),
        }
    }
}

/// Controller relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_relay_bind")]
    pub bind: SocketAddr,

    /// Initial state of the operator "allow on-air change" switch
    #[serde(default)]
    pub allow_on_air_change: bool,

    /// Tally state meaning "preview only"
    #[serde(default = "default_preview_code")]
    pub preview_code: u8,

    /// Bits of the tally state meaning "on air"
    #[serde(default = "default_on_air_mask")]
    pub on_air_mask: u8,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_relay_bind(),
            allow_on_air_change: false,
            preview_code: default_preview_code(),
            on_air_mask: default_on_air_mask(),
        }
    }
}

/// Position button storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Memory buttons per PTZ camera
    #[serde(default = "default_buttons")]
    pub buttons: u8,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            buttons: default_buttons(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_web_port() -> u16 {
    8080
}
fn default_control_port() -> u16 {
    8765
}
fn default_visca_port() -> u16 {
    DEFAULT_PORT
}
fn default_memory_speed() -> u8 {
    DEFAULT_MEMORY_SPEED
}
fn default_command_timeout() -> f64 {
    5.0
}
fn default_recall_timeout() -> f64 {
    20.0
}
fn default_tally_host() -> String {
    "127.0.0.1".to_string()
}
fn default_tally_port() -> u16 {
    7411
}
fn default_keepalive() -> f64 {
    10.0
}
fn default_reconnect_floor() -> f64 {
    1.0
}
fn default_reconnect_ceiling() -> f64 {
    20.0
}
fn default_relay_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}
fn default_preview_code() -> u8 {
    crate::routing::DEFAULT_PREVIEW_CODE
}
fn default_on_air_mask() -> u8 {
    crate::routing::DEFAULT_ON_AIR_MASK
}
fn default_store_path() -> PathBuf {
    PathBuf::from("db/positions.json")
}
fn default_buttons() -> u8 {
    18
}

impl Config {
    /// Loads configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Loads configuration from TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cameras.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[camera]] is required".to_string(),
            ));
        }

        if let Some(pos) = self.cameras.iter().position(|c| !c.ptz) {
            if self.cameras[pos..].iter().any(|c| c.ptz) {
                return Err(ConfigError::Invalid(
                    "PTZ cameras must be listed before other cameras".to_string(),
                ));
            }
        }

        let visca = &self.visca;
        if visca.memory_speed == 0 || visca.memory_speed > DEFAULT_MEMORY_SPEED {
            return Err(ConfigError::Invalid(format!(
                "memory_speed must be between 0x01 and 0x18, got {:#04x}",
                visca.memory_speed
            )));
        }
        validate_secs("command_timeout_secs", visca.command_timeout_secs)?;
        validate_secs("recall_timeout_secs", visca.recall_timeout_secs)?;

        self.validate_tally()?;

        let buttons = self.store.buttons;
        if buttons == 0 || buttons > MAX_POSITION + 1 {
            return Err(ConfigError::Invalid(format!(
                "buttons must be between 1 and {}, got {}",
                MAX_POSITION as u16 + 1,
                buttons
            )));
        }

        Ok(())
    }

    fn validate_tally(&self) -> Result<(), ConfigError> {
        let tally = &self.tally;

        if tally.ids.len() > self.ptz_count() {
            return Err(ConfigError::Invalid(format!(
                "{} tally ids configured for {} PTZ cameras",
                tally.ids.len(),
                self.ptz_count()
            )));
        }

        if tally.ids.len() > MAX_TALLY_IDS {
            return Err(ConfigError::Invalid(format!(
                "at most {} tally ids are supported, got {}",
                MAX_TALLY_IDS,
                tally.ids.len()
            )));
        }

        // [0xFF, 0xFF] is the keep-alive frame
        if tally.ids.contains(&KEEPALIVE_ID) {
            return Err(ConfigError::Invalid(format!(
                "tally id {:#04x} is reserved",
                KEEPALIVE_ID
            )));
        }

        let distinct: HashSet<u8> = tally.ids.iter().copied().collect();
        if distinct.len() != tally.ids.len() {
            return Err(ConfigError::Invalid("tally ids must be distinct".to_string()));
        }

        if tally.enabled && tally.ids.is_empty() {
            return Err(ConfigError::Invalid(
                "tally is enabled but no ids are configured".to_string(),
            ));
        }

        validate_secs("keepalive_secs", tally.keepalive_secs)?;
        validate_secs("reconnect_floor_secs", tally.reconnect_floor_secs)?;
        validate_secs("reconnect_ceiling_secs", tally.reconnect_ceiling_secs)?;

        if tally.reconnect_floor_secs > tally.reconnect_ceiling_secs {
            return Err(ConfigError::Invalid(format!(
                "reconnect floor {}s exceeds ceiling {}s",
                tally.reconnect_floor_secs, tally.reconnect_ceiling_secs
            )));
        }

        Ok(())
    }

    pub fn ptz_count(&self) -> usize {
        self.cameras.iter().take_while(|c| c.ptz).count()
    }

    /// VISCA endpoints of all cameras, in configuration order
    pub fn camera_addrs(&self) -> Vec<SocketAddr> {
        self.cameras
            .iter()
            .map(|c| SocketAddr::new(c.address, self.visca.port))
            .collect()
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.visca.command_timeout_secs)
    }

    pub fn recall_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.visca.recall_timeout_secs)
    }

    pub fn tally_config(&self) -> TallyConfig {
        TallyConfig {
            host: self.tally.host.clone(),
            port: self.tally.port,
            ids: self.tally.ids.clone(),
            keepalive_interval: Duration::from_secs_f64(self.tally.keepalive_secs),
            reconnect_floor: Duration::from_secs_f64(self.tally.reconnect_floor_secs),
            reconnect_ceiling: Duration::from_secs_f64(self.tally.reconnect_ceiling_secs),
        }
    }
}

fn validate_secs(name: &str, secs: f64) -> Result<(), ConfigError> {
    if !secs.is_finite() || secs <= 0.0 || secs > MAX_SECS {
        return Err(ConfigError::Invalid(format!(
            "{} must be between 0 and {} seconds, got {}",
            name, MAX_SECS, secs
        )));
    }
    Ok(())
}
