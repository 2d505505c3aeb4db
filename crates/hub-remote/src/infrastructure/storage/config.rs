//! TOML-based configuration for the hub remote.
//!
//! Reads `AppConfig` from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\HubRemote\config.toml`
//! - Linux:    `~/.config/hub-remote/config.toml` (or `$XDG_CONFIG_HOME/hub-remote`)
//! - macOS:    `~/Library/Application Support/HubRemote/config.toml`
//!
//! Example:
//!
//! ```toml
//! log_level = "debug"
//!
//! [hub]
//! address = "90:84:2B:4C:84:8A"
//! characteristic_uuid = "00001624-1212-efde-1623-785feabcd123"
//!
//! [drive]
//! speed_step = 20
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "...")]`, so a missing file, a
//! missing section or a missing key all fall back to the built-in values.
//! Identifiers are kept as strings here and checked once by
//! [`AppConfig::validate`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use hub_core::{HubAddress, Port, Speed};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::application::dispatch_command::DriveSettings;
use crate::infrastructure::network::connection_manager::ConnectionConfig;
use crate::infrastructure::network::hub_session::SessionConfig;
use crate::infrastructure::network::retry::RetryPolicy;

/// Error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The characteristic UUID is not a valid UUID.
    #[error("invalid characteristic UUID {value:?}: {source}")]
    InvalidUuid {
        value: String,
        #[source]
        source: uuid::Error,
    },

    /// The hub address is not a valid Bluetooth address.
    #[error(transparent)]
    InvalidAddress(#[from] hub_core::AddressError),

    /// `[drive] speed_step` is outside `1..=100`.
    #[error("invalid drive speed_step {0}: expected 1..=100")]
    InvalidSpeedStep(i32),
}

/// Accepted range for `[drive] speed_step`.
const SPEED_STEP_RANGE: std::ops::RangeInclusive<i32> = 1..=100;

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub drive: DriveConfig,
}

/// Which hub to talk to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HubConfig {
    /// Bluetooth address, `AA:BB:CC:DD:EE:FF`.
    #[serde(default = "default_address")]
    pub address: String,
    /// The GATT characteristic every frame is written to.
    #[serde(default = "default_characteristic")]
    pub characteristic_uuid: String,
    /// Substring of the local adapter description; first adapter if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
}

/// Connection establishment settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// How long one attempt scans for the hub before giving up.
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
}

/// Write/read path settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportSettings {
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    /// Fail the session on an undecodable reply instead of skipping it.
    #[serde(default)]
    pub strict_replies: bool,
}

/// Vehicle tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriveConfig {
    #[serde(default = "default_front_port")]
    pub front_port: u8,
    #[serde(default = "default_rear_port")]
    pub rear_port: u8,
    #[serde(default = "default_steering_port")]
    pub steering_port: u8,
    #[serde(default = "default_speed_step")]
    pub speed_step: i32,
    #[serde(default = "default_steering_speed")]
    pub steering_speed: i32,
    #[serde(default = "default_steering_pulse_ms")]
    pub steering_pulse_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_address() -> String {
    "90:84:2B:4C:84:8A".to_string()
}
fn default_characteristic() -> String {
    "00001624-1212-efde-1623-785feabcd123".to_string()
}
fn default_max_attempts() -> u32 {
    5
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_scan_timeout_ms() -> u64 {
    5000
}
fn default_io_timeout_ms() -> u64 {
    2000
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_initial_ms() -> u64 {
    50
}
fn default_backoff_max_ms() -> u64 {
    800
}
fn default_reply_timeout_ms() -> u64 {
    1000
}
fn default_front_port() -> u8 {
    Port::FRONT_DRIVE.id()
}
fn default_rear_port() -> u8 {
    Port::REAR_DRIVE.id()
}
fn default_steering_port() -> u8 {
    Port::STEERING.id()
}
fn default_speed_step() -> i32 {
    10
}
fn default_steering_speed() -> i32 {
    20
}
fn default_steering_pulse_ms() -> u64 {
    10
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            characteristic_uuid: default_characteristic(),
            adapter: None,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            scan_timeout_ms: default_scan_timeout_ms(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            io_timeout_ms: default_io_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            reply_timeout_ms: default_reply_timeout_ms(),
            strict_replies: false,
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            front_port: default_front_port(),
            rear_port: default_rear_port(),
            steering_port: default_steering_port(),
            speed_step: default_speed_step(),
            steering_speed: default_steering_speed(),
            steering_pulse_ms: default_steering_pulse_ms(),
        }
    }
}

// ── Validation and conversion ─────────────────────────────────────────────────

/// The parsed identifiers of the hub, produced once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubIdentity {
    pub address: HubAddress,
    pub characteristic: Uuid,
}

impl AppConfig {
    /// Parses the hub address and characteristic UUID and checks the drive
    /// tuning.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`], [`ConfigError::InvalidUuid`]
    /// or [`ConfigError::InvalidSpeedStep`].
    pub fn validate(&self) -> Result<HubIdentity, ConfigError> {
        if !SPEED_STEP_RANGE.contains(&self.drive.speed_step) {
            return Err(ConfigError::InvalidSpeedStep(self.drive.speed_step));
        }
        let address: HubAddress = self.hub.address.parse()?;
        let characteristic =
            Uuid::parse_str(self.hub.characteristic_uuid.trim()).map_err(|source| {
                ConfigError::InvalidUuid {
                    value: self.hub.characteristic_uuid.clone(),
                    source,
                }
            })?;
        Ok(HubIdentity {
            address,
            characteristic,
        })
    }

    /// Connection attempt settings.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_attempts: self.connection.max_attempts,
            retry_delay: Duration::from_millis(self.connection.retry_delay_ms),
        }
    }

    /// Protocol session settings for the validated characteristic.
    pub fn session_config(&self, characteristic: Uuid) -> SessionConfig {
        let t = &self.transport;
        SessionConfig {
            characteristic,
            io_timeout: Duration::from_millis(t.io_timeout_ms),
            retry: RetryPolicy {
                max_retries: t.max_retries,
                initial_delay: Duration::from_millis(t.backoff_initial_ms),
                max_delay: Duration::from_millis(t.backoff_max_ms),
            },
            reply_timeout: Duration::from_millis(t.reply_timeout_ms),
            strict_replies: t.strict_replies,
        }
    }

    /// Dispatcher tuning. Out-of-range speeds are clamped.
    pub fn drive_settings(&self) -> DriveSettings {
        let d = &self.drive;
        DriveSettings {
            front_port: Port(d.front_port),
            rear_port: Port(d.rear_port),
            steering_port: Port(d.steering_port),
            speed_step: d.speed_step,
            steering_speed: Speed::clamped(d.steering_speed),
            steering_pulse: Duration::from_millis(d.steering_pulse_ms),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(platform_config_dir()
        .ok_or(ConfigError::NoPlatformConfigDir)?
        .join("config.toml"))
}

/// Loads `AppConfig` from `path`, or from the default location when `path`
/// is `None`.
///
/// A missing file yields `AppConfig::default()`. So does a missing platform
/// config directory when no explicit path was given.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match config_file_path() {
            Ok(p) => p,
            Err(ConfigError::NoPlatformConfigDir) => return Ok(AppConfig::default()),
            Err(e) => return Err(e),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Resolves the platform config directory, including the app subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        // %APPDATA% e.g. C:\Users\<user>\AppData\Roaming
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("HubRemote"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("HubRemote")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("hub-remote"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
