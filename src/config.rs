//! Configuration loading using Figment
//!
//! Settings are loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `LIDAR_LINK_`, nested keys joined
//!    with `__` (e.g. `LIDAR_LINK_DEVICE__HOST=10.0.0.7`)
//!
//! The [`EndpointConfig`] part is immutable for the lifetime of a client. It
//! can also be decoded on its own from a generic attribute map with
//! [`EndpointConfig::from_attributes`], which is what the camera factory uses.
//!
//! # Example
//! ```no_run
//! use lidar_link::config::Settings;
//!
//! let settings = Settings::load_from("config/lidar_link.toml")?;
//! println!("device: {}", settings.device.endpoint());
//! # Ok::<(), lidar_link::error::ClientError>(())
//! ```

use crate::error::{AppResult, ClientError};
use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Port the device app listens on out of the box.
pub const DEFAULT_PORT: u16 = 3000;

/// Default bound on a single fetch, in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Device endpoint and acquisition settings
    pub device: EndpointConfig,
    /// Image projection settings
    #[serde(default)]
    pub raster: RasterConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default)]
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

/// How measurements are pulled from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// One request/response per measurement (`GET /measurement`).
    #[default]
    Poll,
    /// One long-lived response, one measurement per line
    /// (`GET /measurementStream`).
    Stream,
}

impl AcquisitionMode {
    /// Data path used when none is configured.
    pub fn default_data_path(self) -> &'static str {
        match self {
            AcquisitionMode::Poll => "/measurement",
            AcquisitionMode::Stream => "/measurementStream",
        }
    }
}

/// Identifies the device and how to talk to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Hostname or IP address of the device
    pub host: String,

    /// HTTP port (default: 3000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Poll or stream acquisition
    #[serde(default)]
    pub mode: AcquisitionMode,

    /// Liveness path (default: `/hello`)
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Data path; defaults per mode when unset
    #[serde(default)]
    pub data_path: Option<String>,

    /// Deadline for one fetch, in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Pause between reconnect attempts, in milliseconds (0 = immediate)
    #[serde(default)]
    pub reconnect_delay_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

impl EndpointConfig {
    /// Endpoint with default paths and timeouts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            mode: AcquisitionMode::default(),
            health_path: default_health_path(),
            data_path: None,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            reconnect_delay_ms: 0,
        }
    }

    /// Set the acquisition mode.
    pub fn with_mode(mut self, mode: AcquisitionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the fetch deadline.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// Set the pause between reconnect attempts.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// Override the data path.
    pub fn with_data_path(mut self, path: impl Into<String>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    /// Decode an endpoint from a generic attribute map.
    ///
    /// Accepts the same keys as the `[device]` table, e.g.
    /// `{ host = "10.0.0.7", port = 3000 }`.
    pub fn from_attributes(attributes: toml::Value) -> AppResult<Self> {
        let config: Self = attributes
            .try_into()
            .map_err(|e: toml::de::Error| ClientError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// `host:port`, for messages.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full URL for a path on this device.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }

    /// Liveness URL.
    pub fn health_url(&self) -> String {
        self.url(&self.health_path)
    }

    /// Data URL, honouring the per-mode default.
    pub fn data_url(&self) -> String {
        let path = self
            .data_path
            .as_deref()
            .unwrap_or_else(|| self.mode.default_data_path());
        self.url(path)
    }

    /// Fetch deadline as a `Duration`.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Reconnect pause as a `Duration`.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Check values that parse but make no sense.
    pub fn validate(&self) -> AppResult<()> {
        if self.host.trim().is_empty() {
            return Err(ClientError::Configuration("device host is empty".into()));
        }
        if self.port == 0 {
            return Err(ClientError::Configuration("device port must be > 0".into()));
        }
        for path in std::iter::once(&self.health_path).chain(self.data_path.iter()) {
            if !path.starts_with('/') {
                return Err(ClientError::Configuration(format!(
                    "path '{}' must start with '/'",
                    path
                )));
            }
        }
        if self.read_timeout_ms == 0 {
            return Err(ClientError::Configuration(
                "read_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Background fill of a rendered image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Background {
    /// All channels zero, alpha zero
    #[default]
    Transparent,
    /// Opaque black
    Black,
}

/// Image projection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterConfig {
    /// Output width in pixels
    #[serde(default = "default_raster_width")]
    pub width: u32,
    /// Output height in pixels
    #[serde(default = "default_raster_height")]
    pub height: u32,
    /// Background fill
    #[serde(default)]
    pub background: Background,
    /// Draw a crosshair at world origin
    #[serde(default)]
    pub origin_marker: bool,
    /// Crosshair arm length in pixels
    #[serde(default = "default_marker_size")]
    pub marker_size: u32,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            width: default_raster_width(),
            height: default_raster_height(),
            background: Background::default(),
            origin_marker: false,
            marker_size: default_marker_size(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "lidar-link".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_health_path() -> String {
    "/hello".to_string()
}

fn default_read_timeout() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

// viewport of the device screen, 1440x1920
fn default_raster_width() -> u32 {
    1440
}

fn default_raster_height() -> u32 {
    1920
}

fn default_marker_size() -> u32 {
    8
}

impl Settings {
    /// Load configuration from a TOML file and `LIDAR_LINK_` environment
    /// variables, then validate it.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The provider stack, exposed so callers can merge extra layers
    /// (e.g. CLI overrides) before extracting.
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("LIDAR_LINK_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ClientError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.device.validate()?;

        if self.raster.width == 0 || self.raster.height == 0 {
            return Err(ClientError::Configuration(format!(
                "Invalid raster size {}x{}",
                self.raster.width, self.raster.height
            )));
        }

        Ok(())
    }
}
