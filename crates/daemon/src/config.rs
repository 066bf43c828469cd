//! Configuration management for the OpenPip daemon.
//!
//! Configuration is loaded from TOML files in the following locations (in order):
//! 1. the platform config dir, e.g. `~/.config/openpip/config.toml` or
//!    `%APPDATA%/openpip/config.toml`
//! 2. `~/.config/openpip/config.toml` (Unix-style fallback)
//! 3. `./config.toml` (current directory, for development)

use anyhow::{Context, Result};
use directories::ProjectDirs;
use openpip_core_transition::Rect;
use openpip_ipc::DEFAULT_IPC_ADDR;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure for OpenPip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Behavior configuration.
    pub behavior: BehaviorConfig,
    /// IPC server configuration.
    pub ipc: IpcConfig,
    /// Display transfer configuration.
    pub transfer: TransferConfig,
    /// Floating window configuration.
    pub pip: PipConfig,
    /// Displays known at startup.
    pub displays: Vec<DisplayConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            behavior: BehaviorConfig::default(),
            ipc: IpcConfig::default(),
            transfer: TransferConfig::default(),
            pip: PipConfig::default(),
            displays: default_displays(),
        }
    }
}

/// Behavior-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to enter PiP on startup.
    #[serde(default = "default_true")]
    pub enter_on_start: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enter_on_start: true,
        }
    }
}

/// IPC server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Socket address the daemon listens on.
    #[serde(default = "default_ipc_address")]
    pub address: String,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            address: default_ipc_address(),
        }
    }
}

/// Display transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// How long a transfer may wait for its transaction, in milliseconds.
    /// 0 disables the timeout.
    #[serde(default = "default_transfer_timeout")]
    pub timeout_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_transfer_timeout(),
        }
    }
}

/// Floating window configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipConfig {
    /// Width of the floating window in pixels.
    #[serde(default = "default_pip_width")]
    pub width: i32,

    /// Height of the floating window in pixels.
    #[serde(default = "default_pip_height")]
    pub height: i32,

    /// Distance from the display's bottom-right corner in pixels.
    #[serde(default = "default_pip_margin")]
    pub margin: i32,

    /// Display to enter PiP on. Defaults to the primary display.
    #[serde(default)]
    pub initial_display: Option<u32>,
}

impl Default for PipConfig {
    fn default() -> Self {
        Self {
            width: default_pip_width(),
            height: default_pip_height(),
            margin: default_pip_margin(),
            initial_display: None,
        }
    }
}

/// A display entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub primary: bool,
}

impl DisplayConfig {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

/// A configuration value that was invalid and got replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
}

impl ConfigWarning {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

// Default value functions for serde
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_ipc_address() -> String {
    DEFAULT_IPC_ADDR.to_string()
}

fn default_transfer_timeout() -> u64 {
    3000
}

fn default_pip_width() -> i32 {
    320
}

fn default_pip_height() -> i32 {
    180
}

fn default_pip_margin() -> i32 {
    24
}

fn default_displays() -> Vec<DisplayConfig> {
    vec![DisplayConfig {
        id: 0,
        name: "builtin".to_string(),
        x: 0,
        y: 0,
        width: 1920,
        height: 1080,
        primary: true,
    }]
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const MIN_PIP_SIZE: i32 = 48;

impl Config {
    /// Load configuration from standard locations.
    ///
    /// Returns default config if no file is found.
    pub fn load() -> Result<Self> {
        let paths = config_paths();

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Replace invalid values with defaults and report what was changed.
    pub fn validate(&mut self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let level = self.behavior.log_level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            warnings.push(ConfigWarning::new(
                "behavior.log_level",
                format!("unknown level '{}', using 'info'", self.behavior.log_level),
            ));
            self.behavior.log_level = default_log_level();
        }

        if self.ipc.address.parse::<std::net::SocketAddr>().is_err() {
            warnings.push(ConfigWarning::new(
                "ipc.address",
                format!("'{}' is not a socket address, using {}", self.ipc.address, DEFAULT_IPC_ADDR),
            ));
            self.ipc.address = default_ipc_address();
        }

        if self.pip.width < MIN_PIP_SIZE || self.pip.height < MIN_PIP_SIZE {
            warnings.push(ConfigWarning::new(
                "pip",
                format!(
                    "size {}x{} is below {MIN_PIP_SIZE}px, using defaults",
                    self.pip.width, self.pip.height
                ),
            ));
            self.pip.width = default_pip_width();
            self.pip.height = default_pip_height();
        }

        if self.pip.margin < 0 {
            warnings.push(ConfigWarning::new("pip.margin", "negative margin, using 0"));
            self.pip.margin = 0;
        }

        let before = self.displays.len();
        let mut seen = std::collections::HashSet::new();
        self.displays.retain(|d| {
            let rect = d.rect();
            !rect.is_empty() && rect.edges_in_range() && seen.insert(d.id)
        });
        if self.displays.len() != before {
            warnings.push(ConfigWarning::new(
                "displays",
                format!(
                    "dropped {} display(s) with empty or out of range bounds or duplicate ids",
                    before - self.displays.len()
                ),
            ));
        }
        if self.displays.is_empty() {
            warnings.push(ConfigWarning::new("displays", "no usable displays, using default"));
            self.displays = default_displays();
        }

        let primaries = self.displays.iter().filter(|d| d.primary).count();
        if primaries != 1 {
            warnings.push(ConfigWarning::new(
                "displays",
                format!("{primaries} primary displays, marking the first one primary"),
            ));
            for (i, display) in self.displays.iter_mut().enumerate() {
                display.primary = i == 0;
            }
        }

        if let Some(initial) = self.pip.initial_display {
            if !self.displays.iter().any(|d| d.id == initial) {
                warnings.push(ConfigWarning::new(
                    "pip.initial_display",
                    format!("display {initial} is not configured, using the primary display"),
                ));
                self.pip.initial_display = None;
            }
        }

        warnings
    }
}

/// Get all possible config file paths in priority order.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(proj_dirs) = ProjectDirs::from("com", "openpip", "openpip") {
        paths.push(proj_dirs.config_dir().join("config.toml"));
    }

    if let Some(home) = dirs_home() {
        let unix_style = home.join(".config").join("openpip").join("config.toml");
        if !paths.contains(&unix_style) {
            paths.push(unix_style);
        }
    }

    paths.push(PathBuf::from("config.toml"));

    paths
}

/// Get the user's home directory.
fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}
