//! TOML Configuration File Support
//!
//! Configuration for the frame controller, read from
//! `$XDG_CONFIG_HOME/frame-controller/controller.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables (`FRAME_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [api]
//! url = "http://frames.local:8888/api"
//! timeout_secs = 30
//!
//! [credentials]
//! username = "alice"
//! password = "secret"
//!
//! [device]
//! name = "Living Room"
//! state_dir = "/var/lib/frame-controller"
//!
//! [assets]
//! cache_dir = "/var/cache/frame-controller"
//! download_timeout_secs = 300
//!
//! [process]
//! kill_signal = "SIGTERM"
//! keep_viewer_on_exit = false
//!
//! [plugins]
//! install_command = "npm install --prefix /opt/frame/plugins {name}@{version}"
//!
//! [plugins.defaults]
//! frame-image = "^0.1.0"
//!
//! [sync]
//! refresh_interval_secs = 60
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::{Credentials, PluginMap};

/// Default coordination service root
pub const DEFAULT_API_URL: &str = "http://localhost:8888/api";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[api]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiToml {
    /// Service root URL
    pub url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// `[credentials]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsToml {
    /// Account name
    pub username: Option<String>,

    /// Account password
    pub password: Option<String>,
}

/// `[device]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceToml {
    /// Name used when registering the frame
    pub name: Option<String>,

    /// Directory holding the persisted device record
    pub state_dir: Option<PathBuf>,
}

/// `[assets]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsToml {
    /// Where downloaded assets are stored
    pub cache_dir: Option<PathBuf>,

    /// Download timeout in seconds
    pub download_timeout_secs: Option<u64>,
}

/// `[process]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessToml {
    /// Signal sent to viewer process groups, e.g. `SIGTERM`
    pub kill_signal: Option<String>,

    /// Leave the viewer running when the daemon exits
    pub keep_viewer_on_exit: Option<bool>,
}

/// `[plugins]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsToml {
    /// Install command template with `{name}` and `{version}`
    pub install_command: Option<String>,

    /// Plugins a newly registered frame starts with
    pub defaults: Option<PluginMap>,
}

/// `[sync]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncToml {
    /// Seconds between record refreshes (0 = disabled)
    pub refresh_interval_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerToml {
    /// Coordination service
    pub api: ApiToml,

    /// Login
    pub credentials: CredentialsToml,

    /// Device identity and state
    pub device: DeviceToml,

    /// Asset downloads
    pub assets: AssetsToml,

    /// Viewer processes
    pub process: ProcessToml,

    /// Plugin installation
    pub plugins: PluginsToml,

    /// Record refresh
    pub sync: SyncToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved controller configuration
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Coordination service root
    pub api_url: String,

    /// Request timeout for service calls
    pub request_timeout: Duration,

    /// Account name
    pub username: Option<String>,

    /// Account password
    pub password: Option<String>,

    /// Name used when registering the frame
    ///
    /// Ignored once a device record has been persisted.
    pub device_name: String,

    /// Directory holding the persisted device record
    pub state_dir: PathBuf,

    /// Asset cache; `state_dir/assets` when unset
    pub cache_dir: Option<PathBuf>,

    /// Download timeout
    pub download_timeout: Duration,

    /// Signal sent to viewer process groups
    pub kill_signal: Signal,

    /// Leave the viewer running when the daemon exits
    pub keep_viewer_on_exit: bool,

    /// Plugin install command template
    pub plugin_install_command: Option<String>,

    /// Plugins a newly registered frame starts with
    pub default_plugins: PluginMap,

    /// Interval between record refreshes; `None` disables them
    pub refresh_interval: Option<Duration>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            username: None,
            password: None,
            device_name: "frame".to_string(),
            state_dir: default_state_dir(),
            cache_dir: None,
            download_timeout: Duration::from_secs(300),
            kill_signal: Signal::SIGTERM,
            keep_viewer_on_exit: false,
            plugin_install_command: None,
            default_plugins: PluginMap::new(),
            refresh_interval: None,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ControllerConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Asset cache directory
    #[must_use]
    pub fn asset_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.state_dir.join("assets"))
    }

    /// Login credentials
    ///
    /// # Errors
    ///
    /// Returns a validation error if the username or password is missing.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Ok(Credentials::new(username, password)),
            _ => Err(ConfigError::ValidationError(
                "credentials.username and credentials.password are required".to_string(),
            )),
        }
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(e) = reqwest::Url::parse(&self.api_url) {
            return Err(ConfigError::ValidationError(format!(
                "api.url {:?} is not a valid URL: {e}",
                self.api_url
            )));
        }
        if self.device_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "device.name must not be empty".to_string(),
            ));
        }
        if self.request_timeout.is_zero() || self.download_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if let Some(ref template) = self.plugin_install_command {
            if !template.contains("{name}") {
                return Err(ConfigError::ValidationError(
                    "plugins.install_command must contain {name}".to_string(),
                ));
            }
        }
        self.credentials().map(|_| ())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/frame-controller/controller.toml` or
/// `~/.config/frame-controller/controller.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("frame-controller").join("controller.toml"))
}

/// Default directory for the persisted device record
#[must_use]
pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("frame-controller"))
        .unwrap_or_else(|| PathBuf::from(".frame-controller"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<ControllerConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if a signal name is unknown.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ControllerConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration, reading environment variables through `env`
fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ControllerConfig, ConfigError> {
    let mut config = ControllerConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ControllerToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env)?;

    Ok(config)
}

/// Parse a signal name such as `SIGTERM` or `term`
fn parse_signal(name: &str) -> Result<Signal, ConfigError> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&full)
        .map_err(|_| ConfigError::ValidationError(format!("unknown signal {name:?}")))
}

/// Seconds to an optional interval, 0 meaning disabled
fn interval(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ControllerConfig, toml: ControllerToml) -> Result<(), ConfigError> {
    // API
    if let Some(url) = toml.api.url {
        config.api_url = url;
    }
    if let Some(secs) = toml.api.timeout_secs {
        config.request_timeout = Duration::from_secs(secs);
    }

    // Credentials
    if toml.credentials.username.is_some() {
        config.username = toml.credentials.username;
    }
    if toml.credentials.password.is_some() {
        config.password = toml.credentials.password;
    }

    // Device
    if let Some(name) = toml.device.name {
        config.device_name = name;
    }
    if let Some(dir) = toml.device.state_dir {
        config.state_dir = dir;
    }

    // Assets
    if toml.assets.cache_dir.is_some() {
        config.cache_dir = toml.assets.cache_dir;
    }
    if let Some(secs) = toml.assets.download_timeout_secs {
        config.download_timeout = Duration::from_secs(secs);
    }

    // Process
    if let Some(ref signal) = toml.process.kill_signal {
        config.kill_signal = parse_signal(signal)?;
    }
    if let Some(keep) = toml.process.keep_viewer_on_exit {
        config.keep_viewer_on_exit = keep;
    }

    // Plugins
    if toml.plugins.install_command.is_some() {
        config.plugin_install_command = toml.plugins.install_command;
    }
    if let Some(defaults) = toml.plugins.defaults {
        config.default_plugins = defaults;
    }

    // Sync
    if let Some(secs) = toml.sync.refresh_interval_secs {
        config.refresh_interval = interval(secs);
    }

    Ok(())
}

/// Apply environment variable overrides to the config
fn apply_env_config(
    config: &mut ControllerConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(url) = env("FRAME_API_URL") {
        config.api_url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(username) = env("FRAME_USERNAME") {
        config.username = Some(username);
        config.source = ConfigSource::Env;
    }
    if let Some(password) = env("FRAME_PASSWORD") {
        config.password = Some(password);
        config.source = ConfigSource::Env;
    }
    if let Some(name) = env("FRAME_DEVICE_NAME") {
        config.device_name = name;
        config.source = ConfigSource::Env;
    }
    if let Some(dir) = env("FRAME_STATE_DIR") {
        config.state_dir = PathBuf::from(dir);
        config.source = ConfigSource::Env;
    }
    if let Some(dir) = env("FRAME_CACHE_DIR") {
        config.cache_dir = Some(PathBuf::from(dir));
        config.source = ConfigSource::Env;
    }
    if let Some(signal) = env("FRAME_KILL_SIGNAL") {
        config.kill_signal = parse_signal(&signal)?;
        config.source = ConfigSource::Env;
    }
    if let Some(keep) = env("FRAME_KEEP_VIEWER") {
        config.keep_viewer_on_exit = keep != "0" && keep.to_lowercase() != "false";
        config.source = ConfigSource::Env;
    }
    if let Some(command) = env("FRAME_PLUGIN_COMMAND") {
        config.plugin_install_command = Some(command);
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = env("FRAME_REFRESH_INTERVAL") {
        if let Ok(secs) = secs.parse::<u64>() {
            config.refresh_interval = interval(secs);
            config.source = ConfigSource::Env;
        }
    }

    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Service URL override
    pub api_url: Option<String>,

    /// Device name override
    pub device_name: Option<String>,

    /// State directory override
    pub state_dir: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set service URL override
    #[must_use]
    pub fn with_api_url(mut self, url: String) -> Self {
        self.api_url = Some(url);
        self
    }

    /// Set device name override
    #[must_use]
    pub fn with_device_name(mut self, name: String) -> Self {
        self.device_name = Some(name);
        self
    }

    /// Set state directory override
    #[must_use]
    pub fn with_state_dir(mut self, dir: PathBuf) -> Self {
        self.state_dir = Some(dir);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ControllerConfig) {
        if self.api_url.is_some() || self.device_name.is_some() || self.state_dir.is_some() {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.api_url {
            config.api_url = url.clone();
        }
        if let Some(ref name) = self.device_name {
            config.device_name = name.clone();
        }
        if let Some(ref dir) = self.state_dir {
            config.state_dir = dir.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
