//! Configuration file handling

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Default timeout for connect/send/receive, in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Server-side pipe settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-side host loop settings
    #[serde(default)]
    pub host: HostConfig,
}

/// Timeout settings in milliseconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Timeout for establishing a connection
    #[serde(default = "default_timeout")]
    pub connect_ms: u64,

    /// Timeout for writing one message
    #[serde(default = "default_timeout")]
    pub send_ms: u64,

    /// Timeout for reading one message
    #[serde(default = "default_timeout")]
    pub receive_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_ms: default_timeout(),
            send_ms: default_timeout(),
            receive_ms: default_timeout(),
        }
    }
}

impl Timeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn send(&self) -> Duration {
        Duration::from_millis(self.send_ms)
    }

    pub fn receive(&self) -> Duration {
        Duration::from_millis(self.receive_ms)
    }
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Server-side pipe configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Maximum live server instances sharing one pipe name
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,

    /// Grace period between asking a companion to exit and killing it
    #[serde(default = "default_kill_grace")]
    pub kill_grace_ms: u64,

    /// Required extension of companion executables (empty accepts any)
    #[serde(default = "default_client_extension")]
    pub client_extension: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_instances: default_max_instances(),
            kill_grace_ms: default_kill_grace(),
            client_extension: default_client_extension(),
        }
    }
}

fn default_max_instances() -> usize {
    1
}
fn default_kill_grace() -> u64 {
    500
}
fn default_client_extension() -> String {
    std::env::consts::EXE_EXTENSION.to_string()
}

/// Host loop configuration
#[derive(Debug, Deserialize)]
pub struct HostConfig {
    /// Prefix of the pipe name argument
    #[serde(default = "default_argument_prefix")]
    pub argument_prefix: String,

    /// Pause between two handler invocations
    #[serde(default = "default_idle_delay")]
    pub idle_delay_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            argument_prefix: default_argument_prefix(),
            idle_delay_ms: default_idle_delay(),
        }
    }
}

fn default_argument_prefix() -> String {
    "/pipeName".to_string()
}
fn default_idle_delay() -> u64 {
    10
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        if config.server.max_instances == 0 {
            return Err(super::Error::Config(
                "server.max_instances must be at least 1".to_string(),
            ));
        }
        if config.server.max_instances > crate::ipc::transport::MAX_LISTENERS_PER_NAME {
            return Err(super::Error::Config(format!(
                "server.max_instances must be at most {} on this platform",
                crate::ipc::transport::MAX_LISTENERS_PER_NAME
            )));
        }
        Ok(config)
    }
}
