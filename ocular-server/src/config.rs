// Server configuration: defaults, TOML file, environment overrides

use crate::protocol::ResultFraming;
use ocular_eye::{Device, EngineSettings};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("Unknown log format '{}'", other)),
        }
    }
}

/// Debug frame persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Directory saved frames are written to
    pub dir: PathBuf,
    /// Frames waiting for the writer before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for DebugConfig {
    fn default() -> Self {
        let dir = dirs::home_dir()
            .map(|home| home.join("debug_images"))
            .unwrap_or_else(|| PathBuf::from("./debug_images"));
        Self {
            dir,
            queue_capacity: 64,
        }
    }
}

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub result_framing: ResultFraming,
    /// Upper bound on how long shutdown waits for blocking inference
    pub shutdown_grace_secs: u64,
    pub model: EngineSettings,
    pub debug: DebugConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            result_framing: ResultFraming::PerFrame,
            shutdown_grace_secs: 5,
            model: EngineSettings::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `OCULAR_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `OCULAR_*` overrides using `lookup` to read variables.
    ///
    /// Unparsable values are an error rather than being silently skipped.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("OCULAR_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("OCULAR_PORT") {
            self.port = port
                .parse()
                .map_err(|_| ConfigError::Parse(format!("OCULAR_PORT: invalid port '{}'", port)))?;
        }
        if let Some(level) = lookup("OCULAR_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(format) = lookup("OCULAR_LOG_FORMAT") {
            self.log_format = format
                .parse()
                .map_err(|e| ConfigError::Parse(format!("OCULAR_LOG_FORMAT: {}", e)))?;
        }
        if let Some(framing) = lookup("OCULAR_RESULT_FRAMING") {
            self.result_framing = framing
                .parse()
                .map_err(|e| ConfigError::Parse(format!("OCULAR_RESULT_FRAMING: {}", e)))?;
        }
        if let Some(path) = lookup("OCULAR_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(path) = lookup("OCULAR_LABELS_PATH") {
            self.model.labels_path = Some(PathBuf::from(path));
        }
        if let Some(device) = lookup("OCULAR_DEVICE") {
            self.model.device = device
                .parse::<Device>()
                .map_err(|e| ConfigError::Parse(format!("OCULAR_DEVICE: {}", e)))?;
        }
        if let Some(dir) = lookup("OCULAR_DEBUG_DIR") {
            self.debug.dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation("host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".to_string()));
        }
        if self.debug.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "debug.queue_capacity must be at least 1".to_string(),
            ));
        }
        self.model
            .validate()
            .map_err(|e| ConfigError::Validation(format!("model: {}", e)))?;
        self.bind_addr()?;
        Ok(())
    }

    /// Resolve `host` and `port` to the address the listener binds.
    ///
    /// Accepts IP literals of either family and hostnames such as
    /// `localhost`; the first resolved address wins.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let host = self.host.trim();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        (host, self.port)
            .to_socket_addrs()
            .map_err(|e| ConfigError::Validation(format!("invalid bind address '{}': {}", self.host, e)))?
            .next()
            .ok_or_else(|| {
                ConfigError::Validation(format!("bind address '{}' resolved to nothing", self.host))
            })
    }
}
