//! Configuration system for the handshake agent CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use handshake_core::EngineConfig;

/// Agent configuration: identity/bus settings plus the engine's tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity configuration.
    pub identity: IdentityConfig,
    /// Message bus configuration.
    pub bus: BusConfig,
    /// Engine tunables (exchange/finalize limits, TTL, tick cadence).
    pub engine: EngineConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Stable agent name, used to locate `id_agent_<name>.json`.
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
    /// Directory holding identity files.
    #[serde(default = "default_identity_dir")]
    pub identity_dir: PathBuf,
}

/// Message bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus server address to connect to.
    #[serde(default = "default_bus_addr")]
    pub addr: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter passed to `tracing_subscriber`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_agent_name() -> String {
    "agent".to_string()
}

fn default_identity_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("handshake-agent")
}

fn default_bus_addr() -> String {
    "127.0.0.1:7900".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            agent_name: default_agent_name(),
            identity_dir: default_identity_dir(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            addr: default_bus_addr(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            bus: BusConfig::default(),
            engine: EngineConfig::with_defaults(default_agent_name()),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("handshake-agent/config.toml")
    }

    /// Load config from the default path, creating it with defaults if it
    /// doesn't exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Validate the configuration, surfacing the engine's own tunable
    /// checks as an `anyhow` error at this CLI boundary.
    ///
    /// # Errors
    ///
    /// Returns an error if `identity.agent_name` is empty or the engine
    /// tunables fail [`EngineConfig::validate`].
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.identity.agent_name.trim().is_empty() {
            anyhow::bail!("identity.agent_name must not be empty");
        }
        if self.bus.addr.trim().is_empty() {
            anyhow::bail!("bus.addr must not be empty");
        }
        self.engine
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid engine config: {e}"))?;
        Ok(())
    }
}
