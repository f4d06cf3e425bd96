//! Configuration types for devicelet

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Device, DeviceletError, DeviceletResult};

/// Directory the kubelet watches for device plugin sockets
pub const DEFAULT_PLUGIN_DIR: &str = "/var/lib/kubelet/device-plugins/";
/// File name of the kubelet registration socket inside the plugin directory
pub const KUBELET_SOCKET_NAME: &str = "kubelet.sock";

/// Static resource definition: every pool this agent advertises
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub plugins: Vec<PoolConfig>,
}

/// One resource pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Pool name, also the socket file stem
    pub name: String,
    /// Extended resource name in the orchestrator namespace (e.g. `example.com/dummy`)
    pub resource_name: String,
    /// Devices backing the pool, in advertisement order
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// One device entry of a pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    /// Accepted for compatibility with existing resource files; devices always start healthy
    #[serde(default)]
    pub state: String,
}

impl PoolConfig {
    /// Socket this pool's server listens on
    pub fn socket_path(&self, plugin_dir: &Path) -> PathBuf {
        plugin_dir.join(format!("{}.sock", self.name))
    }

    /// Device records seeded from the definition, all healthy
    pub fn devices(&self) -> Vec<Device> {
        self.devices.iter().map(|d| Device::new(d.name.clone())).collect()
    }

    fn validate(&self) -> DeviceletResult<()> {
        if self.name.is_empty() {
            return Err(DeviceletError::Config("plugin name must not be empty".to_string()));
        }
        if self.name.contains('/') {
            return Err(DeviceletError::Config(format!(
                "plugin name '{}' must not contain '/'",
                self.name
            )));
        }

        match self.resource_name.split_once('/') {
            Some((domain, name)) if !domain.is_empty() && !name.is_empty() && !name.contains('/') => {}
            _ => {
                return Err(DeviceletError::Config(format!(
                    "plugin '{}': resource name '{}' must look like <domain>/<name>",
                    self.name, self.resource_name
                )))
            }
        }

        let mut seen = HashSet::new();
        for dev in &self.devices {
            if dev.name.is_empty() {
                return Err(DeviceletError::Config(format!(
                    "plugin '{}': device name must not be empty",
                    self.name
                )));
            }
            if !seen.insert(dev.name.as_str()) {
                return Err(DeviceletError::Config(format!(
                    "plugin '{}': duplicate device '{}'",
                    self.name, dev.name
                )));
            }
        }

        Ok(())
    }
}

impl ResourceConfig {
    /// Load a resource definition; `.toml` files are read as TOML, anything else as JSON
    pub fn from_file(path: &Path) -> DeviceletResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DeviceletError::Config(format!(
                "Failed to read resource file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Self = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)?
        } else {
            Self::from_json(&content)?
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> DeviceletResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Reject definitions that would make two pools collide or advertise nothing usable
    pub fn validate(&self) -> DeviceletResult<()> {
        if self.plugins.is_empty() {
            return Err(DeviceletError::Config("no plugins defined".to_string()));
        }

        let mut names = HashSet::new();
        for pool in &self.plugins {
            pool.validate()?;
            if !names.insert(pool.name.as_str()) {
                return Err(DeviceletError::Config(format!(
                    "duplicate plugin name '{}' (socket paths must be unique)",
                    pool.name
                )));
            }
        }

        Ok(())
    }
}

/// Agent-wide settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Device plugin settings
    pub plugin: PluginSettings,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl AgentConfig {
    /// Load agent settings from a TOML file
    pub fn from_file(path: &Path) -> DeviceletResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DeviceletError::Config(format!("Failed to read config file: {}", e)))?;
        Ok(toml::from_str(&content)?)
    }
}

/// Device plugin settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    /// Directory holding plugin sockets and the kubelet socket
    pub plugin_dir: PathBuf,
    /// Kubelet registration socket; defaults to `<plugin_dir>/kubelet.sock`
    pub kubelet_socket: Option<PathBuf>,
    /// Self-connect timeout when starting a server
    pub start_timeout_secs: u64,
    /// Timeout for one registration round trip
    pub register_timeout_secs: u64,
    /// Registration attempts before giving up (1 = fail fast)
    pub register_attempts: u32,
    /// Delay between registration attempts
    pub register_backoff_ms: u64,
    /// Health probe interval
    pub health_interval_secs: u64,
    /// How long stop waits for in-flight calls before aborting the server
    pub stop_grace_secs: u64,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from(DEFAULT_PLUGIN_DIR),
            kubelet_socket: None,
            start_timeout_secs: 5,
            register_timeout_secs: 5,
            register_attempts: 1,
            register_backoff_ms: 1000,
            health_interval_secs: 60,
            stop_grace_secs: 5,
        }
    }
}

impl PluginSettings {
    pub fn kubelet_socket(&self) -> PathBuf {
        self.kubelet_socket
            .clone()
            .unwrap_or_else(|| self.plugin_dir.join(KUBELET_SOCKET_NAME))
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_secs(self.register_timeout_secs)
    }

    pub fn register_backoff(&self) -> Duration {
        Duration::from_millis(self.register_backoff_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
