//! Server configuration.
//!
//! Configuration is loaded from the first TOML file found in the default
//! locations, falling back to defaults. The `--addr` flag overrides the bind
//! address.

use anyhow::{Context, Result};
use parley_core::{HubConfig, OverflowPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on. A leading `:` means every interface.
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Print hub lifecycle traces to stdout.
    #[serde(default)]
    pub trace: bool,

    /// Hub configuration.
    #[serde(default)]
    pub hub: HubSection,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Hub section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSection {
    /// Per-subscriber mailbox capacity.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Broadcast request channel capacity.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// What to do with a subscriber whose mailbox is full.
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_addr() -> String {
    ":8080".to_string()
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_broadcast_capacity() -> usize {
    1024
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            trace: false,
            hub: HubSection::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            broadcast_capacity: default_broadcast_capacity(),
            overflow: OverflowPolicy::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "parley.toml",
            "/etc/parley/parley.toml",
            "~/.config/parley/parley.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// The address handed to the listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        listen_addr(&self.addr)
    }

    /// Hub settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            mailbox_capacity: self.hub.mailbox_capacity,
            broadcast_capacity: self.hub.broadcast_capacity,
            overflow: self.hub.overflow,
        }
    }
}

/// Expand a `:port` address to listen on every interface.
#[must_use]
pub fn listen_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}
