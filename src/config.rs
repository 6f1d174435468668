//! Configuration management for the CEC gateway.
//!
//! The config file is a YAML list of adapter entries; it round-trips
//! through serde so the gateway can write back what it loaded. A file
//! watcher (see [`watcher`]) reloads it on change.

use crate::types::{CecLogLevel, LogicalAddress};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

pub mod watcher;

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub adapters: Vec<AdapterConfig>,
}

/// One CEC adapter registration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AdapterConfig {
    /// COM port / device path the adapter is plugged into.
    pub com_port: String,
    /// Human name; prefixes every event from this adapter.
    pub name: String,
    /// HDMI input number on the base device.
    #[serde(default = "default_hdmi_port")]
    pub hdmi_port: u8,
    /// True when the adapter hangs off an AV receiver instead of the TV.
    #[serde(default)]
    pub use_avr: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Forward native library log lines up to this level; absent means
    /// library logging stays off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<CecLogLevel>,
}

impl AdapterConfig {
    pub fn new(com_port: impl Into<String>, name: impl Into<String>) -> Self {
        AdapterConfig {
            com_port: com_port.into(),
            name: name.into(),
            hdmi_port: default_hdmi_port(),
            use_avr: false,
            poll_interval_ms: default_poll_interval_ms(),
            log_level: None,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Device the adapter announces itself behind on the bus.
    pub fn base_device(&self) -> LogicalAddress {
        if self.use_avr {
            LogicalAddress::AudioSystem
        } else {
            LogicalAddress::Tv
        }
    }
}

impl AppConfig {
    /// Load configuration from file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

/// Default config location: `<platform config dir>/cec-gw/config.yaml`,
/// falling back to the working directory.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("cec-gw").join("config.yaml"))
        .unwrap_or_else(|| PathBuf::from("config.yaml"))
}

// Default value functions
fn default_hdmi_port() -> u8 {
    1
}
fn default_poll_interval_ms() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn config_round_trips_through_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");

        let mut living_room = AdapterConfig::new("COM3", "Living Room");
        living_room.hdmi_port = 2;
        living_room.use_avr = true;
        living_room.log_level = Some(CecLogLevel::Warning);
        let config = AppConfig {
            adapters: vec![living_room, AdapterConfig::new("/dev/ttyACM0", "Bedroom")],
        };

        config.save(&path).await.unwrap();
        let loaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn missing_fields_take_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(
            &path,
            "adapters:\n  - com_port: COM3\n    name: Living Room\n",
        )
        .await
        .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        let adapter = &config.adapters[0];
        assert_eq!(adapter.hdmi_port, 1);
        assert!(!adapter.use_avr);
        assert_eq!(adapter.poll_interval(), Duration::from_millis(500));
        assert_eq!(adapter.log_level, None);
        assert_eq!(adapter.base_device(), LogicalAddress::Tv);
    }

    #[tokio::test]
    async fn load_reports_parse_failures() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(&path, "adapters: 7").await.unwrap();
        assert!(AppConfig::load(&path).await.is_err());
    }
}
