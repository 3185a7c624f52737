//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use vson_core::{CoordinatorConfig, PassiveOptions, SessionConfig};
use vson_types::Profile;

/// A registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Device address (MAC address or UUID).
    pub address: String,
    /// Profile used to decode the device.
    #[serde(default = "default_profile")]
    pub profile: Profile,
    /// Friendly name usable in place of the address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

fn default_profile() -> Profile {
    Profile::Vson
}

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Wait for the response notification, in milliseconds.
    pub response_timeout_ms: u64,
    /// Minimum time between polls of advertisement-triggered devices.
    pub min_poll_age_secs: u64,
    /// Period of the polling loop.
    pub poll_interval_secs: u64,
    /// Duration of each passive scan.
    pub scan_duration_secs: u64,
    /// Devices watched by `vson watch`.
    pub devices: Vec<DeviceEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            response_timeout_ms: 5_000,
            min_poll_age_secs: 24 * 60 * 60,
            poll_interval_secs: 30,
            scan_duration_secs: 5,
            devices: Vec::new(),
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vson")
            .join("config.toml")
    }

    /// Load config from the default path, or return defaults.
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`. A missing or unreadable file yields defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => warn!("Failed to parse config {}: {}", path.display(), e),
            },
            Err(e) => warn!("Failed to read config {}: {}", path.display(), e),
        }
        Self::default()
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    /// Save config to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Register a device, replacing any entry with the same address.
    pub fn upsert_device(&mut self, entry: DeviceEntry) {
        self.devices
            .retain(|d| !d.address.eq_ignore_ascii_case(&entry.address));
        self.devices.push(entry);
    }

    /// Find a registered device by alias or address.
    pub fn find_device(&self, name: &str) -> Option<&DeviceEntry> {
        self.devices.iter().find(|d| {
            d.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(name))
                || d.address.eq_ignore_ascii_case(name.trim())
        })
    }

    /// Session settings derived from the file.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default().response_timeout(Duration::from_millis(self.response_timeout_ms))
    }

    /// Coordinator settings derived from the file.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::default()
            .session(self.session_config())
            .min_poll_age(Duration::from_secs(self.min_poll_age_secs))
            .tick(Duration::from_secs(self.poll_interval_secs.max(1)))
    }

    /// Passive listener settings derived from the file.
    pub fn passive_options(&self) -> PassiveOptions {
        PassiveOptions::default().scan_duration(Duration::from_secs(self.scan_duration_secs.max(1)))
    }
}

/// Resolve a device argument to an address and profile.
///
/// Aliases and addresses of registered devices take their configured
/// profile; `profile` overrides it when given. Unknown names are used as
/// addresses.
pub fn resolve_device(name: &str, profile: Option<Profile>, config: &Config) -> (String, Profile) {
    match config.find_device(name) {
        Some(entry) => (entry.address.clone(), profile.unwrap_or(entry.profile)),
        None => (name.trim().to_string(), profile.unwrap_or(Profile::Vson)),
    }
}
