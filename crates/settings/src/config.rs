//! Configuration types

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use vncrepeater_core::IdPolicy;

use crate::{default_settings_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Listening sockets
    #[serde(default)]
    pub listen: ListenSettings,

    /// Slot table sizing and sweeping
    #[serde(default)]
    pub slots: SlotSettings,

    /// How long in-flight connections get to finish on stop
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: ListenSettings::default(),
            slots: SlotSettings::default(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            config_path: None,
        }
    }
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let mut settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            settings.config_path = Some(path.to_path_buf());
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        } else {
            let mut settings = Self::default();
            settings.config_path = Some(path.to_path_buf());
            Ok(settings)
        }
    }

    /// Path these settings were loaded from, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Save settings to the configured path
    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Reject settings the repeater cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.listen.server_port == 0 || self.listen.viewer_port == 0 {
            return Err(SettingsError::Invalid("ports must be non-zero".to_string()));
        }
        if self.listen.server_port == self.listen.viewer_port {
            return Err(SettingsError::Invalid(format!(
                "server and viewer ports must differ (both {})",
                self.listen.server_port
            )));
        }
        if self.slots.max_slots == 0 {
            return Err(SettingsError::Invalid(
                "max_slots must be at least 1".to_string(),
            ));
        }
        if self.slots.reaper_interval_ms == 0 {
            return Err(SettingsError::Invalid(
                "reaper_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.listen.bind_address.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "bind_address must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Listening sockets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenSettings {
    /// Address both listeners bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port VNC servers dial
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Port VNC viewers dial
    #[serde(default = "default_viewer_port")]
    pub viewer_port: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    5500
}

fn default_viewer_port() -> u16 {
    5900
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            server_port: default_server_port(),
            viewer_port: default_viewer_port(),
        }
    }
}

/// Slot table sizing and sweeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotSettings {
    /// Maximum number of live slots
    #[serde(default = "default_max_slots")]
    pub max_slots: usize,

    /// Period of the half-open sweep
    #[serde(default = "default_reaper_interval_ms")]
    pub reaper_interval_ms: u64,

    /// Which server identifiers are accepted
    #[serde(default)]
    pub id_policy: IdPolicy,
}

fn default_max_slots() -> usize {
    20
}

fn default_reaper_interval_ms() -> u64 {
    1000
}

impl Default for SlotSettings {
    fn default() -> Self {
        Self {
            max_slots: default_max_slots(),
            reaper_interval_ms: default_reaper_interval_ms(),
            id_policy: IdPolicy::default(),
        }
    }
}

impl SlotSettings {
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }
}
