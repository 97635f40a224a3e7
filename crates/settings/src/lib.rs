//! VNC Repeater Settings
//!
//! Listener ports, slot capacity and timing, stored as a JSON file.
//!
//! ## Usage
//!
//! ```no_run
//! use vncrepeater_settings::Settings;
//!
//! let mut settings = Settings::load_or_default()?;
//! settings.listen.viewer_port = 5901;
//! settings.validate()?;
//! settings.save()?;
//! # Ok::<(), vncrepeater_settings::SettingsError>(())
//! ```

mod config;

pub use config::{ListenSettings, Settings, SlotSettings};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Directory holding the repeater's config: `$HOME/.vncrepeater`, or
/// `./.vncrepeater` when no home directory is known
pub fn default_config_dir() -> PathBuf {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vncrepeater")
}

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("settings.json")
}
