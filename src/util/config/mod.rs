//! Runtime support settings
//!
//! Optional engine tuning shipped inside the runtime home.
//!
//! # Layout
//!
//! ```text
//! <home>/
//!   runtime.toml   engine settings (optional)
//!   site/          extension modules, ambient starts only
//! ```
//!
//! # Example
//!
//! ```toml
//! [engine]
//! max_wasm_stack = 524288
//! opt_level = "speed"
//! wasm_backtrace = true
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the settings file inside the runtime home
pub const SETTINGS_FILE: &str = "runtime.toml";

/// Settings read from `<home>/runtime.toml`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RuntimeSettings {
    /// Engine settings
    #[serde(default)]
    pub engine: EngineSettings,
}

/// Code generation optimisation level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    None,
    #[default]
    Speed,
    SpeedAndSize,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    /// Maximum guest stack in bytes
    #[serde(default = "default_max_wasm_stack")]
    pub max_wasm_stack: usize,
    /// Optimisation level
    #[serde(default)]
    pub opt_level: OptLevel,
    /// Capture guest backtraces in trap diagnostics
    #[serde(default = "default_wasm_backtrace")]
    pub wasm_backtrace: bool,
}

fn default_max_wasm_stack() -> usize {
    512 * 1024
}

fn default_wasm_backtrace() -> bool {
    true
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_wasm_stack: 512 * 1024,
            opt_level: OptLevel::Speed,
            wasm_backtrace: true,
        }
    }
}

/// Path of the settings file for a home directory
pub fn settings_path(home: &Path) -> PathBuf {
    home.join(SETTINGS_FILE)
}

/// Load settings from a runtime home.
/// Returns defaults if the file doesn't exist.
pub fn load_settings(home: &Path) -> Result<RuntimeSettings, SettingsError> {
    let path = settings_path(home);
    if !path.exists() {
        return Ok(RuntimeSettings::default());
    }

    let content = fs::read_to_string(&path).map_err(|e| SettingsError::IoError(path.clone(), e))?;
    let settings: RuntimeSettings =
        toml::from_str(&content).map_err(|e| SettingsError::ParseError(path.clone(), e))?;

    if settings.engine.max_wasm_stack == 0 {
        return Err(SettingsError::Invalid(
            path,
            "engine.max_wasm_stack must be greater than zero",
        ));
    }

    Ok(settings)
}

/// Settings errors
#[derive(Debug)]
pub enum SettingsError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, toml::de::Error),
    Invalid(PathBuf, &'static str),
}

impl std::fmt::Display for SettingsError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            SettingsError::IoError(path, e) => {
                write!(f, "cannot read {}: {}", path.display(), e)
            }
            SettingsError::ParseError(path, e) => {
                write!(f, "corrupt {}: {}", path.display(), e)
            }
            SettingsError::Invalid(path, msg) => write!(f, "invalid {}: {}", path.display(), msg),
        }
    }
}

impl std::error::Error for SettingsError {}
