//! Bridge configuration
//!
//! Read from TOML; every key is optional.
//!
//! ```toml
//! max_frame_slots = 15
//! virtual_slots = 255
//! hash_recursion_limit = 100
//! virtual_dispatch = "trampoline"
//!
//! [log]
//! level = "debug"
//! json = false
//! file = "gdbridge.log"
//! spans = false
//! ```

use crate::error::{BridgeError, Result};
use crate::frame::{MAX_EXTENDED_SLOTS, NIBBLE_SLOTS};
use crate::logging::{self, LogConfig};
use crate::trampoline::TRAMPOLINE_COUNT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a config file to load
pub const CONFIG_ENV: &str = "GDBRIDGE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Arguments a ptrcall frame may carry; past 15 only the byte form describes it
    #[serde(default = "default_frame_slots")]
    pub max_frame_slots: usize,

    /// Usable trampoline identities, counted from 1
    #[serde(default = "default_virtual_slots")]
    pub virtual_slots: usize,

    #[serde(default = "default_100")]
    pub hash_recursion_limit: u32,

    #[serde(default)]
    pub virtual_dispatch: VirtualDispatch,

    #[serde(default)]
    pub log: LogSettings,
}

/// How virtual overrides are published to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VirtualDispatch {
    /// One trampoline address per overridden virtual
    #[default]
    Trampoline,
    /// A single entry point that receives the virtual's identity as userdata
    CallData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,

    #[serde(default)]
    pub file: Option<PathBuf>,

    #[serde(default)]
    pub spans: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_frame_slots: NIBBLE_SLOTS,
            virtual_slots: TRAMPOLINE_COUNT,
            hash_recursion_limit: 100,
            virtual_dispatch: VirtualDispatch::default(),
            log: LogSettings::default(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            file: None,
            spans: false,
        }
    }
}

fn default_frame_slots() -> usize {
    NIBBLE_SLOTS
}

fn default_virtual_slots() -> usize {
    TRAMPOLINE_COUNT
}

fn default_100() -> u32 {
    100
}

fn default_level() -> String {
    "info".to_string()
}

impl BridgeConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load from the file named by `GDBRIDGE_CONFIG`, or fall back to defaults
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_frame_slots == 0 || self.max_frame_slots > MAX_EXTENDED_SLOTS {
            return Err(BridgeError::Config(format!(
                "max_frame_slots must be in 1..={}, got {}",
                MAX_EXTENDED_SLOTS, self.max_frame_slots
            )));
        }
        if self.virtual_slots == 0 || self.virtual_slots > TRAMPOLINE_COUNT {
            return Err(BridgeError::Config(format!(
                "virtual_slots must be in 1..={}, got {}",
                TRAMPOLINE_COUNT, self.virtual_slots
            )));
        }
        if logging::parse_level(&self.log.level).is_none() {
            return Err(BridgeError::Config(format!("unknown log level `{}`", self.log.level)));
        }
        Ok(())
    }

    /// Logging configuration described by the `[log]` table
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: logging::parse_level(&self.log.level).unwrap_or(tracing::Level::INFO),
            file_output: self.log.file.is_some(),
            log_path: self.log.file.as_ref().map(|p| p.to_string_lossy().into_owned()),
            json_format: self.log.json,
            show_spans: self.log.spans,
        }
    }
}
