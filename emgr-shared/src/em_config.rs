//! JSON5 parsing for the element manager configuration file.
//!
//! The file carries the named scenario timers, the device inventory and the
//! NETCONF transport settings. Timer values may be plain integers (milliseconds)
//! or duration strings in the `duration-string` format: "500ms", "90s", "10m".
//!
//! ```json5
//! {
//!   timers: {
//!     "Timer_connect_get_before_config": 30000,
//!     "Timer_confirmed-commit": "2m",
//!   },
//!   devices: [
//!     { name: "leaf-1", vendor: "juniper", platform: "QFX5100", address: "192.0.2.11" },
//!   ],
//! }
//! ```

use duration_string::DurationString;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::errors::ConfigParseError;

/// Timer key: wait for the session to become ready before editing
pub const TIMER_CONNECT_GET_BEFORE_CONFIG: &str = "Timer_connect_get_before_config";
/// Timer key: confirmed-commit window sent to the device
pub const TIMER_CONFIRMED_COMMIT: &str = "Timer_confirmed-commit";
/// Timer key: margin the EM adds on top of the confirmed-commit window
pub const TIMER_CONFIRMED_COMMIT_EM_OFFSET: &str = "Timer_confirmed-commit_em_offset";
/// Timer key: wait for the session to close after the read-back
pub const TIMER_DISCONNECT_GET_AFTER_CONFIG: &str = "Timer_disconnect_get_after_config";

/// Parse a duration string like "50ms", "5s", "1m" into milliseconds
pub fn parse_duration_string(s: &str) -> Result<u64, String> {
    let duration: DurationString = s
        .trim()
        .parse()
        .map_err(|e| format!("Invalid duration '{}': {}", s, e))?;

    let std_duration: std::time::Duration = duration.into();
    Ok(std_duration.as_millis() as u64)
}

/// Device vendor, selects the payload builder family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Cisco,
    Juniper,
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vendor::Cisco => f.write_str("cisco"),
            Vendor::Juniper => f.write_str("juniper"),
        }
    }
}

/// Inventory entry for one managed device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: Vendor,
    /// Hardware platform, e.g. "ASR9000" or "QFX5100"
    #[serde(default)]
    pub platform: String,
    /// Management address
    pub address: String,
    #[serde(default = "default_netconf_port")]
    pub port: u16,
    /// Read the running configuration back before closing the session
    #[serde(default = "default_true")]
    pub get_after_config: bool,
}

fn default_netconf_port() -> u16 {
    830
}

fn default_true() -> bool {
    true
}

/// NETCONF transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetconfSettings {
    /// Per-RPC reply timeout in milliseconds
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    /// rpc-error fragments that are treated as success on confirmed commit
    #[serde(default = "default_benign_errors")]
    pub benign_backend_errors: Vec<String>,
}

fn default_rpc_timeout_ms() -> u64 {
    60_000
}

fn default_benign_errors() -> Vec<String> {
    vec!["ME_BACKEND_ERROR_OP_FAILED".to_string()]
}

impl Default for NetconfSettings {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: default_rpc_timeout_ms(),
            benign_backend_errors: default_benign_errors(),
        }
    }
}

/// Raw timer value as written in the file. Anything that is neither an
/// unsigned integer nor a string lands in `Invalid` so one bad timer does not
/// reject the whole file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimerValue {
    Millis(u64),
    Text(String),
    Invalid(serde_json::Value),
}

impl TimerValue {
    /// Milliseconds, or a description of why the value is unusable
    pub fn as_millis(&self) -> Result<u64, String> {
        match self {
            TimerValue::Millis(ms) => Ok(*ms),
            TimerValue::Text(text) => match text.trim().parse::<u64>() {
                Ok(ms) => Ok(ms),
                Err(_) => parse_duration_string(text),
            },
            TimerValue::Invalid(value) => Err(format!("'{}' is not a duration", value)),
        }
    }
}

/// Process-wide EM configuration, loaded once at startup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmConfig {
    #[serde(default)]
    pub timers: HashMap<String, TimerValue>,
    #[serde(default)]
    pub devices: Vec<DeviceInfo>,
    #[serde(default)]
    pub netconf: NetconfSettings,
}

impl EmConfig {
    /// Look up a device in the inventory
    pub fn device(&self, name: &str) -> Option<&DeviceInfo> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Raw timer entry for a key
    pub fn timer(&self, key: &str) -> Option<&TimerValue> {
        self.timers.get(key)
    }

    fn validate(&self) -> Result<(), ConfigParseError> {
        let mut names = HashSet::new();
        for device in &self.devices {
            if device.name.is_empty() {
                return Err(ConfigParseError::ValidationError(
                    "Device entry with empty name".to_string(),
                ));
            }
            if !names.insert(device.name.as_str()) {
                return Err(ConfigParseError::ValidationError(format!(
                    "Device '{}' is listed more than once",
                    device.name
                )));
            }
            if device.address.is_empty() {
                return Err(ConfigParseError::ValidationError(format!(
                    "Device '{}' has no management address",
                    device.name
                )));
            }
        }

        if self.netconf.rpc_timeout_ms == 0 {
            return Err(ConfigParseError::ValidationError(
                "netconf.rpc_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse and validate an EM configuration from a JSON5 string
pub fn parse_em_config(json5_content: &str) -> Result<EmConfig, ConfigParseError> {
    let config: EmConfig =
        json5::from_str(json5_content).map_err(|e| ConfigParseError::Json5Error(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Parse an EM configuration from a file path
pub fn parse_em_config_file(path: &std::path::Path) -> Result<EmConfig, ConfigParseError> {
    let content = std::fs::read_to_string(path)?;
    parse_em_config(&content)
}
