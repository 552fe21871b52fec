//! Zenoh session settings shared by the backend and its tooling.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use zenoh::config::WhatAmI;

use crate::errors::ZenohConfigError;

const MULTICAST_SCOUTING: &str = "scouting/multicast/enabled";
const TRANSPORTS: [&str; 4] = ["tcp", "udp", "tls", "quic"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ZenohMode {
    /// Accepts and opens connections
    Peer,
    /// Only opens connections
    Client,
}

impl From<ZenohMode> for WhatAmI {
    fn from(mode: ZenohMode) -> Self {
        match mode {
            ZenohMode::Peer => WhatAmI::Peer,
            ZenohMode::Client => WhatAmI::Client,
        }
    }
}

/// Mode, endpoints and raw property overrides for one session.
///
/// Endpoints carry their direction as a prefix, e.g. `connect/tcp/10.0.0.5:7447`
/// or `listen/tcp/0.0.0.0:7447`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ZenohConfig {
    pub mode: ZenohMode,
    pub endpoints: Vec<String>,
    pub properties: HashMap<String, String>,
}

impl Default for ZenohConfig {
    fn default() -> Self {
        Self::new_peer()
    }
}

impl ZenohConfig {
    fn with_mode(mode: ZenohMode) -> Self {
        Self {
            mode,
            endpoints: Vec::new(),
            properties: HashMap::new(),
        }
    }

    pub fn new_peer() -> Self {
        Self::with_mode(ZenohMode::Peer)
    }

    pub fn new_client() -> Self {
        Self::with_mode(ZenohMode::Client)
    }

    pub fn disable_multicast_scouting(mut self) -> Self {
        self.properties
            .insert(MULTICAST_SCOUTING.to_string(), "false".to_string());
        self
    }

    pub fn add_listen_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoints.push(format!("listen/{endpoint}"));
        self
    }

    pub fn add_connect_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoints.push(format!("connect/{endpoint}"));
        self
    }

    fn endpoints_with(&self, direction: &str) -> impl Iterator<Item = &str> {
        self.endpoints
            .iter()
            .filter_map(move |e| e.strip_prefix(direction))
    }

    /// Checks mode/direction compatibility, endpoint syntax and duplicates
    pub fn validate(&self) -> Result<(), ZenohConfigError> {
        if self.mode == ZenohMode::Client && self.endpoints_with("listen/").next().is_some() {
            return Err(ZenohConfigError::client_cannot_listen());
        }

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if !seen.insert(endpoint.as_str()) {
                return Err(ZenohConfigError::DuplicateEndpoint {
                    endpoint: endpoint.clone(),
                });
            }
            check_endpoint(endpoint)?;
        }

        if let Some(value) = self.properties.get(MULTICAST_SCOUTING) {
            if value != "true" && value != "false" {
                return Err(ZenohConfigError::PropertyError {
                    key: MULTICAST_SCOUTING.to_string(),
                    value: value.clone(),
                    reason: "expected true or false".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Validated [`zenoh::Config`] ready for `zenoh::open`
    pub fn to_zenoh_config(&self) -> Result<zenoh::Config, ZenohConfigError> {
        self.validate()?;

        let mut config = zenoh::Config::default();
        config
            .set_mode(Some(self.mode.into()))
            .map_err(|e| ZenohConfigError::Build {
                reason: format!("mode {:?} refused: {:?}", self.mode, e),
            })?;

        let sections = [
            ("connect/", "connect/endpoints"),
            ("listen/", "listen/endpoints"),
        ];
        for (direction, key) in sections {
            let quoted: Vec<String> = self
                .endpoints_with(direction)
                .map(|e| format!("\"{e}\""))
                .collect();
            if quoted.is_empty() {
                continue;
            }
            config
                .insert_json5(key, &format!("[{}]", quoted.join(",")))
                .map_err(|e| ZenohConfigError::Build {
                    reason: format!("{key}: {e}"),
                })?;
        }

        for (key, value) in &self.properties {
            config
                .insert_json5(key, &json5_literal(value))
                .map_err(|e| ZenohConfigError::PropertyError {
                    key: key.clone(),
                    value: value.clone(),
                    reason: e.to_string(),
                })?;
        }

        Ok(config)
    }
}

/// Booleans and numbers pass through; everything else is quoted
fn json5_literal(value: &str) -> String {
    if matches!(value, "true" | "false") || value.parse::<f64>().is_ok() {
        value.to_string()
    } else {
        format!("\"{value}\"")
    }
}

fn check_endpoint(endpoint: &str) -> Result<(), ZenohConfigError> {
    let locator = endpoint
        .strip_prefix("connect/")
        .or_else(|| endpoint.strip_prefix("listen/"))
        .ok_or_else(|| ZenohConfigError::unsupported_endpoint_format(endpoint))?;
    let (protocol, address) = locator
        .split_once('/')
        .ok_or_else(|| ZenohConfigError::unsupported_endpoint_format(endpoint))?;

    if !TRANSPORTS.contains(&protocol) {
        return Err(ZenohConfigError::InvalidProtocol {
            protocol: protocol.to_string(),
            endpoint: endpoint.to_string(),
        });
    }

    let invalid = |reason: String| ZenohConfigError::InvalidAddress {
        address: address.to_string(),
        protocol: protocol.to_string(),
        reason,
    };
    let socket: SocketAddr = address.parse().map_err(|e| invalid(format!("{e}")))?;
    if socket.port() == 0 {
        return Err(invalid("port 0 is not usable".to_string()));
    }
    Ok(())
}
