//! Zenoh session settings derived from the command line.

use anyhow::Result;
use emgr_shared::errors::ZenohConfigError;
use emgr_shared::{ZenohConfig, ZenohMode};

use super::cli::CliConfig;

/// Builds and checks the session settings of the backend
pub struct ZenohConfigManager;

fn split_endpoints(list: Option<&str>) -> impl Iterator<Item = &str> {
    list.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
}

impl ZenohConfigManager {
    /// Session settings from the connectivity flags. An unknown mode is
    /// logged and treated as peer.
    pub fn from_cli(cli: &CliConfig) -> Result<ZenohConfig> {
        let mut config = if cli.zenoh_mode.eq_ignore_ascii_case("client") {
            ZenohConfig::new_client()
        } else {
            if !cli.zenoh_mode.eq_ignore_ascii_case("peer") {
                tracing::error!(
                    "[BACKEND] Unknown zenoh mode '{}', running as peer",
                    cli.zenoh_mode
                );
            }
            ZenohConfig::new_peer()
        };

        for endpoint in split_endpoints(cli.zenoh_connect.as_deref()) {
            config = config.add_connect_endpoint(endpoint);
        }
        for endpoint in split_endpoints(cli.zenoh_listen.as_deref()) {
            config = config.add_listen_endpoint(endpoint);
        }
        if cli.no_multicast {
            config = config.disable_multicast_scouting();
        }

        Ok(config)
    }

    /// Run [`ZenohConfig::validate`] and log a readable explanation on failure
    pub fn validate_and_report(config: &ZenohConfig) -> Result<()> {
        let Err(e) = config.validate() else {
            if matches!(config.mode, ZenohMode::Client) && config.endpoints.is_empty() {
                tracing::warn!("[BACKEND] Client without connect endpoints, relying on scouting");
            }
            return Ok(());
        };

        let explanation = match e {
            ZenohConfigError::InvalidProtocol { protocol, endpoint } => format!(
                "endpoint '{}' uses '{}'; only tcp, udp, tls and quic are accepted",
                endpoint, protocol
            ),
            ZenohConfigError::InvalidAddress {
                address,
                protocol,
                reason,
            } => format!("{} address '{}' is unusable: {}", protocol, address, reason),
            ZenohConfigError::ModeEndpointMismatch { mode, reason } => {
                format!("{:?} session {}", mode, reason)
            }
            other => other.to_string(),
        };

        tracing::error!("[BACKEND] Zenoh settings rejected: {}", explanation);
        anyhow::bail!("invalid zenoh settings: {}", explanation)
    }
}
