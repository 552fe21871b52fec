//! Backend configuration.
//!
//! Command line flags and `RUST_LOG` select the process settings; the EM
//! configuration file supplies the device inventory and the scenario timers.

pub mod app_config;
pub mod cli;
pub mod loader;
pub mod timers;
pub mod zenoh_config;

pub use app_config::{AppConfig, AppConfigBuilder, LogLevel, StorageBackend};
pub use cli::CliConfig;
pub use loader::EmConfigLoader;
pub use timers::{DEFAULT_TIMER, TimerSettings};
pub use zenoh_config::ZenohConfigManager;

use std::sync::Arc;

use anyhow::Result;
use emgr_shared::ZenohConfig;
use emgr_shared::em_config::EmConfig;

/// Everything the backend needs to start, resolved once at startup
#[derive(Debug, Clone)]
pub struct ConfigManager {
    pub app: AppConfig,
    pub zenoh: ZenohConfig,
    /// Process-wide EM configuration, shared with every driver
    pub em: Arc<EmConfig>,
    pub timers: TimerSettings,
}

impl ConfigManager {
    pub fn from_cli(cli_config: &CliConfig) -> Result<Self> {
        Self::from_app(AppConfig::from_cli(cli_config)?, cli_config)
    }

    /// Load the EM configuration and resolve the timers for an already built
    /// [`AppConfig`]. The binary calls this after logging is up so the loader
    /// and timer fallback warnings are not lost.
    pub fn from_app(app_config: AppConfig, cli_config: &CliConfig) -> Result<Self> {
        let zenoh_config = ZenohConfigManager::from_cli(cli_config)?;

        let mut loader = EmConfigLoader::new();
        if let Some(path) = &app_config.config_file {
            loader = loader.with_explicit(path.clone());
        }
        let loaded = loader.load()?.map(|(_, config)| config);

        Ok(Self::with_em_config(app_config, zenoh_config, loaded))
    }

    /// Assemble from parts; `None` runs on built-in defaults
    pub fn with_em_config(app: AppConfig, zenoh: ZenohConfig, em: Option<EmConfig>) -> Self {
        let timers = TimerSettings::resolve(em.as_ref());
        Self {
            app,
            zenoh,
            em: Arc::new(em.unwrap_or_default()),
            timers,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.app.validate()?;
        ZenohConfigManager::validate_and_report(&self.zenoh)?;
        if self.em.devices.is_empty() {
            tracing::warn!("Device inventory is empty, every order will fail with PROC_ERR_INF");
        }
        Ok(())
    }
}
