//! Process-level settings: instance name, logging, persistence backend and
//! the location of the EM configuration file.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use super::cli::CliConfig;

/// Zenoh internals are capped at `warn` whatever the chosen level
const NOISY_CRATES: &str = "zenoh_transport=warn,zenoh_runtime=warn,zenoh_protocol=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Global level of a `RUST_LOG` value such as `debug,zenoh=warn`;
    /// anything unrecognised reads as `info`
    fn from_rust_log(value: &str) -> Self {
        let head = value.split(',').next().unwrap_or_default();
        if head.contains('=') {
            return Self::Info;
        }
        head.parse().unwrap_or(Self::Info)
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => anyhow::bail!("unknown log level '{}'", other),
        }
    }
}

/// Where device status rows and EM info are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Zenoh,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "zenoh" => Ok(Self::Zenoh),
            other => anyhow::bail!("unknown storage backend '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend_name: String,
    pub log_level: LogLevel,
    pub config_file: Option<PathBuf>,
    pub storage: StorageBackend,
}

impl AppConfig {
    pub fn from_cli(cli: &CliConfig) -> Result<Self> {
        // --verbose wins over RUST_LOG
        let log_level = match (cli.verbose, env::var("RUST_LOG")) {
            (true, _) => LogLevel::Debug,
            (false, Ok(value)) => LogLevel::from_rust_log(&value),
            (false, Err(_)) => LogLevel::Info,
        };

        Ok(Self {
            backend_name: cli.backend_name.clone(),
            log_level,
            config_file: cli.config_file.as_deref().map(PathBuf::from),
            storage: cli.storage.parse()?,
        })
    }

    /// Directive string for the subscriber's [`EnvFilter`]. A user supplied
    /// `RUST_LOG` is kept unless `--verbose` forced debug.
    pub fn log_filter(&self) -> String {
        let base = match env::var("RUST_LOG") {
            Ok(user) if !user.is_empty() && self.log_level != LogLevel::Debug => user,
            _ => self.log_level.as_directive().to_string(),
        };
        format!("{},{}", base, NOISY_CRATES)
    }

    pub fn init_logging(&self) -> Result<()> {
        let filter = EnvFilter::try_new(self.log_filter()).context("invalid log filter")?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .try_init()
            .map_err(|e| anyhow::anyhow!("logging already initialised: {}", e))?;

        tracing::info!("[BACKEND] Log level {:?}", self.log_level);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.backend_name.is_empty(), "backend name is empty");

        match &self.config_file {
            Some(path) if !path.exists() => {
                anyhow::bail!("EM configuration file {} not found", path.display())
            }
            _ => Ok(()),
        }
    }
}

/// Programmatic construction, mostly for tests and embedding
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    backend_name: Option<String>,
    log_level: Option<LogLevel>,
    config_file: Option<PathBuf>,
    storage: Option<StorageBackend>,
}

impl AppConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend_name(mut self, name: impl Into<String>) -> Self {
        self.backend_name = Some(name.into());
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn storage(mut self, storage: StorageBackend) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Fails without a backend name or when the config file is missing
    pub fn build(self) -> Result<AppConfig> {
        let backend_name = self.backend_name.context("backend name not set")?;
        let config = AppConfig {
            backend_name,
            log_level: self.log_level.unwrap_or(LogLevel::Info),
            config_file: self.config_file,
            storage: self.storage.unwrap_or(StorageBackend::Zenoh),
        };
        config.validate()?;
        Ok(config)
    }
}
