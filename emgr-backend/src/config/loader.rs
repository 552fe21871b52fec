//! EM configuration file discovery.
//!
//! The configuration file is searched in priority order, the first existing
//! file wins:
//! 1. an explicit `--config` path
//! 2. `./em.json5`
//! 3. `~/.config/emgr/em.json5`
//! 4. `/etc/emgr/em.json5`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use emgr_shared::em_config::{EmConfig, parse_em_config_file};

/// System-wide configuration file (installed via package)
pub const SYSTEM_CONFIG_FILE: &str = "/etc/emgr/em.json5";

/// Per-user configuration file, relative to the home directory
pub const USER_CONFIG_FILE: &str = ".config/emgr/em.json5";

/// Configuration file in the working directory
pub const LOCAL_CONFIG_FILE: &str = "./em.json5";

/// Locates and parses the EM configuration file
#[derive(Debug, Clone)]
pub struct EmConfigLoader {
    /// Candidate files, highest priority first
    candidates: Vec<PathBuf>,
    explicit: Option<PathBuf>,
}

impl Default for EmConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl EmConfigLoader {
    /// Loader over the default search path
    pub fn new() -> Self {
        let mut candidates = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(USER_CONFIG_FILE));
        }
        candidates.push(PathBuf::from(SYSTEM_CONFIG_FILE));

        Self {
            candidates,
            explicit: None,
        }
    }

    /// Loader over a custom candidate list only
    pub fn with_candidates(candidates: Vec<PathBuf>) -> Self {
        Self {
            candidates,
            explicit: None,
        }
    }

    /// Use this file and skip the search path. A missing explicit file is an error.
    pub fn with_explicit(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Load the configuration. `Ok(None)` means no file exists anywhere on the
    /// search path; callers then run on built-in defaults.
    pub fn load(&self) -> Result<Option<(PathBuf, EmConfig)>> {
        if let Some(path) = &self.explicit {
            let config = Self::load_file(path)?;
            return Ok(Some((path.clone(), config)));
        }

        for path in &self.candidates {
            if !path.exists() {
                debug!("EM configuration candidate does not exist, skipping: {:?}", path);
                continue;
            }
            let config = Self::load_file(path)?;
            return Ok(Some((path.clone(), config)));
        }

        warn!(
            "No EM configuration file found in {:?}, using built-in defaults",
            self.candidates
        );
        Ok(None)
    }

    fn load_file(path: &Path) -> Result<EmConfig> {
        let config = parse_em_config_file(path)
            .with_context(|| format!("Failed to load EM configuration from {:?}", path))?;
        info!(
            "Loaded EM configuration from {:?}: {} devices, {} timers",
            path,
            config.devices.len(),
            config.timers.len()
        );
        Ok(config)
    }
}
