//! Scenario wait durations.
//!
//! Every bounded wait of a device scenario takes its duration from a named
//! timer in the EM configuration. A missing configuration, a missing key or an
//! unparsable value falls back to [`DEFAULT_TIMER`].

use std::time::Duration;

use tracing::{debug, warn};

use emgr_shared::WaitStep;
use emgr_shared::em_config::{
    EmConfig, TIMER_CONFIRMED_COMMIT, TIMER_CONFIRMED_COMMIT_EM_OFFSET,
    TIMER_CONNECT_GET_BEFORE_CONFIG, TIMER_DISCONNECT_GET_AFTER_CONFIG,
};

/// Fallback for any timer the configuration does not provide
pub const DEFAULT_TIMER: Duration = Duration::from_secs(600);

/// Resolved scenario timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    pub connect_get_before_config: Duration,
    /// Window sent to the device with the confirmed commit
    pub confirmed_commit: Duration,
    /// Margin the EM waits beyond the device window
    pub confirmed_commit_em_offset: Duration,
    pub disconnect_get_after_config: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self::resolve(None)
    }
}

impl TimerSettings {
    /// Resolve every timer from an optional configuration source
    pub fn resolve(config: Option<&EmConfig>) -> Self {
        Self {
            connect_get_before_config: Self::lookup(config, TIMER_CONNECT_GET_BEFORE_CONFIG),
            confirmed_commit: Self::lookup(config, TIMER_CONFIRMED_COMMIT),
            confirmed_commit_em_offset: Self::lookup(config, TIMER_CONFIRMED_COMMIT_EM_OFFSET),
            disconnect_get_after_config: Self::lookup(config, TIMER_DISCONNECT_GET_AFTER_CONFIG),
        }
    }

    fn lookup(config: Option<&EmConfig>, key: &str) -> Duration {
        let Some(config) = config else {
            warn!(
                "No EM configuration available, {} defaults to {:?}",
                key, DEFAULT_TIMER
            );
            return DEFAULT_TIMER;
        };

        match config.timer(key).map(|value| value.as_millis()) {
            Some(Ok(ms)) => {
                debug!("Timer {} = {}ms", key, ms);
                Duration::from_millis(ms)
            }
            Some(Err(reason)) => {
                warn!(
                    "Timer {} is invalid ({}), using {:?}",
                    key, reason, DEFAULT_TIMER
                );
                DEFAULT_TIMER
            }
            None => {
                warn!("Timer {} not configured, using {:?}", key, DEFAULT_TIMER);
                DEFAULT_TIMER
            }
        }
    }

    /// How long the scenario waits at a given step
    pub fn wait_for(&self, step: WaitStep) -> Duration {
        match step {
            WaitStep::ConnectReady => self.connect_get_before_config,
            WaitStep::ConfirmedCommit => self
                .confirmed_commit
                .saturating_add(self.confirmed_commit_em_offset),
            WaitStep::DisconnectComplete => self.disconnect_get_after_config,
        }
    }
}
