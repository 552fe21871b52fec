//! Failure classification and the rollback gate.

use std::fmt;

use thiserror::Error;

use emgr_shared::{ProcessStatus, WaitStep};

use crate::driver::DriverError;

/// Kind of step failure, decides the terminal status and whether
/// compensation may be attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Malformed request, detected before the device is touched
    Order,
    /// Stored device information missing, or the session was refused
    Info,
    /// Device unreachable
    Temporary,
    /// Generated configuration failed validation
    Validation,
    /// Device rejected the configuration
    DeviceApply,
    /// A bounded wait expired
    Timeout(WaitStep),
    /// Post-configuration read-back failed
    ReadBack,
    Other,
}

impl FailureKind {
    pub fn status(&self) -> ProcessStatus {
        match self {
            FailureKind::Order => ProcessStatus::ProcErrOrder,
            FailureKind::Info => ProcessStatus::ProcErrInf,
            FailureKind::Temporary => ProcessStatus::ProcErrTemp,
            FailureKind::Validation => ProcessStatus::ProcErrCheck,
            FailureKind::DeviceApply => ProcessStatus::ProcErrSetDev,
            FailureKind::Timeout(step) if step.timeout_is_retryable() => {
                ProcessStatus::ProcErrStopRetry
            }
            FailureKind::Timeout(_) => ProcessStatus::ProcErrStopNoRetry,
            FailureKind::ReadBack => ProcessStatus::ProcErrGetAftConf,
            FailureKind::Other => ProcessStatus::ProcErrOth,
        }
    }

    /// Whether compensation is meaningful for this kind at all. The caller
    /// still has to be connected for it to happen.
    pub fn allows_rollback(&self) -> bool {
        match self {
            FailureKind::Order | FailureKind::ReadBack => false,
            FailureKind::Timeout(step) => step.timeout_allows_rollback(),
            _ => true,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Order => f.write_str("order error"),
            FailureKind::Info => f.write_str("information error"),
            FailureKind::Temporary => f.write_str("temporary error"),
            FailureKind::Validation => f.write_str("validation error"),
            FailureKind::DeviceApply => f.write_str("device apply error"),
            FailureKind::Timeout(step) => write!(f, "{} timeout", step),
            FailureKind::ReadBack => f.write_str("read-back error"),
            FailureKind::Other => f.write_str("unclassified error"),
        }
    }
}

/// A failed scenario step
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} at {step}: {reason}")]
pub struct StepFailure {
    pub kind: FailureKind,
    /// Step that failed, e.g. `connect`
    pub step: &'static str,
    pub reason: String,
}

impl StepFailure {
    pub fn new(kind: FailureKind, step: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            step,
            reason: reason.into(),
        }
    }

    /// Driver preparation failed
    pub fn from_driver(error: &DriverError) -> Self {
        let kind = match error.status() {
            ProcessStatus::ProcErrInf => FailureKind::Info,
            _ => FailureKind::Other,
        };
        Self::new(kind, "start", error.to_string())
    }

    pub fn status(&self) -> ProcessStatus {
        self.kind.status()
    }

    pub fn retryable(&self) -> bool {
        self.status().is_retryable()
    }
}

/// Compensation goes to the device only while a session is open, only for
/// kinds that allow it, and at most once per device task.
pub fn should_rollback(kind: FailureKind, connected: bool, already_attempted: bool) -> bool {
    connected && !already_attempted && kind.allows_rollback()
}
