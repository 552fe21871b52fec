//! Processing status codes for transactions and device tasks.
//!
//! A device task walks the success path
//! `PROC_RUN → EDIT_CONF → CONF_COMMIT → COMMIT → PROC_END` and may branch into
//! exactly one failure status at any step. Every failure status is terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a transaction or of one device within a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    /// Order accepted, device scenario running
    ProcRun,
    /// Session open, configuration being edited
    EditConf,
    /// Configuration applied, confirmed commit pending
    ConfCommit,
    /// Confirmed commit issued, waiting for the final commit
    Commit,
    /// Scenario finished successfully
    ProcEnd,
    /// Temporary failure (device unreachable)
    ProcErrTemp,
    /// Malformed order detected before touching the device
    ProcErrOrder,
    /// Stored device information missing or connection refused
    ProcErrInf,
    /// Generated configuration failed validation
    ProcErrCheck,
    /// Device rejected the configuration
    ProcErrSetDev,
    /// Unclassified failure
    ProcErrOth,
    /// Post-configuration read-back failed
    ProcErrGetAftConf,
    /// Timed out before anything was committed, safe to retry
    ProcErrStopRetry,
    /// Timed out after a partial commit may have happened
    ProcErrStopNoRetry,
}

impl ProcessStatus {
    /// Success path in order
    pub const SUCCESS_PATH: [ProcessStatus; 5] = [
        ProcessStatus::ProcRun,
        ProcessStatus::EditConf,
        ProcessStatus::ConfCommit,
        ProcessStatus::Commit,
        ProcessStatus::ProcEnd,
    ];

    /// Status code as stored and published
    pub fn code(&self) -> &'static str {
        match self {
            ProcessStatus::ProcRun => "PROC_RUN",
            ProcessStatus::EditConf => "EDIT_CONF",
            ProcessStatus::ConfCommit => "CONF_COMMIT",
            ProcessStatus::Commit => "COMMIT",
            ProcessStatus::ProcEnd => "PROC_END",
            ProcessStatus::ProcErrTemp => "PROC_ERR_TEMP",
            ProcessStatus::ProcErrOrder => "PROC_ERR_ORDER",
            ProcessStatus::ProcErrInf => "PROC_ERR_INF",
            ProcessStatus::ProcErrCheck => "PROC_ERR_CHECK",
            ProcessStatus::ProcErrSetDev => "PROC_ERR_SET_DEV",
            ProcessStatus::ProcErrOth => "PROC_ERR_OTH",
            ProcessStatus::ProcErrGetAftConf => "PROC_ERR_GET_AFT_CONF",
            ProcessStatus::ProcErrStopRetry => "PROC_ERR_STOP_RETRY",
            ProcessStatus::ProcErrStopNoRetry => "PROC_ERR_STOP_NO_RETRY",
        }
    }

    /// Position on the success path, `None` for failure statuses
    pub fn success_rank(&self) -> Option<usize> {
        Self::SUCCESS_PATH.iter().position(|s| s == self)
    }

    pub fn is_failure(&self) -> bool {
        self.success_rank().is_none()
    }

    /// Terminal statuses end the device task
    pub fn is_terminal(&self) -> bool {
        self.is_failure() || *self == ProcessStatus::ProcEnd
    }

    /// Whether the failure status invites a later retry of the same order
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProcessStatus::ProcErrStopRetry | ProcessStatus::ProcErrTemp
        )
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Kind of configuration change requested by an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Merge,
    Delete,
    Replace,
    Get,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Merge => "merge",
            OrderType::Delete => "delete",
            OrderType::Replace => "replace",
            OrderType::Get => "get",
        }
    }

    /// Orders that change device configuration
    pub fn is_mutating(&self) -> bool {
        !matches!(self, OrderType::Get)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
