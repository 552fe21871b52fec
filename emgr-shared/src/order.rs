//! Order, EC message and outcome types.
//!
//! An [`Order`] carries one [`EcMessage`] per target device. The backend turns
//! it into one device task per message and answers with a
//! [`TransactionReport`] once every device reached a terminal status.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::errors::OrderError;
use crate::status::{OrderType, ProcessStatus};

/// Unique identifier for transactions
pub type TransactionId = String;

/// Service-specific configuration request scoped to one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcMessage {
    /// Target device name (must exist in the device inventory)
    pub device: String,
    /// Service type, e.g. `l2-slice`
    pub service: String,
    /// Service parameters, opaque to the scenario core
    pub body: serde_json::Value,
}

impl EcMessage {
    pub fn new(device: &str, service: &str, body: serde_json::Value) -> Self {
        Self {
            device: device.to_string(),
            service: service.to_string(),
            body,
        }
    }
}

/// Configuration change request spanning one or more devices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Transaction identifier; assigned by the backend when empty
    #[serde(default)]
    pub transaction_id: TransactionId,
    pub order_type: OrderType,
    pub service: String,
    pub messages: Vec<EcMessage>,
}

impl Order {
    pub fn new(order_type: OrderType, service: &str, messages: Vec<EcMessage>) -> Self {
        Self {
            transaction_id: String::new(),
            order_type,
            service: service.to_string(),
            messages,
        }
    }

    /// Device names targeted by this order
    pub fn devices(&self) -> Vec<&str> {
        self.messages.iter().map(|m| m.device.as_str()).collect()
    }

    /// Reject orders that cannot be dispatched at all
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.service.is_empty() {
            return Err(OrderError::MissingService);
        }
        if self.messages.is_empty() {
            return Err(OrderError::NoDevices);
        }

        let mut seen = HashSet::new();
        for message in &self.messages {
            if message.device.is_empty() {
                return Err(OrderError::EmptyDeviceName);
            }
            if !seen.insert(message.device.as_str()) {
                return Err(OrderError::DuplicateDevice {
                    device: message.device.clone(),
                });
            }
            if message.service != self.service {
                return Err(OrderError::ServiceMismatch {
                    device: message.device.clone(),
                    expected: self.service.clone(),
                    found: message.service.clone(),
                });
            }
        }

        Ok(())
    }
}

/// The three bounded waits of a device scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStep {
    /// Session ready before the configuration is edited
    ConnectReady,
    /// Confirmed commit acknowledged
    ConfirmedCommit,
    /// Session torn down after the configuration was read back
    DisconnectComplete,
}

impl WaitStep {
    /// A timeout here happened before anything was committed
    pub fn timeout_is_retryable(&self) -> bool {
        matches!(self, WaitStep::ConnectReady | WaitStep::ConfirmedCommit)
    }

    /// Compensation is impossible once the session has been closed
    pub fn timeout_allows_rollback(&self) -> bool {
        !matches!(self, WaitStep::DisconnectComplete)
    }
}

impl fmt::Display for WaitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitStep::ConnectReady => f.write_str("connect-ready"),
            WaitStep::ConfirmedCommit => f.write_str("confirmed-commit"),
            WaitStep::DisconnectComplete => f.write_str("disconnect-complete"),
        }
    }
}

/// External completion event addressed to one device task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub transaction_id: TransactionId,
    pub device: String,
    pub step: WaitStep,
}

/// Final result of one device task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceOutcome {
    pub device: String,
    pub status: ProcessStatus,
    /// Whether the compensating rollback command was sent to the device
    pub rolled_back: bool,
    pub retryable: bool,
    /// Human-readable failure reason
    pub reason: Option<String>,
}

impl DeviceOutcome {
    pub fn success(device: &str) -> Self {
        Self {
            device: device.to_string(),
            status: ProcessStatus::ProcEnd,
            rolled_back: false,
            retryable: false,
            reason: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ProcessStatus::ProcEnd
    }
}

/// Aggregated result of a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReport {
    pub transaction_id: TransactionId,
    pub order_type: OrderType,
    pub service: String,
    pub status: ProcessStatus,
    /// Per-device outcomes sorted by device name
    pub outcomes: Vec<DeviceOutcome>,
    /// Unix timestamp in milliseconds
    pub started_at: u64,
    /// Unix timestamp in milliseconds
    pub finished_at: u64,
}

impl TransactionReport {
    /// Aggregate status: `PROC_END` when every device succeeded, otherwise
    /// the status of the first failed device in name order
    pub fn aggregate_status(outcomes: &[DeviceOutcome]) -> ProcessStatus {
        let mut sorted: Vec<&DeviceOutcome> = outcomes.iter().collect();
        sorted.sort_by(|a, b| a.device.cmp(&b.device));
        sorted
            .into_iter()
            .find(|o| !o.is_success())
            .map(|o| o.status)
            .unwrap_or(ProcessStatus::ProcEnd)
    }

    pub fn is_success(&self) -> bool {
        self.status == ProcessStatus::ProcEnd
    }

    pub fn outcome(&self, device: &str) -> Option<&DeviceOutcome> {
        self.outcomes.iter().find(|o| o.device == device)
    }
}

/// Kind of status write, upserted by (device, transaction)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusWrite {
    Insert,
    Update,
}

/// Persisted device status row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatusRow {
    pub transaction_id: TransactionId,
    pub device: String,
    pub status: ProcessStatus,
    pub op: StatusWrite,
    /// Unix timestamp in milliseconds
    pub updated_at: u64,
}

/// Applied configuration recorded after a successful scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmInfoRow {
    pub device: String,
    pub slice_id: String,
    pub vlan_id: u16,
    pub service: String,
    pub order_type: OrderType,
    /// EC message body that produced this row
    pub ec_body: serde_json::Value,
}

/// Status update published whenever a device task persists a status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatusUpdate {
    pub backend_name: String,
    pub transaction_id: TransactionId,
    pub device: String,
    pub status: ProcessStatus,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

/// Order intake requests (Query/Reply pattern)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderRequest {
    /// Submit an order for background execution
    Submit(Order),
    /// Read the persisted device statuses of a transaction
    Status { transaction_id: TransactionId },
    /// List transactions currently running
    ListActive,
}

/// Response to order intake requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderResponse {
    Accepted { transaction_id: TransactionId },
    Status { rows: Vec<DeviceStatusRow> },
    Active { transactions: Vec<TransactionId> },
    Error { message: String },
}
