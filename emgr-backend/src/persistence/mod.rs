//! Persistence facade for device status rows and applied EM information.
//!
//! Status rows are upserted by (device, transaction). Each device task only
//! ever writes its own row, so implementations need row-level safety and
//! nothing more.

pub mod memory;
pub mod zenoh_store;

pub use memory::MemoryStatusStore;
pub use zenoh_store::ZenohStatusStore;

use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use emgr_shared::{DeviceStatusRow, EmInfoRow, ProcessStatus, StatusWrite};

/// Persistence failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Write rejected for {device}/{transaction_id}: {reason}")]
    WriteRejected {
        device: String,
        transaction_id: String,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Status and EM-info accessors used by the scenario core
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Upsert the status row of `device` within `transaction_id`
    async fn write_transaction_device_status(
        &self,
        op: StatusWrite,
        device: &str,
        transaction_id: &str,
        status: ProcessStatus,
    ) -> Result<(), StoreError>;

    /// All device rows of a transaction, `None` when the transaction is unknown
    async fn read_transaction_device_status(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Vec<DeviceStatusRow>>, StoreError>;

    /// Record applied configuration keyed by device + slice + VLAN.
    /// Rows written for `delete` orders remove the matching entry instead.
    async fn write_em_info(&self, row: EmInfoRow) -> Result<(), StoreError>;

    /// Applied configuration currently recorded for a device
    async fn read_em_info(&self, device: &str) -> Result<Vec<EmInfoRow>, StoreError>;
}

/// Unix time in milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
