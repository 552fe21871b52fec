//! Device driver facade.
//!
//! The scenario core talks to devices only through [`DeviceDriver`]. One
//! driver instance is created per device task by a [`DriverFactory`] and is
//! owned exclusively by that task, so drivers take `&mut self` and need no
//! internal locking.
//!
//! # Components
//!
//! * [`netconf::NetconfDriver`] - NETCONF implementation of the facade
//! * [`transport`] - RPC transport to the per-site NETCONF agents
//! * [`templates`] - vendor/service payload builders
//! * [`quirks`] - device behaviour the driver deliberately tolerates

pub mod netconf;
pub mod quirks;
pub mod templates;
pub mod transport;

pub use netconf::{NetconfDriver, NetconfDriverFactory};
pub use quirks::KnownBenignBackendError;
pub use transport::{NetconfTransport, TransportError, ZenohNetconfTransport};

use async_trait::async_trait;
use thiserror::Error;

use emgr_shared::{EcMessage, OrderType, ProcessStatus, TransactionId};

use crate::scenario::signal::SignalNotifier;

/// Identity of the scenario a driver call belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceContext {
    pub transaction_id: TransactionId,
    pub device: String,
    pub service: String,
    pub order_type: OrderType,
}

impl DeviceContext {
    pub fn new(transaction_id: &str, device: &str, service: &str, order_type: OrderType) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            device: device.to_string(),
            service: service.to_string(),
            order_type,
        }
    }
}

/// Result of opening the management session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectResult {
    Ok,
    /// The device answered and refused
    Ng,
    /// The device never answered
    NoReply,
}

/// Result of sending the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    Ok,
    /// Payload generation or device-side validation failed
    ValidationNg,
    /// The device rejected the edit
    UpdateNg,
}

/// Result of tearing down the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectResult {
    Ok,
    /// Session close failed; the configuration is in place
    CloseFailed,
    /// Reading the configuration back after commit failed
    ReadBackFailed,
}

/// Failures raised while preparing a driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Device '{device}' is not in the inventory")]
    UnknownDevice { device: String },

    #[error("No payload builder for {vendor} service '{service}'")]
    UnsupportedService { vendor: String, service: String },

    #[error("Stored state for device '{device}' could not be read: {reason}")]
    StateUnavailable { device: String, reason: String },
}

impl DriverError {
    /// Status recorded when `start` fails
    pub fn status(&self) -> ProcessStatus {
        match self {
            DriverError::UnknownDevice { .. } | DriverError::StateUnavailable { .. } => {
                ProcessStatus::ProcErrInf
            }
            DriverError::UnsupportedService { .. } => ProcessStatus::ProcErrOth,
        }
    }
}

/// Protocol operations the scenario core drives, one call per step
#[async_trait]
pub trait DeviceDriver: Send {
    /// Prepare the driver for this scenario; nothing is sent to the device
    async fn start(&mut self, ctx: &DeviceContext, message: &EcMessage) -> Result<(), DriverError>;

    /// Handle for reporting completion of the timed waits
    fn attach_notifier(&mut self, notifier: SignalNotifier);

    async fn connect(&mut self, ctx: &DeviceContext, message: &EcMessage) -> ConnectResult;

    async fn update_device_setting(
        &mut self,
        ctx: &DeviceContext,
        message: &EcMessage,
    ) -> UpdateResult;

    /// Confirmed commit
    async fn reserve_device_setting(&mut self, ctx: &DeviceContext) -> bool;

    /// Final commit
    async fn enable_device_setting(&mut self, ctx: &DeviceContext) -> bool;

    async fn disconnect_device(&mut self, ctx: &DeviceContext) -> DisconnectResult;

    /// Compensating command sequence, only meaningful while connected
    async fn rollback_device_setting(&mut self, ctx: &DeviceContext) -> bool;

    /// Record the applied configuration in EM persistence
    async fn write_em_info(&mut self, ctx: &DeviceContext, message: &EcMessage) -> bool;
}

/// Creates one exclusively owned driver per device task
pub trait DriverFactory: Send + Sync {
    fn create(&self, device: &str) -> Box<dyn DeviceDriver>;
}
