//! Shared types and message definitions for the emgr element manager.
//!
//! This crate contains the data structures exchanged between the element
//! manager backend, order submitters and the per-site NETCONF agents, plus the
//! status model every device scenario is expressed in.
//!
//! # Key Components
//!
//! * [`topics`] - Key expressions for the communication channels
//! * [`status::ProcessStatus`] - Transaction and device status codes
//! * [`order::Order`] / [`order::TransactionReport`] - Order intake and results
//! * [`em_config::EmConfig`] - Timers, device inventory and NETCONF settings
//! * [`session::ZenohConfig`] - Zenoh session configuration
//!
//! # Communication Patterns
//!
//! ```text
//! Submitter                         Backend                       NETCONF agent
//!    │ ── Query: OrderRequest ────► │                                   │
//!    │ ◄── Reply: OrderResponse ─── │ ── Query: NetconfRpc ───────────► │
//!    │                              │ ◄── Reply: NetconfReply ───────── │
//!    │ ◄── Pub: DeviceStatusUpdate  │                                   │
//!    │ ◄── Pub: TransactionReport   │ ◄── Pub: DeviceEvent ──────────── │
//! ```
//!
use zenoh::key_expr::{
    OwnedKeyExpr,
    format::{kedefine, keformat},
};

pub mod em_config;
pub mod errors;
pub mod order;
pub mod session;
pub mod status;

pub use errors::OrderError;
pub use order::{
    DeviceEvent, DeviceOutcome, DeviceStatusRow, DeviceStatusUpdate, EcMessage, EmInfoRow, Order,
    OrderRequest, OrderResponse, StatusWrite, TransactionId, TransactionReport, WaitStep,
};
pub use session::{ZenohConfig, ZenohMode};
pub use status::{OrderType, ProcessStatus};

/// Topic key expressions
pub mod topics {
    use super::*;

    kedefine!(
        pub order_query_keys: "emgr/${backend:*}/query/order",
        pub device_status_keys: "emgr/${backend:*}/status/${transaction:*}/${device:*}",
        pub device_event_keys: "emgr/${backend:*}/events/${transaction:*}/${device:*}",
        pub report_keys: "emgr/${backend:*}/reports",
        pub health_keys: "emgr/${backend:*}/health",
        pub netconf_rpc_keys: "emgr/netconf/${device:*}/rpc"
    );

    /// Get order intake query service key expression
    pub fn order_query_service(backend_name: &str) -> OwnedKeyExpr {
        keformat!(order_query_keys::formatter(), backend = backend_name).expect(
            "Failed to format order query topic - this should never happen with valid backend name",
        )
    }

    /// Get device status topic key expression
    pub fn device_status(backend_name: &str, transaction_id: &str, device: &str) -> OwnedKeyExpr {
        keformat!(
            device_status_keys::formatter(),
            backend = backend_name,
            transaction = transaction_id,
            device = device
        )
        .expect("device status topic format is fixed")
    }

    /// Get device event topic key expression
    pub fn device_events(backend_name: &str, transaction_id: &str, device: &str) -> OwnedKeyExpr {
        keformat!(
            device_event_keys::formatter(),
            backend = backend_name,
            transaction = transaction_id,
            device = device
        )
        .expect("device event topic format is fixed")
    }

    /// Get device event wildcard pattern for a specific backend
    pub fn backend_device_events_pattern(backend_name: &str) -> OwnedKeyExpr {
        device_events(backend_name, "*", "*")
    }

    /// Get transaction report topic key expression
    pub fn transaction_reports(backend_name: &str) -> OwnedKeyExpr {
        keformat!(report_keys::formatter(), backend = backend_name).expect(
            "Failed to format report topic - this should never happen with valid backend name",
        )
    }

    /// Get backend health status topic key expression
    pub fn backend_health(backend_name: &str) -> OwnedKeyExpr {
        keformat!(health_keys::formatter(), backend = backend_name).expect(
            "Failed to format health topic - this should never happen with valid backend name",
        )
    }

    /// Get NETCONF agent rpc key expression for a device
    pub fn netconf_rpc(device: &str) -> OwnedKeyExpr {
        keformat!(netconf_rpc_keys::formatter(), device = device).expect(
            "Failed to format netconf rpc topic - this should never happen with valid device name",
        )
    }
}

/// QoS-related constants
pub mod qos {
    /// Number of transaction reports kept for late-joining subscribers
    pub const REPORT_HISTORY: usize = 16;

    /// Heartbeat period of the report publisher in milliseconds
    pub const REPORT_HEARTBEAT_MS: u64 = 2000;
}
