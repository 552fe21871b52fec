use thiserror::Error;

/// Failures talking to the Zenoh network
#[derive(Error, Debug)]
pub enum EmError {
    #[error("zenoh {action} failed: {message}")]
    Zenoh {
        action: &'static str,
        message: String,
    },
}

impl EmError {
    pub fn zenoh(action: &'static str, err: impl std::fmt::Display) -> Self {
        EmError::Zenoh {
            action,
            message: err.to_string(),
        }
    }
}

/// Orders rejected before any device task is created
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("Order has no service type")]
    MissingService,

    #[error("Order targets no devices")]
    NoDevices,

    #[error("Order contains a message with an empty device name")]
    EmptyDeviceName,

    #[error("Device '{device}' appears more than once in the order")]
    DuplicateDevice { device: String },

    #[error("Message for '{device}' is for service '{found}', order is '{expected}'")]
    ServiceMismatch {
        device: String,
        expected: String,
        found: String,
    },

    #[error("Transaction '{transaction_id}' is already running")]
    TransactionInProgress { transaction_id: String },
}

/// EM configuration file errors
#[derive(Error, Debug)]
pub enum ConfigParseError {
    #[error("JSON5 parse error: {0}")]
    Json5Error(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Rejected Zenoh session settings
#[derive(Error, Debug)]
pub enum ZenohConfigError {
    #[error("endpoint '{endpoint}' is malformed: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("endpoint '{endpoint}' uses unsupported transport '{protocol}'")]
    InvalidProtocol { protocol: String, endpoint: String },

    #[error("{protocol} address '{address}' is invalid: {reason}")]
    InvalidAddress {
        address: String,
        protocol: String,
        reason: String,
    },

    #[error("{mode:?} session {reason}")]
    ModeEndpointMismatch {
        mode: crate::ZenohMode,
        reason: String,
    },

    #[error("endpoint '{endpoint}' is listed twice")]
    DuplicateEndpoint { endpoint: String },

    #[error("zenoh config could not be built: {reason}")]
    Build { reason: String },

    #[error("property '{key}' = '{value}' rejected: {reason}")]
    PropertyError {
        key: String,
        value: String,
        reason: String,
    },
}

impl ZenohConfigError {
    pub fn client_cannot_listen() -> Self {
        ZenohConfigError::ModeEndpointMismatch {
            mode: crate::ZenohMode::Client,
            reason: "cannot listen; a client only opens outgoing connections".to_string(),
        }
    }

    pub fn unsupported_endpoint_format(endpoint: &str) -> Self {
        ZenohConfigError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: "expected connect/<transport>/<ip:port> or listen/<transport>/<ip:port>"
                .to_string(),
        }
    }
}
