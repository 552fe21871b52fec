//! NETCONF RPC transport.
//!
//! The backend never opens SSH sessions itself. Each RPC is a Zenoh query to
//! the NETCONF agent serving the device on `emgr/netconf/{device}/rpc`; the
//! agent keeps one session per (transaction, device) and answers with a
//! [`NetconfReply`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use zenoh::Session;

use emgr_shared::topics;

/// Configuration datastores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datastore {
    Running,
    Candidate,
}

/// Operations understood by the NETCONF agents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rpc", rename_all = "kebab-case")]
pub enum NetconfRpc {
    Hello {
        address: String,
        port: u16,
    },
    Lock {
        target: Datastore,
    },
    Unlock {
        target: Datastore,
    },
    EditConfig {
        target: Datastore,
        config: String,
    },
    Validate {
        source: Datastore,
    },
    Commit {
        confirmed: bool,
        /// Seconds before an unconfirmed commit reverts
        confirm_timeout: Option<u64>,
    },
    CancelCommit,
    DiscardChanges,
    GetConfig {
        source: Datastore,
    },
    CloseSession,
}

impl NetconfRpc {
    pub fn name(&self) -> &'static str {
        match self {
            NetconfRpc::Hello { .. } => "hello",
            NetconfRpc::Lock { .. } => "lock",
            NetconfRpc::Unlock { .. } => "unlock",
            NetconfRpc::EditConfig { .. } => "edit-config",
            NetconfRpc::Validate { .. } => "validate",
            NetconfRpc::Commit { .. } => "commit",
            NetconfRpc::CancelCommit => "cancel-commit",
            NetconfRpc::DiscardChanges => "discard-changes",
            NetconfRpc::GetConfig { .. } => "get-config",
            NetconfRpc::CloseSession => "close-session",
        }
    }
}

/// RPC addressed to one device session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetconfRequest {
    pub transaction_id: String,
    pub device: String,
    pub rpc: NetconfRpc,
}

/// One `<rpc-error>` element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorInfo {
    pub error_tag: String,
    #[serde(default)]
    pub error_message: String,
}

/// Agent answer to a [`NetconfRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "kebab-case")]
pub enum NetconfReply {
    Ok,
    Data { content: String },
    RpcError { errors: Vec<RpcErrorInfo> },
}

impl NetconfReply {
    pub fn is_ok(&self) -> bool {
        !matches!(self, NetconfReply::RpcError { .. })
    }

    /// Concatenated rpc-error text, empty for successful replies
    pub fn error_text(&self) -> String {
        match self {
            NetconfReply::RpcError { errors } => errors
                .iter()
                .map(|e| format!("{}: {}", e.error_tag, e.error_message))
                .collect::<Vec<_>>()
                .join("; "),
            _ => String::new(),
        }
    }
}

/// Transport failures
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No reply from '{device}' to {rpc}")]
    NoReply { device: String, rpc: &'static str },

    #[error("Agent for '{device}' failed {rpc}: {message}")]
    Agent {
        device: String,
        rpc: &'static str,
        message: String,
    },

    #[error("Transport session error: {message}")]
    Session { message: String },

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Sends one RPC and waits for the reply
#[async_trait]
pub trait NetconfTransport: Send + Sync {
    async fn rpc(&self, request: NetconfRequest) -> Result<NetconfReply, TransportError>;
}

/// Transport over Zenoh queries
pub struct ZenohNetconfTransport {
    session: Arc<Session>,
    rpc_timeout: Duration,
}

impl ZenohNetconfTransport {
    pub fn new(session: Arc<Session>, rpc_timeout: Duration) -> Self {
        Self {
            session,
            rpc_timeout,
        }
    }
}

#[async_trait]
impl NetconfTransport for ZenohNetconfTransport {
    async fn rpc(&self, request: NetconfRequest) -> Result<NetconfReply, TransportError> {
        let rpc_name = request.rpc.name();
        let device = request.device.clone();
        let topic = topics::netconf_rpc(&device);
        let payload = serde_json::to_vec(&request)?;

        debug!("[NETCONF] -> {} {} ({} bytes)", device, rpc_name, payload.len());

        let replies = self
            .session
            .get(&topic)
            .payload(payload)
            .timeout(self.rpc_timeout)
            .await
            .map_err(|e| TransportError::Session {
                message: format!("Failed to query {}: {}", topic, e),
            })?;

        match replies.recv_async().await {
            Ok(reply) => match reply.into_result() {
                Ok(sample) => {
                    let reply: NetconfReply =
                        serde_json::from_slice(sample.payload().to_bytes().as_ref())?;
                    debug!("[NETCONF] <- {} {} ok={}", device, rpc_name, reply.is_ok());
                    Ok(reply)
                }
                Err(err) => Err(TransportError::Agent {
                    device,
                    rpc: rpc_name,
                    message: String::from_utf8_lossy(err.payload().to_bytes().as_ref())
                        .into_owned(),
                }),
            },
            // The reply channel closes without data once the query times out
            Err(_) => Err(TransportError::NoReply {
                device,
                rpc: rpc_name,
            }),
        }
    }
}
