//! NETCONF implementation of the device driver facade.
//!
//! RPC sequence for one scenario:
//!
//! ```text
//! connect   : hello, lock(candidate)                 -> signals ConnectReady
//! update    : edit-config(candidate), validate
//! reserve   : commit confirmed                       -> signals ConfirmedCommit
//! enable    : commit, unlock
//! disconnect: get-config(running), close-session     -> signals DisconnectComplete
//! rollback  : cancel-commit (if pending), discard-changes, unlock
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use emgr_shared::em_config::{DeviceInfo, EmConfig};
use emgr_shared::{EcMessage, EmInfoRow, OrderType, WaitStep};

use super::quirks::KnownBenignBackendError;
use super::templates::{BuildContext, BuilderRegistry, DeviceState, SliceParams};
use super::transport::{
    Datastore, NetconfReply, NetconfRequest, NetconfRpc, NetconfTransport, TransportError,
};
use super::{
    ConnectResult, DeviceContext, DeviceDriver, DisconnectResult, DriverError, DriverFactory,
    UpdateResult,
};
use crate::config::TimerSettings;
use crate::persistence::StatusStore;
use crate::scenario::signal::SignalNotifier;

/// Collaborators shared by every driver the factory creates
#[derive(Clone)]
pub struct NetconfDriverDeps {
    pub em: Arc<EmConfig>,
    pub transport: Arc<dyn NetconfTransport>,
    pub store: Arc<dyn StatusStore>,
    pub builders: Arc<BuilderRegistry>,
    pub benign_errors: Arc<KnownBenignBackendError>,
    pub timers: TimerSettings,
}

/// Per-device NETCONF driver, owned by one device task
pub struct NetconfDriver {
    deps: NetconfDriverDeps,
    device: Option<DeviceInfo>,
    state: DeviceState,
    notifier: Option<SignalNotifier>,
    locked: bool,
    confirmed_pending: bool,
}

impl NetconfDriver {
    pub fn new(deps: NetconfDriverDeps) -> Self {
        Self {
            deps,
            device: None,
            state: DeviceState::default(),
            notifier: None,
            locked: false,
            confirmed_pending: false,
        }
    }

    async fn call(
        &self,
        ctx: &DeviceContext,
        rpc: NetconfRpc,
    ) -> Result<NetconfReply, TransportError> {
        let request = NetconfRequest {
            transaction_id: ctx.transaction_id.clone(),
            device: ctx.device.clone(),
            rpc,
        };
        self.deps.transport.rpc(request).await
    }

    /// Send an RPC and report whether the device accepted it
    async fn call_ok(&self, ctx: &DeviceContext, rpc: NetconfRpc) -> bool {
        let name = rpc.name();
        match self.call(ctx, rpc).await {
            Ok(reply) if reply.is_ok() => true,
            Ok(reply) => {
                warn!(
                    "[NETCONF] {} rejected {}: {}",
                    ctx.device,
                    name,
                    reply.error_text()
                );
                false
            }
            Err(e) => {
                warn!("[NETCONF] {} {} failed: {}", ctx.device, name, e);
                false
            }
        }
    }

    async fn signal(&self, step: WaitStep) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(step).await;
        }
    }
}

#[async_trait]
impl DeviceDriver for NetconfDriver {
    async fn start(&mut self, ctx: &DeviceContext, message: &EcMessage) -> Result<(), DriverError> {
        let device = self
            .deps
            .em
            .device(&ctx.device)
            .cloned()
            .ok_or_else(|| DriverError::UnknownDevice {
                device: ctx.device.clone(),
            })?;

        if !self.deps.builders.supports(device.vendor, &message.service) {
            return Err(DriverError::UnsupportedService {
                vendor: device.vendor.to_string(),
                service: message.service.clone(),
            });
        }

        let applied = self
            .deps
            .store
            .read_em_info(&ctx.device)
            .await
            .map_err(|e| DriverError::StateUnavailable {
                device: ctx.device.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            "[NETCONF] {} driver started ({} {}, {} applied slices)",
            ctx.device,
            device.vendor,
            device.platform,
            applied.len()
        );
        self.state = DeviceState::new(applied);
        self.device = Some(device);
        Ok(())
    }

    fn attach_notifier(&mut self, notifier: SignalNotifier) {
        self.notifier = Some(notifier);
    }

    async fn connect(&mut self, ctx: &DeviceContext, _message: &EcMessage) -> ConnectResult {
        let Some(device) = self.device.clone() else {
            error!("[NETCONF] {} connect before start", ctx.device);
            return ConnectResult::Ng;
        };

        let hello = NetconfRpc::Hello {
            address: device.address.clone(),
            port: device.port,
        };
        match self.call(ctx, hello).await {
            Ok(reply) if reply.is_ok() => {}
            Ok(reply) => {
                warn!(
                    "[NETCONF] {} refused session: {}",
                    ctx.device,
                    reply.error_text()
                );
                return ConnectResult::Ng;
            }
            Err(TransportError::NoReply { .. }) => {
                warn!(
                    "[NETCONF] {} ({}:{}) did not answer hello",
                    ctx.device, device.address, device.port
                );
                return ConnectResult::NoReply;
            }
            Err(e) => {
                warn!("[NETCONF] {} hello failed: {}", ctx.device, e);
                return ConnectResult::Ng;
            }
        }

        let lock = NetconfRpc::Lock {
            target: Datastore::Candidate,
        };
        if !self.call_ok(ctx, lock).await {
            // Session is open but unusable
            self.call_ok(ctx, NetconfRpc::CloseSession).await;
            return ConnectResult::Ng;
        }
        self.locked = true;

        info!("[NETCONF] {} session open, candidate locked", ctx.device);
        self.signal(WaitStep::ConnectReady).await;
        ConnectResult::Ok
    }

    async fn update_device_setting(
        &mut self,
        ctx: &DeviceContext,
        message: &EcMessage,
    ) -> UpdateResult {
        let Some(device) = self.device.clone() else {
            return UpdateResult::ValidationNg;
        };

        let build_ctx = BuildContext {
            device,
            order_type: ctx.order_type,
        };
        let payload = match self.deps.builders.build(&build_ctx, message, &self.state) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("[NETCONF] {} payload rejected: {}", ctx.device, e);
                return UpdateResult::ValidationNg;
            }
        };
        debug!(
            "[NETCONF] {} edit-config payload ({} bytes):\n{}",
            ctx.device,
            payload.len(),
            payload
        );

        let edit = NetconfRpc::EditConfig {
            target: Datastore::Candidate,
            config: payload,
        };
        if !self.call_ok(ctx, edit).await {
            return UpdateResult::UpdateNg;
        }

        let validate = NetconfRpc::Validate {
            source: Datastore::Candidate,
        };
        if !self.call_ok(ctx, validate).await {
            return UpdateResult::ValidationNg;
        }

        UpdateResult::Ok
    }

    async fn reserve_device_setting(&mut self, ctx: &DeviceContext) -> bool {
        let commit = NetconfRpc::Commit {
            confirmed: true,
            confirm_timeout: Some(self.deps.timers.confirmed_commit.as_secs().max(1)),
        };

        let accepted = match self.call(ctx, commit).await {
            Ok(reply) if reply.is_ok() => true,
            Ok(reply) => self
                .deps
                .benign_errors
                .matches(&ctx.device, &reply.error_text()),
            Err(e) => {
                warn!("[NETCONF] {} confirmed commit failed: {}", ctx.device, e);
                false
            }
        };

        if accepted {
            self.confirmed_pending = true;
            self.signal(WaitStep::ConfirmedCommit).await;
        }
        accepted
    }

    async fn enable_device_setting(&mut self, ctx: &DeviceContext) -> bool {
        let commit = NetconfRpc::Commit {
            confirmed: false,
            confirm_timeout: None,
        };
        if !self.call_ok(ctx, commit).await {
            return false;
        }
        self.confirmed_pending = false;

        let unlock = NetconfRpc::Unlock {
            target: Datastore::Candidate,
        };
        if self.call_ok(ctx, unlock).await {
            self.locked = false;
        }
        true
    }

    async fn disconnect_device(&mut self, ctx: &DeviceContext) -> DisconnectResult {
        let read_back = self
            .device
            .as_ref()
            .map(|d| d.get_after_config)
            .unwrap_or(true);

        let mut result = DisconnectResult::Ok;
        if read_back {
            let get = NetconfRpc::GetConfig {
                source: Datastore::Running,
            };
            match self.call(ctx, get).await {
                Ok(NetconfReply::Data { content }) => {
                    debug!(
                        "[NETCONF] {} read back {} bytes of running configuration",
                        ctx.device,
                        content.len()
                    );
                }
                Ok(reply) => {
                    warn!(
                        "[NETCONF] {} get-config returned no data: {}",
                        ctx.device,
                        reply.error_text()
                    );
                    result = DisconnectResult::ReadBackFailed;
                }
                Err(e) => {
                    warn!("[NETCONF] {} get-config failed: {}", ctx.device, e);
                    result = DisconnectResult::ReadBackFailed;
                }
            }
        }

        if !self.call_ok(ctx, NetconfRpc::CloseSession).await
            && result == DisconnectResult::Ok
        {
            result = DisconnectResult::CloseFailed;
        }
        self.locked = false;

        // The session is gone either way
        self.signal(WaitStep::DisconnectComplete).await;
        result
    }

    async fn rollback_device_setting(&mut self, ctx: &DeviceContext) -> bool {
        let mut ok = true;

        if self.confirmed_pending {
            ok &= self.call_ok(ctx, NetconfRpc::CancelCommit).await;
            self.confirmed_pending = false;
        }

        ok &= self.call_ok(ctx, NetconfRpc::DiscardChanges).await;

        if self.locked {
            let unlock = NetconfRpc::Unlock {
                target: Datastore::Candidate,
            };
            if self.call_ok(ctx, unlock).await {
                self.locked = false;
            }
        }

        ok
    }

    async fn write_em_info(&mut self, ctx: &DeviceContext, message: &EcMessage) -> bool {
        if ctx.order_type == OrderType::Get {
            return true;
        }

        let params = match SliceParams::from_message(message) {
            Ok(params) => params,
            Err(e) => {
                error!("[NETCONF] {} cannot record EM info: {}", ctx.device, e);
                return false;
            }
        };

        let row = EmInfoRow {
            device: ctx.device.clone(),
            slice_id: params.slice_id,
            vlan_id: params.vlan_id,
            service: message.service.clone(),
            order_type: ctx.order_type,
            ec_body: message.body.clone(),
        };

        match self.deps.store.write_em_info(row).await {
            Ok(()) => true,
            Err(e) => {
                error!("[NETCONF] {} EM info write failed: {}", ctx.device, e);
                false
            }
        }
    }
}

/// Creates a fresh [`NetconfDriver`] per device task
pub struct NetconfDriverFactory {
    deps: NetconfDriverDeps,
}

impl NetconfDriverFactory {
    pub fn new(deps: NetconfDriverDeps) -> Self {
        Self { deps }
    }
}

impl DriverFactory for NetconfDriverFactory {
    fn create(&self, _device: &str) -> Box<dyn DeviceDriver> {
        Box::new(NetconfDriver::new(self.deps.clone()))
    }
}
