//! Device scenario state machine.
//!
//! One [`DeviceScenario`] drives one device through
//!
//! ```text
//! start → connect → EDIT_CONF ⇢ connect-ready → edit-config → CONF_COMMIT
//!       → confirmed commit → COMMIT ⇢ confirmed-commit → commit
//!       → disconnect → PROC_END ⇢ disconnect-complete → write-back
//! ```
//!
//! where `⇢` marks the three bounded waits. Any failing step branches into
//! the failure path, which persists the failure status before anything
//! else and then applies the rollback gate.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use emgr_shared::{DeviceOutcome, DeviceStatusUpdate, ProcessStatus, StatusWrite, WaitStep};

use super::failure::{FailureKind, StepFailure, should_rollback};
use super::signal::SignalNotifier;
use super::task::DeviceTask;
use crate::config::TimerSettings;
use crate::driver::{ConnectResult, DeviceDriver, DisconnectResult, UpdateResult};
use crate::persistence::{StatusStore, now_millis};

/// Scenario for one (transaction, device) pair; consumed by [`run`](Self::run)
pub struct DeviceScenario {
    task: DeviceTask,
    driver: Box<dyn DeviceDriver>,
    store: Arc<dyn StatusStore>,
    timers: TimerSettings,
    backend_name: String,
    updates: Option<mpsc::UnboundedSender<DeviceStatusUpdate>>,
}

impl DeviceScenario {
    pub fn new(
        task: DeviceTask,
        driver: Box<dyn DeviceDriver>,
        store: Arc<dyn StatusStore>,
        timers: TimerSettings,
    ) -> Self {
        Self {
            task,
            driver,
            store,
            timers,
            backend_name: String::new(),
            updates: None,
        }
    }

    /// Publish every persisted status on `sender`
    pub fn with_status_updates(
        mut self,
        backend_name: &str,
        sender: mpsc::UnboundedSender<DeviceStatusUpdate>,
    ) -> Self {
        self.backend_name = backend_name.to_string();
        self.updates = Some(sender);
        self
    }

    /// Handle that completes this scenario's pending waits
    pub fn notifier(&self) -> SignalNotifier {
        self.task.signal().notifier()
    }

    /// Drive the device to a terminal status
    #[instrument(
        skip(self),
        fields(transaction_id = %self.task.transaction_id(), device = %self.task.device())
    )]
    pub async fn run(mut self) -> DeviceOutcome {
        info!("[SCENARIO] Starting device scenario");

        let outcome = match self.drive().await {
            Ok(()) => {
                info!("[SCENARIO] Device scenario finished with PROC_END");
                DeviceOutcome::success(self.task.device())
            }
            Err(failure) => self.fail(failure).await,
        };

        self.task.signal().cancel_timer().await;
        outcome
    }

    async fn drive(&mut self) -> Result<(), StepFailure> {
        let ctx = self.task.ctx().clone();
        let message = self.task.message().clone();

        self.persist(StatusWrite::Insert, ProcessStatus::ProcRun).await?;
        self.check_message()?;

        if let Err(e) = self.driver.start(&ctx, &message).await {
            return Err(StepFailure::from_driver(&e));
        }
        self.driver.attach_notifier(self.task.signal().notifier());

        match self.driver.connect(&ctx, &message).await {
            ConnectResult::Ok => self.task.set_connected(true),
            ConnectResult::Ng => {
                return Err(StepFailure::new(
                    FailureKind::Info,
                    "connect",
                    "device refused the session",
                ));
            }
            ConnectResult::NoReply => {
                return Err(StepFailure::new(
                    FailureKind::Temporary,
                    "connect",
                    "device did not answer",
                ));
            }
        }

        self.persist(StatusWrite::Update, ProcessStatus::EditConf).await?;
        self.wait(WaitStep::ConnectReady).await?;

        match self.driver.update_device_setting(&ctx, &message).await {
            UpdateResult::Ok => {}
            UpdateResult::ValidationNg => {
                return Err(StepFailure::new(
                    FailureKind::Validation,
                    "edit-config",
                    "configuration failed validation",
                ));
            }
            UpdateResult::UpdateNg => {
                return Err(StepFailure::new(
                    FailureKind::DeviceApply,
                    "edit-config",
                    "device rejected the configuration",
                ));
            }
        }

        self.persist(StatusWrite::Update, ProcessStatus::ConfCommit).await?;

        if !self.driver.reserve_device_setting(&ctx).await {
            return Err(StepFailure::new(
                FailureKind::DeviceApply,
                "confirmed-commit",
                "confirmed commit rejected",
            ));
        }

        self.persist(StatusWrite::Update, ProcessStatus::Commit).await?;
        self.wait(WaitStep::ConfirmedCommit).await?;

        if !self.driver.enable_device_setting(&ctx).await {
            return Err(StepFailure::new(
                FailureKind::Other,
                "commit",
                "final commit failed",
            ));
        }

        let disconnected = self.driver.disconnect_device(&ctx).await;
        self.task.set_connected(false);
        match disconnected {
            DisconnectResult::Ok => {}
            DisconnectResult::CloseFailed => {
                warn!("[SCENARIO] Session close failed, configuration is committed");
            }
            DisconnectResult::ReadBackFailed => {
                return Err(StepFailure::new(
                    FailureKind::ReadBack,
                    "disconnect",
                    "post-configuration read-back failed",
                ));
            }
        }

        self.persist(StatusWrite::Update, ProcessStatus::ProcEnd).await?;
        self.wait(WaitStep::DisconnectComplete).await?;

        if !self.driver.write_em_info(&ctx, &message).await {
            return Err(StepFailure::new(
                FailureKind::Other,
                "write-back",
                "applied configuration could not be recorded",
            ));
        }

        Ok(())
    }

    /// Structural checks on the EC message; the body itself is opaque here
    fn check_message(&self) -> Result<(), StepFailure> {
        let ctx = self.task.ctx();
        let message = self.task.message();

        if message.device != ctx.device {
            return Err(StepFailure::new(
                FailureKind::Order,
                "order",
                format!("message addressed to '{}'", message.device),
            ));
        }
        if message.service != ctx.service {
            return Err(StepFailure::new(
                FailureKind::Order,
                "order",
                format!("message is for service '{}'", message.service),
            ));
        }
        if !message.body.is_object() {
            return Err(StepFailure::new(
                FailureKind::Order,
                "order",
                "message body is not an object",
            ));
        }
        Ok(())
    }

    /// Persist `status`, then record it in memory
    async fn persist(&mut self, op: StatusWrite, status: ProcessStatus) -> Result<(), StepFailure> {
        if let Err(e) = self.task.check_transition(status) {
            return Err(StepFailure::new(FailureKind::Other, "transition", e.to_string()));
        }

        let device = self.task.device().to_string();
        let transaction_id = self.task.transaction_id().to_string();
        self.store
            .write_transaction_device_status(op, &device, &transaction_id, status)
            .await
            .map_err(|e| {
                StepFailure::new(
                    FailureKind::Other,
                    "persist",
                    format!("{} not persisted: {}", status, e),
                )
            })?;

        if let Err(e) = self.task.record(status) {
            return Err(StepFailure::new(FailureKind::Other, "transition", e.to_string()));
        }
        debug!("[SCENARIO] {} -> {}", device, status);
        self.publish(status);
        Ok(())
    }

    fn publish(&self, status: ProcessStatus) {
        if let Some(sender) = &self.updates {
            let update = DeviceStatusUpdate {
                backend_name: self.backend_name.clone(),
                transaction_id: self.task.transaction_id().to_string(),
                device: self.task.device().to_string(),
                status,
                timestamp: now_millis(),
            };
            if sender.send(update).is_err() {
                debug!("[SCENARIO] Status update receiver dropped");
            }
        }
    }

    /// Bounded wait; the branch is taken on the timeout flag
    async fn wait(&mut self, step: WaitStep) -> Result<(), StepFailure> {
        let duration = self.timers.wait_for(step);
        debug!("[SCENARIO] Waiting up to {:?} for {}", duration, step);

        self.task.signal().wait_for(step, duration).await;

        if self.task.signal().timeout_flag().await {
            warn!("[SCENARIO] {} did not complete within {:?}", step, duration);
            return Err(StepFailure::new(
                FailureKind::Timeout(step),
                wait_step_name(step),
                format!("no {} within {:?}", step, duration),
            ));
        }
        Ok(())
    }

    /// Failure path: persist the failure status, then compensate if the gate
    /// allows it. The task is terminal afterwards regardless of what the
    /// rollback does.
    async fn fail(&mut self, failure: StepFailure) -> DeviceOutcome {
        let status = failure.status();
        error!("[SCENARIO] {}", failure);

        let ctx = self.task.ctx().clone();

        match self
            .store
            .write_transaction_device_status(
                StatusWrite::Update,
                &ctx.device,
                &ctx.transaction_id,
                status,
            )
            .await
        {
            Ok(()) => self.publish(status),
            Err(e) => error!("[STORE] Failed to persist {} for {}: {}", status, ctx.device, e),
        }
        if let Err(e) = self.task.record(status) {
            warn!("[SCENARIO] {}", e);
        }

        let mut rolled_back = false;
        if should_rollback(
            failure.kind,
            self.task.is_connected(),
            self.task.rollback_attempted(),
        ) {
            self.task.mark_rollback_attempted();
            rolled_back = true;
            info!("[SCENARIO] Rolling back {}", ctx.device);

            if !self.driver.rollback_device_setting(&ctx).await {
                error!("[SCENARIO] Rollback failed for {}, not retrying", ctx.device);
            }
        }

        if self.task.is_connected() {
            match self.driver.disconnect_device(&ctx).await {
                DisconnectResult::Ok => {}
                other => warn!("[SCENARIO] Disconnect after failure: {:?}", other),
            }
            self.task.set_connected(false);
        }

        DeviceOutcome {
            device: ctx.device,
            status,
            rolled_back,
            retryable: failure.retryable(),
            reason: Some(failure.to_string()),
        }
    }
}

fn wait_step_name(step: WaitStep) -> &'static str {
    match step {
        WaitStep::ConnectReady => "connect-ready",
        WaitStep::ConfirmedCommit => "confirmed-commit",
        WaitStep::DisconnectComplete => "disconnect-complete",
    }
}
