//! Per-(transaction, device) unit of work.

use thiserror::Error;

use emgr_shared::{EcMessage, ProcessStatus};

use super::signal::DeviceSignal;
use crate::driver::DeviceContext;

/// A status change the transition graph does not allow
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("{device} cannot move from {from} to {to}")]
    Illegal {
        device: String,
        from: String,
        to: ProcessStatus,
    },

    #[error("{device} already ended in {status}")]
    AlreadyFailed {
        device: String,
        status: ProcessStatus,
    },
}

/// State of one device inside one transaction.
///
/// The status moves one step at a time along the success path, or branches
/// once into a failure status. A failure may follow `PROC_END` because the
/// post-disconnect wait and the write-back run after it.
pub struct DeviceTask {
    ctx: DeviceContext,
    message: EcMessage,
    status: Option<ProcessStatus>,
    history: Vec<ProcessStatus>,
    connected: bool,
    rollback_attempted: bool,
    signal: DeviceSignal,
}

impl DeviceTask {
    pub fn new(ctx: DeviceContext, message: EcMessage) -> Self {
        let signal = DeviceSignal::new(format!("{}/{}", ctx.transaction_id, ctx.device));
        Self {
            ctx,
            message,
            status: None,
            history: Vec::new(),
            connected: false,
            rollback_attempted: false,
            signal,
        }
    }

    pub fn ctx(&self) -> &DeviceContext {
        &self.ctx
    }

    pub fn message(&self) -> &EcMessage {
        &self.message
    }

    pub fn device(&self) -> &str {
        &self.ctx.device
    }

    pub fn transaction_id(&self) -> &str {
        &self.ctx.transaction_id
    }

    /// Last recorded status, `None` before the task started
    pub fn status(&self) -> Option<ProcessStatus> {
        self.status
    }

    /// Every status recorded so far, oldest first
    pub fn history(&self) -> &[ProcessStatus] {
        &self.history
    }

    pub fn signal(&self) -> &DeviceSignal {
        &self.signal
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn rollback_attempted(&self) -> bool {
        self.rollback_attempted
    }

    pub fn mark_rollback_attempted(&mut self) {
        self.rollback_attempted = true;
    }

    /// Check that `next` is a legal successor of the current status
    pub fn check_transition(&self, next: ProcessStatus) -> Result<(), TransitionError> {
        let current = match self.status {
            None if next == ProcessStatus::ProcRun || next.is_failure() => return Ok(()),
            None => {
                return Err(TransitionError::Illegal {
                    device: self.ctx.device.clone(),
                    from: "start".to_string(),
                    to: next,
                });
            }
            Some(current) => current,
        };

        if current.is_failure() {
            return Err(TransitionError::AlreadyFailed {
                device: self.ctx.device.clone(),
                status: current,
            });
        }

        let legal = match (current.success_rank(), next.success_rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to == from + 1,
            (None, Some(_)) => false,
        };

        if legal {
            Ok(())
        } else {
            Err(TransitionError::Illegal {
                device: self.ctx.device.clone(),
                from: current.code().to_string(),
                to: next,
            })
        }
    }

    /// Record `next` after checking the transition
    pub fn record(&mut self, next: ProcessStatus) -> Result<(), TransitionError> {
        self.check_transition(next)?;
        self.status = Some(next);
        self.history.push(next);
        Ok(())
    }
}
