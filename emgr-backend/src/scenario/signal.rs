//! Bounded waits for asynchronous device completions.
//!
//! A [`DeviceSignal`] belongs to one device task. Arming it for a [`WaitStep`]
//! starts a [`CountdownTimer`] and returns a [`PendingWait`]; the wait resolves
//! exactly once, either when a [`SignalNotifier`] reports the step complete or
//! when the timer fires. Whichever source loses the race finds the single-shot
//! sender already taken and does nothing.
//!
//! Notifications that arrive before the step is armed are buffered, so a fast
//! device can never cause a missed wakeup.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use emgr_shared::WaitStep;

/// Why a pending wait resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// The step completed before the deadline
    Notified,
    /// The countdown elapsed first
    TimedOut,
}

/// Countdown that runs a callback on expiry unless cancelled.
///
/// Cancelling is idempotent: cancelling a finished or already cancelled timer
/// does nothing.
#[derive(Debug)]
pub struct CountdownTimer {
    handle: JoinHandle<()>,
    duration: Duration,
}

impl CountdownTimer {
    pub fn start<F>(duration: Duration, on_fire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            on_fire.await;
        });
        Self { handle, duration }
    }

    pub fn cancel(&self) {
        if !self.handle.is_finished() {
            self.handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Counters exposed for diagnostics and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    pub started: u64,
    pub fired: u64,
    pub cancelled: u64,
    /// Timers currently counting down (never more than one)
    pub active: usize,
}

struct ArmedWait {
    step: WaitStep,
    generation: u64,
    sender: oneshot::Sender<WakeReason>,
}

#[derive(Default)]
struct SignalState {
    armed: Option<ArmedWait>,
    early: HashSet<WaitStep>,
    timeout_flag: bool,
    generation: u64,
    timer: Option<CountdownTimer>,
    stats: TimerStats,
}

impl SignalState {
    /// Cancel the current timer, if any. Returns true when one was still running.
    fn cancel_timer(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) if timer.is_active() => {
                timer.cancel();
                self.stats.cancelled += 1;
                true
            }
            _ => false,
        }
    }
}

/// Wait/notify signal owned by one device task
pub struct DeviceSignal {
    label: String,
    state: Arc<Mutex<SignalState>>,
}

impl DeviceSignal {
    /// `label` identifies the owning task in log lines, e.g. `tx-1/leaf-1`
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Arc::new(Mutex::new(SignalState::default())),
        }
    }

    /// Handle used by drivers and event routers to report completions
    pub fn notifier(&self) -> SignalNotifier {
        SignalNotifier {
            label: self.label.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Start a bounded wait for `step`.
    ///
    /// Any timer left from a previous wait is cancelled first. If the step was
    /// already reported, the returned wait is resolved and no timer starts.
    pub async fn arm(&self, step: WaitStep, duration: Duration) -> PendingWait {
        let mut state = self.state.lock().await;

        if state.cancel_timer() {
            debug!("[SIGNAL] {} cancelled stale timer before arming {}", self.label, step);
        }

        state.generation += 1;
        let generation = state.generation;
        state.timeout_flag = false;
        // A wait that was never awaited loses its sender here
        state.armed = None;

        let (sender, receiver) = oneshot::channel();

        if state.early.remove(&step) {
            debug!("[SIGNAL] {} {} already reported, not starting timer", self.label, step);
            let _ = sender.send(WakeReason::Notified);
        } else {
            state.armed = Some(ArmedWait {
                step,
                generation,
                sender,
            });

            let weak = Arc::downgrade(&self.state);
            let label = self.label.clone();
            state.timer = Some(CountdownTimer::start(duration, async move {
                fire(weak, generation, label).await;
            }));
            state.stats.started += 1;
            debug!("[SIGNAL] {} timer started for {} ({:?})", self.label, step, duration);
        }

        PendingWait {
            label: self.label.clone(),
            step,
            generation,
            receiver,
            state: Arc::clone(&self.state),
        }
    }

    /// Arm and wait in one call
    pub async fn wait_for(&self, step: WaitStep, duration: Duration) -> WakeReason {
        self.arm(step, duration).await.wait().await
    }

    /// Set by the timer callback when the latest wait expired
    pub async fn timeout_flag(&self) -> bool {
        self.state.lock().await.timeout_flag
    }

    /// Cancel the running timer, if any. Safe to call at any time.
    pub async fn cancel_timer(&self) {
        let mut state = self.state.lock().await;
        if state.cancel_timer() {
            debug!("[SIGNAL] {} timer cancelled", self.label);
        }
    }

    pub async fn stats(&self) -> TimerStats {
        let state = self.state.lock().await;
        let mut stats = state.stats;
        stats.active = state.timer.as_ref().filter(|t| t.is_active()).map_or(0, |_| 1);
        stats
    }
}

impl Drop for DeviceSignal {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_lock() {
            state.cancel_timer();
        }
    }
}

async fn fire(state: Weak<Mutex<SignalState>>, generation: u64, label: String) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let mut state = state.lock().await;

    let current = matches!(&state.armed, Some(armed) if armed.generation == generation);
    if !current {
        return;
    }

    // The flag is raised before the waiter can observe the wakeup
    state.timeout_flag = true;
    state.stats.fired += 1;
    // Dropping our own handle detaches it, nothing is left to cancel
    state.timer = None;
    if let Some(armed) = state.armed.take() {
        debug!("[SIGNAL] {} timer fired for {}", label, armed.step);
        let _ = armed.sender.send(WakeReason::TimedOut);
    }
}

/// A wait that has been armed but not yet resolved
pub struct PendingWait {
    label: String,
    step: WaitStep,
    generation: u64,
    receiver: oneshot::Receiver<WakeReason>,
    state: Arc<Mutex<SignalState>>,
}

impl PendingWait {
    /// Block until notified or timed out, then cancel the timer
    pub async fn wait(self) -> WakeReason {
        let outcome = self.receiver.await;

        let mut state = self.state.lock().await;
        let reason = match outcome {
            Ok(reason) => reason,
            Err(_) => {
                // Re-armed before this wait was awaited
                warn!(
                    "[SIGNAL] {} wait for {} was superseded, treating as timeout",
                    self.label, self.step
                );
                if state.generation == self.generation {
                    state.timeout_flag = true;
                }
                WakeReason::TimedOut
            }
        };

        if state.generation == self.generation {
            state.armed = None;
            if state.cancel_timer() {
                debug!("[SIGNAL] {} timer for {} cancelled after wakeup", self.label, self.step);
            }
        }

        reason
    }
}

/// Cloneable handle that reports step completions to a [`DeviceSignal`]
#[derive(Clone)]
pub struct SignalNotifier {
    label: String,
    state: Arc<Mutex<SignalState>>,
}

impl SignalNotifier {
    /// Report `step` complete. Returns true when it woke a pending wait;
    /// otherwise the report is buffered for the next wait on that step.
    pub async fn notify(&self, step: WaitStep) -> bool {
        let mut state = self.state.lock().await;

        let matches_armed = matches!(&state.armed, Some(armed) if armed.step == step);
        if matches_armed {
            if let Some(armed) = state.armed.take() {
                debug!("[SIGNAL] {} notified for {}", self.label, step);
                return armed.sender.send(WakeReason::Notified).is_ok();
            }
        }

        debug!("[SIGNAL] {} buffered early notification for {}", self.label, step);
        state.early.insert(step);
        false
    }
}

impl std::fmt::Debug for SignalNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalNotifier")
            .field("label", &self.label)
            .finish()
    }
}
