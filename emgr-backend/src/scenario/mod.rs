//! Device scenario execution.
//!
//! The runner spawns one [`DeviceScenario`] per device of an order. Each
//! scenario owns its [`DeviceTask`], its driver and its [`DeviceSignal`], and
//! writes only its own status row.

pub mod failure;
pub mod machine;
pub mod runner;
pub mod signal;
pub mod task;

pub use failure::{FailureKind, StepFailure, should_rollback};
pub use machine::DeviceScenario;
pub use runner::{ScenarioRunner, SignalRegistry};
pub use signal::{CountdownTimer, DeviceSignal, SignalNotifier, TimerStats, WakeReason};
pub use task::{DeviceTask, TransitionError};
