//! Element manager backend.
//!
//! Provisions network devices over NETCONF by running one scenario per
//! (transaction, device). See [`scenario`] for the state machine and
//! [`driver`] for the device facade it drives.

pub mod config;
pub mod driver;
pub mod handlers;
pub mod persistence;
pub mod scenario;
