//! Closed-loop scaling control
//!
//! Each monitored workload gets its own sequential [`ControlLoop`]. Loops
//! share the rate-limited platform and decision clients and stop together on
//! the controller's broadcast shutdown signal.

mod backoff;
mod controller;
mod r#loop;
mod shutdown;


pub use backoff::Backoff;
pub use controller::{Controller, ControllerHandle};
pub use r#loop::{
    AppliedTarget, ControlLoop, ControlLoopBuilder, CycleReport, LoopConfig, LoopState,
};
pub use shutdown::Shutdown;
