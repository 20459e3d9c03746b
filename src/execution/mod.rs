//! Job execution.
//!
//! This module provides the bounded worker pool that runs job bodies and the
//! registry of executions that are currently in flight.

mod pool;
mod registry;

pub use pool::{Slot, WorkerPool};
pub use registry::{ExecutionRegistry, FireInstance, FireInstanceInfo, InterruptError};
