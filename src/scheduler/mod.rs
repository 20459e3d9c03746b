//! Scheduler engine for job execution.
//!
//! This module provides the scheduler facade, the trigger queue, and the
//! firing loop that hands due triggers to the worker pool.

mod engine;
mod firing;
mod handle;
pub mod queue;
mod types;

pub use engine::{Scheduler, SchedulerFactory};
pub use queue::{DueTrigger, QueueError, TriggerQueue};
pub use types::{SchedulerError, SchedulerMetaData, SchedulerState};
