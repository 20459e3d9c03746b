//! Scheduler type definitions.
//!
//! This module contains error types, state enums, and command types for the scheduler.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use super::queue::QueueError;
use crate::config::ConfigError;
use crate::core::trigger::TriggerError;
use crate::core::types::{FireInstanceId, JobKey, TriggerKey};
use crate::execution::InterruptError;
use crate::storage::StoreError;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler has not been started.
    #[error("scheduler has not been started")]
    NotStarted,

    /// The scheduler has been shut down.
    #[error("scheduler has been shut down")]
    AlreadyStopped,

    /// Job not found.
    #[error("job not found: {0}")]
    UnknownJob(JobKey),

    /// No execution with this id is running.
    #[error("fire instance not executing: {0}")]
    UnknownFireInstance(FireInstanceId),

    /// The running job does not support interruption.
    #[error("job is not interruptible: {0}")]
    NotInterruptible(FireInstanceId),

    /// A job with this key is already stored.
    #[error("job already exists: {0}")]
    JobAlreadyExists(JobKey),

    /// A trigger with this key is already scheduled.
    #[error("trigger already exists: {0}")]
    TriggerAlreadyExists(TriggerKey),

    /// The trigger cannot be scheduled.
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    /// The job cannot be stored.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// Job store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

impl From<QueueError> for SchedulerError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::MissingJob(key) => SchedulerError::UnknownJob(key),
            QueueError::JobExists(key) => SchedulerError::JobAlreadyExists(key),
            QueueError::TriggerExists(key) => SchedulerError::TriggerAlreadyExists(key),
            QueueError::Unbound(key) => {
                SchedulerError::InvalidTrigger(format!("trigger {} is not bound to a job", key))
            }
            QueueError::NeverFires(key) => {
                SchedulerError::InvalidTrigger(format!("trigger {} will never fire", key))
            }
        }
    }
}

impl From<InterruptError> for SchedulerError {
    fn from(err: InterruptError) -> Self {
        match err {
            InterruptError::UnknownFireInstance(id) => SchedulerError::UnknownFireInstance(id),
            InterruptError::NotInterruptible(id) => SchedulerError::NotInterruptible(id),
        }
    }
}

impl From<TriggerError> for SchedulerError {
    fn from(err: TriggerError) -> Self {
        SchedulerError::InvalidTrigger(err.to_string())
    }
}

/// Lifecycle state of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    /// Built but not started.
    Created,
    /// Firing triggers.
    Started,
    /// Shut down; cannot be restarted.
    Stopped,
}

/// Commands sent to the firing loop.
pub(crate) enum LoopCommand {
    /// The set of triggers changed; re-check what is due.
    Wake,
    /// Stop dispatching and exit.
    Halt { response: oneshot::Sender<()> },
}

/// Summary of a scheduler instance.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerMetaData {
    /// Scheduler name.
    pub instance_name: String,
    /// Resolved instance id.
    pub instance_id: String,
    /// Number of worker slots.
    pub thread_pool_size: usize,
    /// Lifecycle state.
    pub state: SchedulerState,
    /// When the scheduler was started.
    pub running_since: Option<DateTime<Utc>>,
    /// Executions finished so far.
    pub jobs_executed: u64,
    /// Executions running now.
    pub currently_executing: usize,
    /// Whether running jobs are interrupted on shutdown.
    pub interrupt_jobs_on_shutdown: bool,
}
