//! Scheduler lifecycle events and event handling.
//!
//! This module provides event emission for trigger firings and job
//! executions. It is the only channel through which the outcome of a job
//! reaches the outside: job errors never propagate back to the caller that
//! scheduled the job.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::{FireInstanceId, JobKey, TriggerKey};

/// Terminal outcome of one job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The job body returned successfully.
    Completed,
    /// The job body returned an error or panicked.
    Failed { error: String },
    /// The job was interrupted and stopped.
    Interrupted,
}

impl ExecutionOutcome {
    /// Whether the execution completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed)
    }
}

/// Lifecycle events emitted by the scheduler.
#[derive(Debug, Clone)]
pub enum Event {
    /// The scheduler has started.
    SchedulerStarted {
        instance_id: String,
        timestamp: Instant,
    },

    /// The scheduler has shut down.
    SchedulerShutdown {
        instance_id: String,
        timestamp: Instant,
    },

    /// A trigger fired and its job was handed to the worker pool.
    TriggerFired {
        trigger_key: TriggerKey,
        job_key: JobKey,
        fire_instance_id: FireInstanceId,
        timestamp: Instant,
    },

    /// A trigger will not fire again and was removed.
    TriggerFinalized {
        trigger_key: TriggerKey,
        timestamp: Instant,
    },

    /// A trigger fired later than the misfire threshold.
    TriggerMisfired {
        trigger_key: TriggerKey,
        lateness: Duration,
        timestamp: Instant,
    },

    /// A job execution has started.
    JobStarted {
        job_key: JobKey,
        fire_instance_id: FireInstanceId,
        timestamp: Instant,
    },

    /// A job execution finished.
    JobCompleted {
        job_key: JobKey,
        fire_instance_id: FireInstanceId,
        outcome: ExecutionOutcome,
        duration: Duration,
        timestamp: Instant,
    },

    /// An interrupt was delivered to a running job.
    JobInterruptRequested {
        job_key: JobKey,
        fire_instance_id: FireInstanceId,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::SchedulerStarted { timestamp, .. } => *timestamp,
            Event::SchedulerShutdown { timestamp, .. } => *timestamp,
            Event::TriggerFired { timestamp, .. } => *timestamp,
            Event::TriggerFinalized { timestamp, .. } => *timestamp,
            Event::TriggerMisfired { timestamp, .. } => *timestamp,
            Event::JobStarted { timestamp, .. } => *timestamp,
            Event::JobCompleted { timestamp, .. } => *timestamp,
            Event::JobInterruptRequested { timestamp, .. } => *timestamp,
        }
    }

    /// Create a SchedulerStarted event.
    pub fn scheduler_started(instance_id: impl Into<String>) -> Self {
        Event::SchedulerStarted {
            instance_id: instance_id.into(),
            timestamp: Instant::now(),
        }
    }

    /// Create a SchedulerShutdown event.
    pub fn scheduler_shutdown(instance_id: impl Into<String>) -> Self {
        Event::SchedulerShutdown {
            instance_id: instance_id.into(),
            timestamp: Instant::now(),
        }
    }

    /// Create a TriggerFired event.
    pub fn trigger_fired(
        trigger_key: TriggerKey,
        job_key: JobKey,
        fire_instance_id: FireInstanceId,
    ) -> Self {
        Event::TriggerFired {
            trigger_key,
            job_key,
            fire_instance_id,
            timestamp: Instant::now(),
        }
    }

    /// Create a TriggerFinalized event.
    pub fn trigger_finalized(trigger_key: TriggerKey) -> Self {
        Event::TriggerFinalized {
            trigger_key,
            timestamp: Instant::now(),
        }
    }

    /// Create a TriggerMisfired event.
    pub fn trigger_misfired(trigger_key: TriggerKey, lateness: Duration) -> Self {
        Event::TriggerMisfired {
            trigger_key,
            lateness,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobStarted event.
    pub fn job_started(job_key: JobKey, fire_instance_id: FireInstanceId) -> Self {
        Event::JobStarted {
            job_key,
            fire_instance_id,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobCompleted event.
    pub fn job_completed(
        job_key: JobKey,
        fire_instance_id: FireInstanceId,
        outcome: ExecutionOutcome,
        duration: Duration,
    ) -> Self {
        Event::JobCompleted {
            job_key,
            fire_instance_id,
            outcome,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobInterruptRequested event.
    pub fn job_interrupt_requested(job_key: JobKey, fire_instance_id: FireInstanceId) -> Self {
        Event::JobInterruptRequested {
            job_key,
            fire_instance_id,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
