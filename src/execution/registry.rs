//! Registry of currently executing job instances.
//!
//! The worker pool registers an instance before it starts the job body and
//! deregisters it before reporting completion, so a snapshot taken from the
//! registry never contains a finished execution or a half-registered one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};

use crate::core::context::JobExecutionContext;
use crate::core::job::{Job, JobDetail};
use crate::core::types::{FireInstanceId, JobKey, TriggerKey};

/// Reasons an interrupt request can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterruptError {
    /// No execution with this id is running.
    #[error("fire instance not executing: {0}")]
    UnknownFireInstance(FireInstanceId),

    /// The job body does not support interruption.
    #[error("job is not interruptible: {0}")]
    NotInterruptible(FireInstanceId),
}

/// One concrete, running execution of a job.
pub struct FireInstance {
    job: JobDetail,
    body: Arc<dyn Job>,
    context: JobExecutionContext,
}

impl std::fmt::Debug for FireInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FireInstance")
            .field("id", self.id())
            .field("job", self.job.key())
            .field("trigger", self.context.trigger_key())
            .field("interrupt_requested", &self.interrupt_requested())
            .finish()
    }
}

impl FireInstance {
    pub(crate) fn new(job: JobDetail, body: Arc<dyn Job>, context: JobExecutionContext) -> Self {
        Self { job, body, context }
    }

    /// Id of this execution.
    pub fn id(&self) -> &FireInstanceId {
        self.context.fire_instance_id()
    }

    /// The job being executed.
    pub fn job(&self) -> &JobDetail {
        &self.job
    }

    /// The context handed to the job body.
    pub fn context(&self) -> &JobExecutionContext {
        &self.context
    }

    pub(crate) fn body(&self) -> &Arc<dyn Job> {
        &self.body
    }

    /// Whether the job body supports interruption.
    pub fn is_interruptible(&self) -> bool {
        self.body.as_interruptible().is_some()
    }

    /// Whether an interrupt has been requested.
    pub fn interrupt_requested(&self) -> bool {
        self.context.is_interrupted()
    }

    /// Set the interrupt flag and call the job's interrupt hook.
    ///
    /// Leaves the flag untouched if the job is not interruptible.
    pub(crate) fn interrupt(&self) -> Result<(), InterruptError> {
        let hook = self
            .body
            .as_interruptible()
            .ok_or_else(|| InterruptError::NotInterruptible(self.id().clone()))?;
        self.context.interrupt_token().cancel();
        hook.interrupt();
        Ok(())
    }

    /// Snapshot of this execution.
    pub fn info(&self) -> FireInstanceInfo {
        FireInstanceInfo {
            fire_instance_id: self.id().clone(),
            job_key: self.job.key().clone(),
            trigger_key: self.context.trigger_key().clone(),
            fire_time: self.context.fire_time(),
            scheduled_fire_time: self.context.scheduled_fire_time(),
            interruptible: self.is_interruptible(),
            interrupt_requested: self.interrupt_requested(),
        }
    }
}

/// Point-in-time view of a running execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FireInstanceInfo {
    /// Id of the execution.
    pub fire_instance_id: FireInstanceId,
    /// Job being executed.
    pub job_key: JobKey,
    /// Trigger that fired.
    pub trigger_key: TriggerKey,
    /// When the execution started.
    pub fire_time: DateTime<Utc>,
    /// When the trigger was scheduled to fire.
    pub scheduled_fire_time: DateTime<Utc>,
    /// Whether the job supports interruption.
    pub interruptible: bool,
    /// Whether an interrupt has been requested.
    pub interrupt_requested: bool,
}

/// Registry of running executions, in dispatch order.
pub struct ExecutionRegistry {
    executing: RwLock<Vec<Arc<FireInstance>>>,
    /// Live count; lets shutdown wait for the registry to drain.
    count: watch::Sender<usize>,
}

impl ExecutionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            executing: RwLock::new(Vec::new()),
            count,
        }
    }

    /// Register a running execution.
    pub async fn register(&self, instance: Arc<FireInstance>) {
        let mut executing = self.executing.write().await;
        executing.push(instance);
        self.count.send_replace(executing.len());
    }

    /// Remove an execution, returning it if it was registered.
    pub async fn deregister(&self, id: &FireInstanceId) -> Option<Arc<FireInstance>> {
        let mut executing = self.executing.write().await;
        let position = executing.iter().position(|i| i.id() == id)?;
        let removed = executing.remove(position);
        self.count.send_replace(executing.len());
        Some(removed)
    }

    /// Snapshot of all running executions, in dispatch order.
    pub async fn list(&self) -> Vec<FireInstanceInfo> {
        self.executing.read().await.iter().map(|i| i.info()).collect()
    }

    /// All running executions, in dispatch order.
    pub async fn instances(&self) -> Vec<Arc<FireInstance>> {
        self.executing.read().await.clone()
    }

    /// Look up a running execution.
    pub async fn get(&self, id: &FireInstanceId) -> Option<Arc<FireInstance>> {
        self.executing
            .read()
            .await
            .iter()
            .find(|i| i.id() == id)
            .cloned()
    }

    /// Interrupt a running execution.
    ///
    /// The flag is set while the registry is read-locked, so an execution
    /// that has already deregistered is never reported as interrupted.
    pub async fn interrupt(
        &self,
        id: &FireInstanceId,
    ) -> Result<Arc<FireInstance>, InterruptError> {
        let executing = self.executing.read().await;
        let instance = executing
            .iter()
            .find(|i| i.id() == id)
            .ok_or_else(|| InterruptError::UnknownFireInstance(id.clone()))?;
        instance.interrupt()?;
        Ok(Arc::clone(instance))
    }

    /// Running executions of one job.
    pub async fn instances_of(&self, job_key: &JobKey) -> Vec<Arc<FireInstance>> {
        self.executing
            .read()
            .await
            .iter()
            .filter(|i| i.job().key() == job_key)
            .cloned()
            .collect()
    }

    /// Number of running executions.
    pub async fn len(&self) -> usize {
        self.executing.read().await.len()
    }

    /// Whether nothing is running.
    pub async fn is_empty(&self) -> bool {
        self.executing.read().await.is_empty()
    }

    /// Wait until nothing is running.
    pub async fn wait_until_empty(&self) {
        let mut count = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = count.wait_for(|n| *n == 0).await;
    }
}

impl Default for ExecutionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
