//! Bounded pool of job execution slots.
//!
//! The pool owns a fixed number of slots backed by a semaphore. The firing
//! loop reserves a slot before it dispatches a trigger, and the slot is held
//! by the spawned execution until the job has finished and been reported.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::registry::{ExecutionRegistry, FireInstance, InterruptError};
use crate::core::job::JobError;
use crate::core::types::{FireInstanceId, JobKey};
use crate::events::{Event, EventBus, ExecutionOutcome};

/// A reserved execution slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

/// Pool of execution slots.
pub struct WorkerPool {
    size: usize,
    semaphore: Arc<Semaphore>,
    registry: Arc<ExecutionRegistry>,
    event_bus: Arc<EventBus>,
    executed: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Create a pool with `size` slots.
    pub fn new(size: usize, registry: Arc<ExecutionRegistry>, event_bus: Arc<EventBus>) -> Self {
        Self {
            size,
            semaphore: Arc::new(Semaphore::new(size)),
            registry,
            event_bus,
            executed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total number of slots.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of free slots.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of executions that have finished.
    pub fn jobs_executed(&self) -> u64 {
        self.executed.load(Ordering::SeqCst)
    }

    /// The registry of running executions.
    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    /// Wait for a free slot and reserve it.
    ///
    /// Returns `None` only if the pool has been closed.
    pub async fn wait_for_slot(&self) -> Option<Slot> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok()?;
        Some(Slot { _permit: permit })
    }

    /// Reserve a slot if one is free right now.
    pub fn try_reserve(&self) -> Option<Slot> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(Slot { _permit: permit })
    }

    /// Run an execution on a reserved slot.
    ///
    /// The instance is registered before this returns and deregistered
    /// before its completion event is emitted. Job errors and panics are
    /// reported as a failed outcome and never escape the slot.
    pub async fn submit(&self, slot: Slot, instance: Arc<FireInstance>) {
        self.registry.register(Arc::clone(&instance)).await;

        let registry = Arc::clone(&self.registry);
        let event_bus = Arc::clone(&self.event_bus);
        let executed = Arc::clone(&self.executed);

        tokio::spawn(async move {
            let id = instance.id().clone();
            let job_key = instance.job().key().clone();

            event_bus
                .emit(Event::job_started(job_key.clone(), id.clone()))
                .await;
            tracing::debug!(job = %job_key, fire_instance_id = %id, "Job started");

            let start = Instant::now();
            let body = Arc::clone(instance.body());
            let ctx = instance.context().clone();
            let result = tokio::spawn(async move { body.execute(&ctx).await }).await;
            let duration = start.elapsed();

            let outcome = match result {
                Ok(Ok(())) => ExecutionOutcome::Completed,
                Ok(Err(JobError::Interrupted)) => ExecutionOutcome::Interrupted,
                Ok(Err(_)) if instance.interrupt_requested() => ExecutionOutcome::Interrupted,
                Ok(Err(e)) => ExecutionOutcome::Failed {
                    error: e.to_string(),
                },
                Err(e) if e.is_panic() => ExecutionOutcome::Failed {
                    error: format!("job panicked: {}", panic_message(e.into_panic())),
                },
                Err(e) => ExecutionOutcome::Failed {
                    error: e.to_string(),
                },
            };

            match &outcome {
                ExecutionOutcome::Failed { error } => {
                    tracing::warn!(job = %job_key, fire_instance_id = %id, error = %error, "Job failed");
                }
                ExecutionOutcome::Interrupted => {
                    tracing::info!(job = %job_key, fire_instance_id = %id, "Job interrupted");
                }
                ExecutionOutcome::Completed => {
                    tracing::debug!(job = %job_key, fire_instance_id = %id, ?duration, "Job completed");
                }
            }

            executed.fetch_add(1, Ordering::SeqCst);
            registry.deregister(&id).await;
            event_bus
                .emit(Event::job_completed(job_key, id, outcome, duration))
                .await;

            drop(slot);
        });
    }

    /// Interrupt one running execution.
    pub async fn interrupt(&self, id: &FireInstanceId) -> Result<(), InterruptError> {
        self.deliver(id).await
    }

    /// Interrupt every interruptible running execution of a job.
    ///
    /// Returns how many executions were signalled.
    pub async fn interrupt_job(&self, job_key: &JobKey) -> usize {
        let instances = self.registry.instances_of(job_key).await;
        self.deliver_all(&instances).await
    }

    /// Interrupt every interruptible running execution.
    ///
    /// Returns how many executions were signalled.
    pub async fn interrupt_all(&self) -> usize {
        let instances = self.registry.instances().await;
        self.deliver_all(&instances).await
    }

    async fn deliver_all(&self, instances: &[Arc<FireInstance>]) -> usize {
        let mut signalled = 0;
        for instance in instances.iter().filter(|i| i.is_interruptible()) {
            if self.deliver(instance.id()).await.is_ok() {
                signalled += 1;
            }
        }
        signalled
    }

    async fn deliver(&self, id: &FireInstanceId) -> Result<(), InterruptError> {
        let instance = self.registry.interrupt(id).await?;
        tracing::info!(
            job = %instance.job().key(),
            fire_instance_id = %instance.id(),
            "Interrupt requested"
        );
        self.event_bus
            .emit(Event::job_interrupt_requested(
                instance.job().key().clone(),
                instance.id().clone(),
            ))
            .await;
        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
