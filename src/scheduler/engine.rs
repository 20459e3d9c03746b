//! Scheduler facade.
//!
//! The scheduler is responsible for:
//! - Accepting jobs and triggers while started
//! - Running the firing loop that hands due triggers to the worker pool
//! - Listing and interrupting running executions
//! - Shutting down, either draining or interrupting running jobs

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use super::firing::FiringLoop;
use super::handle::LoopHandle;
use super::queue::TriggerQueue;
use super::types::{SchedulerError, SchedulerMetaData, SchedulerState};
use crate::config::SchedulerConfig;
use crate::core::context::JobDataMap;
use crate::core::job::JobDetail;
use crate::core::trigger::{Trigger, TriggerBuilder};
use crate::core::types::{FireInstanceId, JobKey, TriggerKey};
use crate::events::{Event, EventBus};
use crate::execution::{ExecutionRegistry, FireInstanceInfo, WorkerPool};
use crate::storage::{InMemoryJobStore, JobStore};

/// Builds configured [`Scheduler`] instances.
pub struct SchedulerFactory {
    config: SchedulerConfig,
    store: Option<Arc<dyn JobStore>>,
    event_bus: Option<EventBus>,
}

impl SchedulerFactory {
    /// Create a factory for the given configuration.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            store: None,
            event_bus: None,
        }
    }

    /// Create a factory from key/value properties.
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self, SchedulerError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Ok(Self::new(SchedulerConfig::from_properties(properties)?))
    }

    /// Use the given job store instead of a fresh in-memory one.
    pub fn with_job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Build a scheduler in the `Created` state.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        let mut config = self.config;
        config.validate()?;
        if config.is_auto_instance_id() {
            config.instance_id = format!(
                "{}-{}",
                config.instance_name,
                uuid::Uuid::new_v4().simple()
            );
        }

        let event_bus = Arc::new(self.event_bus.unwrap_or_default());
        let registry = Arc::new(ExecutionRegistry::new());
        let pool = Arc::new(WorkerPool::new(
            config.thread_count,
            Arc::clone(&registry),
            Arc::clone(&event_bus),
        ));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryJobStore::new()));

        tracing::debug!(
            instance_name = %config.instance_name,
            instance_id = %config.instance_id,
            thread_count = config.thread_count,
            "Scheduler created"
        );

        Ok(Scheduler {
            inner: Arc::new(Inner {
                config,
                lifecycle: RwLock::new(Lifecycle {
                    state: SchedulerState::Created,
                    handle: None,
                    task: None,
                    running_since: None,
                }),
                queue: Arc::new(Mutex::new(TriggerQueue::new())),
                pool,
                registry,
                store,
                event_bus,
                halted: watch::channel(false).0,
            }),
        })
    }
}

impl Default for SchedulerFactory {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

struct Lifecycle {
    state: SchedulerState,
    handle: Option<LoopHandle>,
    task: Option<JoinHandle<()>>,
    running_since: Option<DateTime<Utc>>,
}

impl Lifecycle {
    fn ensure_started(&self) -> Result<&LoopHandle, SchedulerError> {
        match (self.state, &self.handle) {
            (SchedulerState::Started, Some(handle)) => Ok(handle),
            (SchedulerState::Stopped, _) => Err(SchedulerError::AlreadyStopped),
            _ => Err(SchedulerError::NotStarted),
        }
    }
}

struct Inner {
    config: SchedulerConfig,
    /// Guards state transitions; scheduling holds it shared.
    lifecycle: RwLock<Lifecycle>,
    queue: Arc<Mutex<TriggerQueue>>,
    pool: Arc<WorkerPool>,
    registry: Arc<ExecutionRegistry>,
    store: Arc<dyn JobStore>,
    event_bus: Arc<EventBus>,
    /// Set once shutdown has halted the loop and applied the interrupt policy.
    halted: watch::Sender<bool>,
}

/// An in-process job scheduler.
///
/// Cheap to clone; clones share the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Build a scheduler from a configuration with an in-memory job store.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        SchedulerFactory::new(config).build()
    }

    /// Scheduler name.
    pub fn instance_name(&self) -> &str {
        &self.inner.config.instance_name
    }

    /// Resolved instance id.
    pub fn instance_id(&self) -> &str {
        &self.inner.config.instance_id
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    /// Start firing triggers.
    ///
    /// Loads stored jobs and triggers, then spawns the firing loop. Starting
    /// a started scheduler does nothing; a stopped one cannot be restarted.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut life = self.inner.lifecycle.write().await;
        match life.state {
            SchedulerState::Started => return Ok(()),
            SchedulerState::Stopped => return Err(SchedulerError::AlreadyStopped),
            SchedulerState::Created => {}
        }

        let loaded = self.load_from_store().await?;

        let (handle, commands) = LoopHandle::channel();
        let firing = FiringLoop::new(
            self.inner.config.instance_id.clone(),
            Arc::clone(&self.inner.queue),
            Arc::clone(&self.inner.pool),
            Arc::clone(&self.inner.store),
            Arc::clone(&self.inner.event_bus),
            self.inner.config.idle_wait(),
            self.inner.config.misfire_threshold(),
        );
        life.task = Some(tokio::spawn(firing.run(commands)));
        life.handle = Some(handle);
        life.state = SchedulerState::Started;
        life.running_since = Some(Utc::now());
        drop(life);

        tracing::info!(
            instance_name = %self.inner.config.instance_name,
            instance_id = %self.inner.config.instance_id,
            thread_count = self.inner.config.thread_count,
            triggers_loaded = loaded,
            "Scheduler started"
        );
        self.inner
            .event_bus
            .emit(Event::scheduler_started(self.instance_id()))
            .await;
        Ok(())
    }

    /// Load stored jobs and triggers into the queue. Returns the number of
    /// triggers queued.
    async fn load_from_store(&self) -> Result<usize, SchedulerError> {
        let jobs = self.inner.store.load_jobs().await?;
        let pairs = self.inner.store.load_all_triggers().await?;

        let mut queue = self.inner.queue.lock().await;
        for job in jobs {
            queue.add_job(job, true)?;
        }

        let mut loaded = 0;
        for (job, trigger) in pairs {
            let trigger_key = trigger.key().clone();
            queue.add_job(job, true)?;
            match queue.add(trigger) {
                Ok(_) => loaded += 1,
                Err(e) => {
                    tracing::warn!(trigger = %trigger_key, error = %e, "Skipping stored trigger");
                }
            }
        }
        Ok(loaded)
    }

    /// Schedule a job with its trigger. Returns the first fire time.
    ///
    /// A trigger built without a job is bound to `job`.
    pub async fn schedule_job(
        &self,
        job: JobDetail,
        mut trigger: Trigger,
    ) -> Result<DateTime<Utc>, SchedulerError> {
        let life = self.inner.lifecycle.read().await;
        let handle = life.ensure_started()?;

        match trigger.job_key() {
            None => trigger.bind(job.key().clone()),
            Some(bound) if bound != job.key() => {
                return Err(SchedulerError::InvalidTrigger(format!(
                    "trigger {} fires job {}, not {}",
                    trigger.key(),
                    bound,
                    job.key()
                )));
            }
            Some(_) => {}
        }

        let mut queue = self.inner.queue.lock().await;
        if queue.job(job.key()).is_some() {
            return Err(SchedulerError::JobAlreadyExists(job.key().clone()));
        }
        if queue.trigger(trigger.key()).is_some() {
            return Err(SchedulerError::TriggerAlreadyExists(trigger.key().clone()));
        }

        self.inner
            .store
            .store_job_and_trigger(job.clone(), trigger.clone())
            .await?;

        let job_key = job.key().clone();
        let trigger_key = trigger.key().clone();
        queue.add_job(job, false)?;
        let first = match queue.add(trigger) {
            Ok(first) => first,
            Err(e) => {
                queue.remove_job(&job_key);
                self.forget_job(&job_key).await;
                return Err(e.into());
            }
        };
        drop(queue);
        handle.wake();

        tracing::info!(job = %job_key, trigger = %trigger_key, first_fire_time = %first, "Job scheduled");
        Ok(first)
    }

    /// Schedule a trigger for a job that is already stored. Returns the first
    /// fire time.
    pub async fn schedule_trigger(&self, trigger: Trigger) -> Result<DateTime<Utc>, SchedulerError> {
        let life = self.inner.lifecycle.read().await;
        let handle = life.ensure_started()?;

        let job_key = trigger.job_key().cloned().ok_or_else(|| {
            SchedulerError::InvalidTrigger(format!("trigger {} is not bound to a job", trigger.key()))
        })?;

        let mut queue = self.inner.queue.lock().await;
        if queue.job(&job_key).is_none() {
            return Err(SchedulerError::UnknownJob(job_key));
        }
        if queue.trigger(trigger.key()).is_some() {
            return Err(SchedulerError::TriggerAlreadyExists(trigger.key().clone()));
        }

        self.inner.store.store_trigger(trigger.clone()).await?;

        let trigger_key = trigger.key().clone();
        let first = match queue.add(trigger) {
            Ok(first) => first,
            Err(e) => {
                self.forget_trigger(&trigger_key).await;
                return Err(e.into());
            }
        };
        drop(queue);
        handle.wake();

        tracing::info!(job = %job_key, trigger = %trigger_key, first_fire_time = %first, "Trigger scheduled");
        Ok(first)
    }

    /// Store a durable job without scheduling it.
    ///
    /// With `replace` an existing job of the same key is overwritten.
    pub async fn add_job(&self, job: JobDetail, replace: bool) -> Result<(), SchedulerError> {
        let life = self.inner.lifecycle.read().await;
        life.ensure_started()?;

        if !job.is_durable() {
            return Err(SchedulerError::InvalidJob(format!(
                "job {} has no trigger and is not durable",
                job.key()
            )));
        }

        let mut queue = self.inner.queue.lock().await;
        if !replace && queue.job(job.key()).is_some() {
            return Err(SchedulerError::JobAlreadyExists(job.key().clone()));
        }
        self.inner.store.store_job(job.clone(), replace).await?;

        let job_key = job.key().clone();
        queue.add_job(job, replace)?;
        tracing::info!(job = %job_key, "Job added");
        Ok(())
    }

    /// Fire a stored job now, once, with extra data layered over the job's.
    ///
    /// Returns the key of the one-shot trigger used.
    pub async fn trigger_job(
        &self,
        job_key: &JobKey,
        data: JobDataMap,
    ) -> Result<TriggerKey, SchedulerError> {
        let life = self.inner.lifecycle.read().await;
        let handle = life.ensure_started()?;

        let trigger = TriggerBuilder::new()
            .for_job_key(job_key.clone())
            .with_data_map(data)
            .start_now()
            .build()?;
        let trigger_key = trigger.key().clone();

        let mut queue = self.inner.queue.lock().await;
        if queue.job(job_key).is_none() {
            return Err(SchedulerError::UnknownJob(job_key.clone()));
        }
        self.inner.store.store_trigger(trigger.clone()).await?;
        if let Err(e) = queue.add(trigger) {
            self.forget_trigger(&trigger_key).await;
            return Err(e.into());
        }
        drop(queue);
        handle.wake();

        tracing::info!(job = %job_key, trigger = %trigger_key, "Job triggered");
        Ok(trigger_key)
    }

    /// Remove a trigger. Returns false if it was not scheduled.
    ///
    /// A non-durable job left without triggers is removed with it.
    pub async fn unschedule_job(&self, trigger_key: &TriggerKey) -> Result<bool, SchedulerError> {
        let life = self.inner.lifecycle.read().await;
        let handle = life.ensure_started()?;

        let removed = self.inner.queue.lock().await.remove(trigger_key);
        if removed {
            self.forget_trigger(trigger_key).await;
            handle.wake();
            tracing::info!(trigger = %trigger_key, "Trigger unscheduled");
        }
        Ok(removed)
    }

    /// Remove a job and all its triggers. Returns false if it was not stored.
    ///
    /// Running executions of the job are not affected.
    pub async fn delete_job(&self, job_key: &JobKey) -> Result<bool, SchedulerError> {
        let life = self.inner.lifecycle.read().await;
        let handle = life.ensure_started()?;

        let removed = self.inner.queue.lock().await.remove_job(job_key);
        if removed {
            self.forget_job(job_key).await;
            handle.wake();
            tracing::info!(job = %job_key, "Job deleted");
        }
        Ok(removed)
    }

    /// Look up a stored job.
    pub async fn get_job(&self, job_key: &JobKey) -> Option<JobDetail> {
        self.inner.queue.lock().await.job(job_key).cloned()
    }

    /// Look up a scheduled trigger.
    pub async fn get_trigger(&self, trigger_key: &TriggerKey) -> Option<Trigger> {
        self.inner.queue.lock().await.trigger(trigger_key).cloned()
    }

    /// Scheduled triggers of a job, in firing order.
    pub async fn triggers_of_job(&self, job_key: &JobKey) -> Vec<Trigger> {
        self.inner
            .queue
            .lock()
            .await
            .triggers_of_job(job_key)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Snapshot of the executions running now, in dispatch order.
    pub async fn currently_executing_jobs(&self) -> Vec<FireInstanceInfo> {
        self.inner.registry.list().await
    }

    /// Interrupt a running execution.
    ///
    /// Returns true if the execution was found and supports interruption.
    /// Use [`try_interrupt`](Self::try_interrupt) to tell the failures apart.
    pub async fn interrupt(&self, id: &FireInstanceId) -> bool {
        match self.try_interrupt(id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(fire_instance_id = %id, error = %e, "Interrupt not delivered");
                false
            }
        }
    }

    /// Interrupt a running execution, reporting why it failed.
    pub async fn try_interrupt(&self, id: &FireInstanceId) -> Result<(), SchedulerError> {
        self.inner.pool.interrupt(id).await?;
        Ok(())
    }

    /// Interrupt every running execution of a job. Returns how many were
    /// signalled.
    pub async fn interrupt_job(&self, job_key: &JobKey) -> usize {
        self.inner.pool.interrupt_job(job_key).await
    }

    /// Shut the scheduler down.
    ///
    /// Stops the firing loop, interrupts running jobs if configured to, and
    /// with `wait` returns only once every running execution has finished.
    /// Calling it again has no further effect, but still honours `wait`.
    pub async fn shutdown(&self, wait: bool) -> Result<(), SchedulerError> {
        let mut life = self.inner.lifecycle.write().await;
        if life.state == SchedulerState::Stopped {
            drop(life);
            if wait {
                let mut halted = self.inner.halted.subscribe();
                // The sender lives in `self`, so the channel cannot close here.
                let _ = halted.wait_for(|done| *done).await;
                self.inner.registry.wait_until_empty().await;
            }
            return Ok(());
        }
        life.state = SchedulerState::Stopped;
        let handle = life.handle.take();
        let task = life.task.take();
        drop(life);

        tracing::info!(instance_id = %self.instance_id(), wait, "Scheduler shutting down");

        if let Some(handle) = handle {
            if let Err(e) = handle.halt().await {
                tracing::warn!(error = %e, "Firing loop did not acknowledge halt");
            }
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Firing loop ended abnormally");
            }
        }

        if self.inner.config.interrupt_jobs_on_shutdown {
            let signalled = self.inner.pool.interrupt_all().await;
            tracing::info!(signalled, "Interrupted running jobs for shutdown");
        }
        self.inner.halted.send_replace(true);

        if wait {
            let running = self.inner.registry.len().await;
            if running > 0 {
                tracing::info!(running, "Waiting for running jobs to complete");
            }
            self.inner.registry.wait_until_empty().await;
        }

        self.inner
            .event_bus
            .emit(Event::scheduler_shutdown(self.instance_id()))
            .await;
        tracing::info!(instance_id = %self.instance_id(), "Scheduler shut down");
        Ok(())
    }

    /// Remove every job and trigger. Running executions are not affected.
    pub async fn clear(&self) -> Result<(), SchedulerError> {
        let life = self.inner.lifecycle.read().await;
        let handle = life.ensure_started()?;

        self.inner.queue.lock().await.clear();
        self.inner.store.clear().await?;
        handle.wake();

        tracing::info!("Scheduler cleared");
        Ok(())
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SchedulerState {
        self.inner.lifecycle.read().await.state
    }

    /// Whether the scheduler is started.
    pub async fn is_started(&self) -> bool {
        self.state().await == SchedulerState::Started
    }

    /// Whether the scheduler has been shut down.
    pub async fn is_shutdown(&self) -> bool {
        self.state().await == SchedulerState::Stopped
    }

    /// Summary of this scheduler.
    pub async fn metadata(&self) -> SchedulerMetaData {
        let (state, running_since) = {
            let life = self.inner.lifecycle.read().await;
            (life.state, life.running_since)
        };
        SchedulerMetaData {
            instance_name: self.inner.config.instance_name.clone(),
            instance_id: self.inner.config.instance_id.clone(),
            thread_pool_size: self.inner.pool.size(),
            state,
            running_since,
            jobs_executed: self.inner.pool.jobs_executed(),
            currently_executing: self.inner.registry.len().await,
            interrupt_jobs_on_shutdown: self.inner.config.interrupt_jobs_on_shutdown,
        }
    }

    async fn forget_trigger(&self, trigger_key: &TriggerKey) {
        if let Err(e) = self.inner.store.remove_trigger(trigger_key).await {
            tracing::warn!(trigger = %trigger_key, error = %e, "Failed to remove trigger from store");
        }
    }

    async fn forget_job(&self, job_key: &JobKey) {
        if let Err(e) = self.inner.store.remove_job(job_key).await {
            tracing::warn!(job = %job_key, error = %e, "Failed to remove job from store");
        }
    }
}
