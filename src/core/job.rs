//! Job trait, interrupt capability, and job definitions.
//!
//! A [`Job`] is the unit of work the scheduler runs. Jobs are registered as
//! a [`JobDetail`]: an identity plus data plus the body to execute.
//! Interruption is opt-in: a job that can stop early exposes an
//! [`Interruptible`] capability through [`Job::as_interruptible`].

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use super::context::{ContextError, JobDataMap, JobExecutionContext};
use super::types::JobKey;

/// Errors a job body can return.
#[derive(Debug, Error)]
pub enum JobError {
    /// Job execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The job stopped early because it was interrupted.
    #[error("job was interrupted")]
    Interrupted,

    /// Error reading job data.
    #[error("context error: {0}")]
    Context(#[from] ContextError),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// The core trait for defining schedulable jobs.
///
/// # Example
///
/// ```ignore
/// use cadence::{Job, JobError, JobExecutionContext, Interruptible};
/// use async_trait::async_trait;
/// use std::time::Duration;
///
/// struct Poller;
///
/// #[async_trait]
/// impl Job for Poller {
///     async fn execute(&self, ctx: &JobExecutionContext) -> Result<(), JobError> {
///         for _ in 0..100 {
///             if ctx.is_interrupted() {
///                 return Err(JobError::Interrupted);
///             }
///             tokio::time::sleep(Duration::from_millis(50)).await;
///         }
///         Ok(())
///     }
///
///     fn as_interruptible(&self) -> Option<&dyn Interruptible> {
///         Some(self)
///     }
/// }
///
/// impl Interruptible for Poller {
///     fn interrupt(&self) {}
/// }
/// ```
#[async_trait]
pub trait Job: Send + Sync {
    /// Execute the job.
    ///
    /// # Returns
    /// * `Ok(())` - Job completed
    /// * `Err(JobError)` - Job failed; the scheduler records the failure and
    ///   keeps running
    async fn execute(&self, ctx: &JobExecutionContext) -> Result<(), JobError>;

    /// The job's interrupt capability, if it supports interruption.
    ///
    /// Default implementation returns `None`, which makes interrupt requests
    /// for this job fail.
    fn as_interruptible(&self) -> Option<&dyn Interruptible> {
        None
    }
}

/// Capability of a job that can be asked to stop early.
///
/// Interruption is cooperative: the scheduler sets the execution's interrupt
/// flag and then calls [`interrupt`](Self::interrupt). The job is expected to
/// notice and return; nothing is aborted on its behalf.
pub trait Interruptible: Send + Sync {
    /// Hook invoked after the interrupt flag has been set.
    fn interrupt(&self);
}

type JobFactory = dyn Fn() -> Arc<dyn Job> + Send + Sync;

#[derive(Clone)]
enum JobBody {
    /// One body shared by every execution.
    Shared(Arc<dyn Job>),
    /// A fresh body per execution.
    Factory(Arc<JobFactory>),
}

/// A registered job: identity, data, and the body to run.
#[derive(Clone)]
pub struct JobDetail {
    key: JobKey,
    description: Option<String>,
    data: JobDataMap,
    durable: bool,
    body: JobBody,
}

impl std::fmt::Debug for JobDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDetail")
            .field("key", &self.key)
            .field("description", &self.description)
            .field("durable", &self.durable)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

impl JobDetail {
    /// Get the job key.
    pub fn key(&self) -> &JobKey {
        &self.key
    }

    /// Get the description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Get the job data.
    pub fn data(&self) -> &JobDataMap {
        &self.data
    }

    /// Whether the job stays registered once it has no triggers left.
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Produce the body for one execution.
    pub fn instantiate(&self) -> Arc<dyn Job> {
        match &self.body {
            JobBody::Shared(job) => Arc::clone(job),
            JobBody::Factory(factory) => factory(),
        }
    }
}

/// Builder for [`JobDetail`].
pub struct JobBuilder {
    key: Option<JobKey>,
    description: Option<String>,
    data: JobDataMap,
    durable: bool,
    body: JobBody,
}

impl JobBuilder {
    /// Build a job whose body is shared by every execution.
    pub fn new(job: impl Job + 'static) -> Self {
        Self::from_arc(Arc::new(job))
    }

    /// Build a job from an already shared body.
    pub fn from_arc(job: Arc<dyn Job>) -> Self {
        Self::with_body(JobBody::Shared(job))
    }

    /// Build a job that creates a fresh body for every execution.
    pub fn from_factory<F, J>(factory: F) -> Self
    where
        F: Fn() -> J + Send + Sync + 'static,
        J: Job + 'static,
    {
        Self::with_body(JobBody::Factory(Arc::new(move || {
            Arc::new(factory()) as Arc<dyn Job>
        })))
    }

    fn with_body(body: JobBody) -> Self {
        Self {
            key: None,
            description: None,
            data: JobDataMap::new(),
            durable: false,
            body,
        }
    }

    /// Set the job identity. Without one a unique name is generated.
    pub fn with_identity(mut self, key: impl Into<JobKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a single data value.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert_raw(key, value);
        self
    }

    /// Replace the job data.
    pub fn with_data_map(mut self, data: JobDataMap) -> Self {
        self.data = data;
        self
    }

    /// Keep the job registered after its last trigger is gone.
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Build the job detail.
    pub fn build(self) -> JobDetail {
        JobDetail {
            key: self
                .key
                .unwrap_or_else(|| JobKey::new(uuid::Uuid::new_v4().simple().to_string())),
            description: self.description,
            data: self.data,
            durable: self.durable,
            body: self.body,
        }
    }
}
