//! Job store abstraction.
//!
//! The scheduler mirrors every scheduled job and trigger into a [`JobStore`]
//! and reloads them from it when it starts. Only an in-memory backend is
//! provided; the trait is the seam for other backends.

mod memory;

pub use memory::InMemoryJobStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::job::JobDetail;
use crate::core::trigger::Trigger;
use crate::core::types::{JobKey, TriggerKey};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Store lock was poisoned.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// Generic store error.
    #[error("store error: {0}")]
    Other(String),
}

/// Store of jobs and their triggers.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store a job without a trigger.
    ///
    /// Fails with `DuplicateKey` if the job exists and `replace` is false.
    async fn store_job(&self, job: JobDetail, replace: bool) -> Result<(), StoreError>;

    /// Store a job together with its first trigger.
    ///
    /// Fails with `DuplicateKey` if either key is already stored; nothing is
    /// written in that case.
    async fn store_job_and_trigger(
        &self,
        job: JobDetail,
        trigger: Trigger,
    ) -> Result<(), StoreError>;

    /// Store a trigger for a job that is already stored.
    async fn store_trigger(&self, trigger: Trigger) -> Result<(), StoreError>;

    /// Remove a trigger, and its job if that job is non-durable and has no
    /// triggers left. Returns false if the trigger was not stored.
    async fn remove_trigger(&self, key: &TriggerKey) -> Result<bool, StoreError>;

    /// Remove a job and all its triggers. Returns false if it was not stored.
    async fn remove_job(&self, key: &JobKey) -> Result<bool, StoreError>;

    /// Every stored trigger with its job, in the order they were stored.
    async fn load_all_triggers(&self) -> Result<Vec<(JobDetail, Trigger)>, StoreError>;

    /// Every stored job, including durable jobs without triggers.
    async fn load_jobs(&self) -> Result<Vec<JobDetail>, StoreError>;

    /// Remove everything.
    async fn clear(&self) -> Result<(), StoreError>;
}
