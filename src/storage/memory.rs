//! In-memory job store implementation.
//!
//! Provides a thread-safe in-memory backend. Data is not persisted across
//! restarts of the process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{JobStore, StoreError};
use crate::core::job::JobDetail;
use crate::core::trigger::Trigger;
use crate::core::types::{JobKey, TriggerKey};

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobKey, JobDetail>,
    /// Triggers with the sequence they were stored at.
    triggers: HashMap<TriggerKey, (u64, Trigger)>,
    next_seq: u64,
}

impl Inner {
    fn insert_trigger(&mut self, trigger: Trigger) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.triggers.insert(trigger.key().clone(), (seq, trigger));
    }

    fn has_triggers(&self, job_key: &JobKey) -> bool {
        self.triggers
            .values()
            .any(|(_, t)| t.job_key() == Some(job_key))
    }
}

/// In-memory job store.
///
/// A single lock guards jobs and triggers so multi-key updates are atomic.
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
}

impl InMemoryJobStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn bound_job(trigger: &Trigger) -> Result<&JobKey, StoreError> {
    trigger
        .job_key()
        .ok_or_else(|| StoreError::Other(format!("trigger {} is not bound to a job", trigger.key())))
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn store_job(&self, job: JobDetail, replace: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        if !replace && inner.jobs.contains_key(job.key()) {
            return Err(StoreError::DuplicateKey(format!("job: {}", job.key())));
        }
        inner.jobs.insert(job.key().clone(), job);
        Ok(())
    }

    async fn store_job_and_trigger(
        &self,
        job: JobDetail,
        trigger: Trigger,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        if inner.jobs.contains_key(job.key()) {
            return Err(StoreError::DuplicateKey(format!("job: {}", job.key())));
        }
        if inner.triggers.contains_key(trigger.key()) {
            return Err(StoreError::DuplicateKey(format!("trigger: {}", trigger.key())));
        }
        if bound_job(&trigger)? != job.key() {
            return Err(StoreError::Other(format!(
                "trigger {} does not fire job {}",
                trigger.key(),
                job.key()
            )));
        }
        inner.jobs.insert(job.key().clone(), job);
        inner.insert_trigger(trigger);
        Ok(())
    }

    async fn store_trigger(&self, trigger: Trigger) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let job_key = bound_job(&trigger)?;
        if !inner.jobs.contains_key(job_key) {
            return Err(StoreError::NotFound(format!("job: {}", job_key)));
        }
        if inner.triggers.contains_key(trigger.key()) {
            return Err(StoreError::DuplicateKey(format!("trigger: {}", trigger.key())));
        }
        inner.insert_trigger(trigger);
        Ok(())
    }

    async fn remove_trigger(&self, key: &TriggerKey) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let Some((_, trigger)) = inner.triggers.remove(key) else {
            return Ok(false);
        };
        if let Some(job_key) = trigger.job_key() {
            let orphaned = inner
                .jobs
                .get(job_key)
                .is_some_and(|job| !job.is_durable())
                && !inner.has_triggers(job_key);
            if orphaned {
                inner.jobs.remove(job_key);
            }
        }
        Ok(true)
    }

    async fn remove_job(&self, key: &JobKey) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        if inner.jobs.remove(key).is_none() {
            return Ok(false);
        }
        inner.triggers.retain(|_, (_, t)| t.job_key() != Some(key));
        Ok(true)
    }

    async fn load_all_triggers(&self) -> Result<Vec<(JobDetail, Trigger)>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut stored: Vec<_> = inner.triggers.values().collect();
        stored.sort_by_key(|(seq, _)| *seq);

        let pairs = stored
            .into_iter()
            .filter_map(|(_, trigger)| {
                let job = inner.jobs.get(trigger.job_key()?)?;
                Some((job.clone(), trigger.clone()))
            })
            .collect();
        Ok(pairs)
    }

    async fn load_jobs(&self) -> Result<Vec<JobDetail>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut jobs: Vec<_> = inner.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(jobs)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        inner.jobs.clear();
        inner.triggers.clear();
        Ok(())
    }
}
