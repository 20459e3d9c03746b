//! Pending triggers ordered by next fire time.
//!
//! The queue owns the registered jobs and the triggers waiting to fire.
//! Triggers are ordered by `(next fire time, insertion sequence)`, so two
//! triggers due at the same instant come out in the order they were added.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

use crate::core::job::JobDetail;
use crate::core::trigger::Trigger;
use crate::core::types::{JobKey, TriggerKey};

/// Errors that can occur when modifying the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The trigger references a job that is not stored.
    #[error("job not found: {0}")]
    MissingJob(JobKey),

    /// The trigger is not bound to any job.
    #[error("trigger is not bound to a job: {0}")]
    Unbound(TriggerKey),

    /// A job with this key is already stored.
    #[error("job already exists: {0}")]
    JobExists(JobKey),

    /// A trigger with this key is already queued.
    #[error("trigger already exists: {0}")]
    TriggerExists(TriggerKey),

    /// The trigger has no fire time left.
    #[error("trigger will never fire: {0}")]
    NeverFires(TriggerKey),
}

/// A trigger taken off the queue because it is due.
#[derive(Debug, Clone)]
pub struct DueTrigger {
    /// The trigger, not yet advanced.
    pub trigger: Trigger,
    /// The job it fires.
    pub job: JobDetail,
    seq: u64,
}

type OrderKey = (DateTime<Utc>, u64, TriggerKey);

/// Jobs and their pending triggers.
#[derive(Debug, Default)]
pub struct TriggerQueue {
    jobs: HashMap<JobKey, JobDetail>,
    triggers: HashMap<TriggerKey, (Trigger, u64)>,
    order: BTreeSet<OrderKey>,
    next_seq: u64,
}

impl TriggerQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a job.
    ///
    /// With `replace` an existing job of the same key is overwritten and its
    /// triggers are kept.
    pub fn add_job(&mut self, job: JobDetail, replace: bool) -> Result<(), QueueError> {
        if !replace && self.jobs.contains_key(job.key()) {
            return Err(QueueError::JobExists(job.key().clone()));
        }
        self.jobs.insert(job.key().clone(), job);
        Ok(())
    }

    /// Queue a trigger for a stored job and return its next fire time.
    ///
    /// A trigger that has never fired gets its first fire time computed here.
    pub fn add(&mut self, mut trigger: Trigger) -> Result<DateTime<Utc>, QueueError> {
        let job_key = trigger
            .job_key()
            .ok_or_else(|| QueueError::Unbound(trigger.key().clone()))?;
        if !self.jobs.contains_key(job_key) {
            return Err(QueueError::MissingJob(job_key.clone()));
        }
        if self.triggers.contains_key(trigger.key()) {
            return Err(QueueError::TriggerExists(trigger.key().clone()));
        }

        let next = match trigger.next_fire_time() {
            Some(next) => Some(next),
            None if trigger.times_triggered() == 0 => trigger.compute_first_fire_time(),
            None => None,
        };
        let next = next.ok_or_else(|| QueueError::NeverFires(trigger.key().clone()))?;

        let seq = self.take_seq();
        self.insert(trigger, next, seq);
        Ok(next)
    }

    /// Remove and return up to `max` triggers due at or before `now`.
    ///
    /// Triggers come out in fire-time order, FIFO among equal times. Anything
    /// beyond `max` stays queued.
    pub fn pop_due(&mut self, now: DateTime<Utc>, max: usize) -> Vec<DueTrigger> {
        let mut due = Vec::new();
        while due.len() < max {
            let is_due = matches!(self.order.first(), Some((time, _, _)) if *time <= now);
            if !is_due {
                break;
            }
            let Some((_, seq, key)) = self.order.pop_first() else {
                break;
            };
            let Some((trigger, _)) = self.triggers.remove(&key) else {
                continue;
            };
            let job = trigger.job_key().and_then(|k| self.jobs.get(k)).cloned();
            match job {
                Some(job) => due.push(DueTrigger { trigger, job, seq }),
                None => tracing::warn!(trigger = %key, "Dropping trigger whose job is gone"),
            }
        }
        due
    }

    /// Put back a trigger that was popped but not dispatched.
    ///
    /// It keeps its fire time and its place among triggers due at that time.
    pub fn restore(&mut self, due: DueTrigger) -> Result<(), QueueError> {
        let DueTrigger { trigger, job, seq } = due;
        let next = trigger
            .next_fire_time()
            .ok_or_else(|| QueueError::NeverFires(trigger.key().clone()))?;
        if !self.jobs.contains_key(job.key()) {
            return Err(QueueError::MissingJob(job.key().clone()));
        }
        if self.triggers.contains_key(trigger.key()) {
            return Err(QueueError::TriggerExists(trigger.key().clone()));
        }
        self.insert(trigger, next, seq);
        Ok(())
    }

    /// Re-queue a trigger that has just fired, behind anything already queued
    /// for the same time.
    ///
    /// A trigger with no fire time left is retired instead. Returns the next
    /// fire time, or `None` if the trigger was retired.
    pub(crate) fn requeue(&mut self, trigger: Trigger) -> Option<DateTime<Utc>> {
        let Some(next) = trigger.next_fire_time() else {
            if let Some(job_key) = trigger.job_key() {
                self.finalize(job_key);
            }
            return None;
        };
        let seq = self.take_seq();
        self.insert(trigger, next, seq);
        Some(next)
    }

    /// Drop a non-durable job that has no triggers left.
    ///
    /// Returns true if the job was removed.
    pub fn finalize(&mut self, job_key: &JobKey) -> bool {
        let orphaned = self
            .jobs
            .get(job_key)
            .is_some_and(|job| !job.is_durable())
            && !self.has_triggers(job_key);
        if orphaned {
            self.jobs.remove(job_key);
            tracing::debug!(job = %job_key, "Removed job with no remaining triggers");
        }
        orphaned
    }

    /// Remove a trigger. Returns false if it was not queued.
    pub fn remove(&mut self, key: &TriggerKey) -> bool {
        let Some((trigger, seq)) = self.triggers.remove(key) else {
            return false;
        };
        if let Some(next) = trigger.next_fire_time() {
            self.order.remove(&(next, seq, key.clone()));
        }
        if let Some(job_key) = trigger.job_key() {
            self.finalize(job_key);
        }
        true
    }

    /// Remove a job and all of its triggers. Returns false if it was not stored.
    pub fn remove_job(&mut self, key: &JobKey) -> bool {
        let Some(_) = self.jobs.remove(key) else {
            return false;
        };
        let keys: Vec<TriggerKey> = self
            .triggers
            .iter()
            .filter(|(_, (t, _))| t.job_key() == Some(key))
            .map(|(k, _)| k.clone())
            .collect();
        for trigger_key in keys {
            if let Some((trigger, seq)) = self.triggers.remove(&trigger_key) {
                if let Some(next) = trigger.next_fire_time() {
                    self.order.remove(&(next, seq, trigger_key));
                }
            }
        }
        true
    }

    /// Earliest pending fire time.
    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.order.first().map(|(time, _, _)| *time)
    }

    /// Look up a stored job.
    pub fn job(&self, key: &JobKey) -> Option<&JobDetail> {
        self.jobs.get(key)
    }

    /// Look up a queued trigger.
    pub fn trigger(&self, key: &TriggerKey) -> Option<&Trigger> {
        self.triggers.get(key).map(|(t, _)| t)
    }

    /// Queued triggers of one job, in firing order.
    pub fn triggers_of_job(&self, key: &JobKey) -> Vec<&Trigger> {
        self.order
            .iter()
            .filter_map(|(_, _, k)| self.triggers.get(k))
            .map(|(t, _)| t)
            .filter(|t| t.job_key() == Some(key))
            .collect()
    }

    /// Number of queued triggers.
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    /// Whether no triggers are queued.
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Number of stored jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Remove every job and trigger.
    pub fn clear(&mut self) {
        self.jobs.clear();
        self.triggers.clear();
        self.order.clear();
    }

    fn has_triggers(&self, job_key: &JobKey) -> bool {
        self.triggers
            .values()
            .any(|(t, _)| t.job_key() == Some(job_key))
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn insert(&mut self, trigger: Trigger, next: DateTime<Utc>, seq: u64) {
        let key = trigger.key().clone();
        self.order.insert((next, seq, key.clone()));
        self.triggers.insert(key, (trigger, seq));
    }
}
