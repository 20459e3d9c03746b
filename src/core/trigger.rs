//! Triggers and their firing policies.
//!
//! A [`Trigger`] describes when a job runs: it fires first at its start
//! time, then follows its [`Schedule`] until the schedule is exhausted or
//! the optional end time is passed. Triggers are deliberately simple: one
//! shot, or a fixed interval repeated a number of times or forever.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::context::JobDataMap;
use super::job::JobDetail;
use super::types::{JobKey, TriggerKey};

/// Errors that can occur when building a trigger.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// A repeating schedule needs an interval of at least one millisecond,
    /// in whole microseconds.
    #[error("repeat interval must be at least 1ms in whole microseconds, got {0:?}")]
    InvalidInterval(Duration),

    /// The end time lies before the start time.
    #[error("end time {end} is before start time {start}")]
    EndBeforeStart {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// How many times a repeating trigger fires after its first firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatCount {
    /// Repeat this many times (so the trigger fires `n + 1` times in total).
    Times(u32),
    /// Repeat until the end time, if any.
    Forever,
}

/// Firing policy of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Schedule {
    /// Fire once at the start time.
    #[default]
    Once,
    /// Fire at the start time and then every `interval`.
    Repeat {
        interval: Duration,
        count: RepeatCount,
    },
}

impl Schedule {
    /// Fire once.
    pub fn once() -> Self {
        Schedule::Once
    }

    /// Fire every `interval` until the trigger's end time.
    pub fn repeat_forever(interval: Duration) -> Self {
        Schedule::Repeat {
            interval,
            count: RepeatCount::Forever,
        }
    }

    /// Fire once and then repeat `times` more times every `interval`.
    pub fn repeat(interval: Duration, times: u32) -> Self {
        Schedule::Repeat {
            interval,
            count: RepeatCount::Times(times),
        }
    }
}

/// A trigger bound (or to be bound) to a job.
#[derive(Debug, Clone)]
pub struct Trigger {
    key: TriggerKey,
    job_key: Option<JobKey>,
    description: Option<String>,
    data: JobDataMap,
    schedule: Schedule,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    next_fire_time: Option<DateTime<Utc>>,
    previous_fire_time: Option<DateTime<Utc>>,
    times_triggered: u32,
}

impl Trigger {
    /// Get the trigger key.
    pub fn key(&self) -> &TriggerKey {
        &self.key
    }

    /// Get the key of the job this trigger fires, if bound.
    pub fn job_key(&self) -> Option<&JobKey> {
        self.job_key.as_ref()
    }

    /// Get the description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Get the trigger's job data.
    pub fn data(&self) -> &JobDataMap {
        &self.data
    }

    /// Get the firing policy.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Get the start time.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Get the end time, if any.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Get the next fire time. `None` once the trigger is exhausted.
    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    /// Get the previous fire time, if the trigger has fired.
    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    /// Number of times this trigger has fired.
    pub fn times_triggered(&self) -> u32 {
        self.times_triggered
    }

    /// Bind the trigger to a job.
    pub(crate) fn bind(&mut self, job_key: JobKey) {
        self.job_key = Some(job_key);
    }

    /// Compute and store the first fire time.
    ///
    /// Returns `None` if the trigger would never fire.
    pub fn compute_first_fire_time(&mut self) -> Option<DateTime<Utc>> {
        self.next_fire_time = self.within_end(self.start_time);
        self.next_fire_time
    }

    /// The first fire time strictly after `after`, following the schedule.
    pub fn fire_time_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if after < self.start_time {
            return self.within_end(self.start_time);
        }

        match self.schedule {
            Schedule::Once => None,
            Schedule::Repeat { interval, count } => {
                let interval_us = i64::try_from(interval.as_micros()).ok()?;
                if interval_us <= 0 {
                    return None;
                }
                let elapsed_us = (after - self.start_time).num_microseconds()?;
                let occurrence = elapsed_us / interval_us + 1;
                if let RepeatCount::Times(times) = count {
                    if occurrence > i64::from(times) {
                        return None;
                    }
                }
                let offset = TimeDelta::microseconds(occurrence.checked_mul(interval_us)?);
                let next = self.start_time.checked_add_signed(offset)?;
                self.within_end(next)
            }
        }
    }

    /// Record a firing and advance to the next fire time.
    ///
    /// Returns the fire time that was consumed, or `None` if the trigger had
    /// nothing left to fire.
    pub fn triggered(&mut self) -> Option<DateTime<Utc>> {
        let fired = self.next_fire_time?;
        self.previous_fire_time = Some(fired);
        self.times_triggered = self.times_triggered.saturating_add(1);
        self.next_fire_time = self.fire_time_after(fired);
        Some(fired)
    }

    /// Move the next fire time past `now`, dropping occurrences already missed.
    ///
    /// Returns true if any occurrence was skipped.
    pub fn skip_missed(&mut self, now: DateTime<Utc>) -> bool {
        match self.next_fire_time {
            Some(next) if next < now => {
                self.next_fire_time = self.fire_time_after(now);
                true
            }
            _ => false,
        }
    }

    /// Whether the trigger will fire again.
    pub fn may_fire_again(&self) -> bool {
        self.next_fire_time.is_some()
    }

    fn within_end(&self, time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.end_time {
            Some(end) if time > end => None,
            _ => Some(time),
        }
    }
}

/// Builder for [`Trigger`].
#[derive(Debug, Default)]
pub struct TriggerBuilder {
    key: Option<TriggerKey>,
    job_key: Option<JobKey>,
    description: Option<String>,
    data: JobDataMap,
    schedule: Schedule,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl TriggerBuilder {
    /// Create a builder for a one-shot trigger starting now.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the trigger identity. Without one a unique name is generated.
    pub fn with_identity(mut self, key: impl Into<TriggerKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Bind the trigger to a job.
    pub fn for_job(self, job: &JobDetail) -> Self {
        self.for_job_key(job.key().clone())
    }

    /// Bind the trigger to a job by key.
    pub fn for_job_key(mut self, key: impl Into<JobKey>) -> Self {
        self.job_key = Some(key.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a single data value, overriding the job's value for the same key.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert_raw(key, value);
        self
    }

    /// Replace the trigger data.
    pub fn with_data_map(mut self, data: JobDataMap) -> Self {
        self.data = data;
        self
    }

    /// Set the firing policy.
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Start firing as soon as the trigger is scheduled.
    pub fn start_now(mut self) -> Self {
        self.start_time = None;
        self
    }

    /// Start firing at the given time.
    pub fn start_at(mut self, time: DateTime<Utc>) -> Self {
        self.start_time = Some(time);
        self
    }

    /// Start firing after the given delay.
    pub fn start_after(self, delay: Duration) -> Self {
        let start = TimeDelta::from_std(delay)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.start_at(start)
    }

    /// Stop firing after the given time.
    pub fn end_at(mut self, time: DateTime<Utc>) -> Self {
        self.end_time = Some(time);
        self
    }

    /// Build the trigger.
    pub fn build(self) -> Result<Trigger, TriggerError> {
        if let Schedule::Repeat { interval, .. } = self.schedule {
            if interval.as_millis() == 0
                || interval.subsec_nanos() % 1_000 != 0
                || i64::try_from(interval.as_micros()).is_err()
            {
                return Err(TriggerError::InvalidInterval(interval));
            }
        }

        let start_time = self.start_time.unwrap_or_else(Utc::now);
        if let Some(end) = self.end_time {
            if end < start_time {
                return Err(TriggerError::EndBeforeStart {
                    start: start_time,
                    end,
                });
            }
        }

        Ok(Trigger {
            key: self.key.unwrap_or_else(TriggerKey::unique),
            job_key: self.job_key,
            description: self.description,
            data: self.data,
            schedule: self.schedule,
            start_time,
            end_time: self.end_time,
            next_fire_time: None,
            previous_fire_time: None,
            times_triggered: 0,
        })
    }
}
