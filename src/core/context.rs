//! Job data and execution context.
//!
//! Jobs receive their inputs through a [`JobDataMap`]: a string-keyed map of
//! JSON values attached to a job and, optionally, to the trigger that fires
//! it. At dispatch the two are merged (trigger entries win) into the
//! [`JobExecutionContext`] handed to the job body.
//!
//! The context also carries the cooperative interrupt flag for the execution.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::types::{FireInstanceId, JobKey, TriggerKey};

/// Errors that can occur when reading or writing job data.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Key was not found in the data map.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Failed to deserialize a value.
    #[error("deserialization error for key '{key}': {message}")]
    DeserializationError { key: String, message: String },

    /// Failed to serialize a value.
    #[error("serialization error for key '{key}': {message}")]
    SerializationError { key: String, message: String },
}

/// String-keyed job data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobDataMap {
    entries: HashMap<String, Value>,
}

impl JobDataMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a typed value by key.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, ContextError> {
        let value = self
            .entries
            .get(key)
            .ok_or_else(|| ContextError::KeyNotFound(key.to_string()))?;
        serde_json::from_value(value.clone()).map_err(|e| ContextError::DeserializationError {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// Get a typed value, or `None` if it is missing or has the wrong shape.
    pub fn get_optional<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.entries.get(key)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Get the raw JSON value for a key.
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Serialize and store a value.
    pub fn insert<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> Result<(), ContextError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| ContextError::SerializationError {
            key: key.clone(),
            message: e.to_string(),
        })?;
        self.entries.insert(key, value);
        Ok(())
    }

    /// Store a raw JSON value.
    pub fn insert_raw(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Remove a key, returning its value if present.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Check whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys in the map.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Return a new map with `overlay`'s entries written over this one's.
    pub fn merged_with(&self, overlay: &JobDataMap) -> JobDataMap {
        let mut merged = self.clone();
        for (key, value) in &overlay.entries {
            merged.entries.insert(key.clone(), value.clone());
        }
        merged
    }
}

impl From<HashMap<String, Value>> for JobDataMap {
    fn from(entries: HashMap<String, Value>) -> Self {
        Self { entries }
    }
}

impl FromIterator<(String, Value)> for JobDataMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Context handed to a job body for one execution.
///
/// Cloning is cheap and every clone observes the same interrupt flag.
#[derive(Debug, Clone)]
pub struct JobExecutionContext {
    fire_instance_id: FireInstanceId,
    job_key: JobKey,
    trigger_key: TriggerKey,
    data: JobDataMap,
    fire_time: DateTime<Utc>,
    scheduled_fire_time: DateTime<Utc>,
    previous_fire_time: Option<DateTime<Utc>>,
    next_fire_time: Option<DateTime<Utc>>,
    interrupt: CancellationToken,
}

impl JobExecutionContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        fire_instance_id: FireInstanceId,
        job_key: JobKey,
        trigger_key: TriggerKey,
        data: JobDataMap,
        fire_time: DateTime<Utc>,
        scheduled_fire_time: DateTime<Utc>,
        previous_fire_time: Option<DateTime<Utc>>,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            fire_instance_id,
            job_key,
            trigger_key,
            data,
            fire_time,
            scheduled_fire_time,
            previous_fire_time,
            next_fire_time,
            interrupt: CancellationToken::new(),
        }
    }

    /// Id of this execution.
    pub fn fire_instance_id(&self) -> &FireInstanceId {
        &self.fire_instance_id
    }

    /// Key of the job being executed.
    pub fn job_key(&self) -> &JobKey {
        &self.job_key
    }

    /// Key of the trigger that fired.
    pub fn trigger_key(&self) -> &TriggerKey {
        &self.trigger_key
    }

    /// Job data merged with the trigger's data.
    pub fn data(&self) -> &JobDataMap {
        &self.data
    }

    /// When the job actually started.
    pub fn fire_time(&self) -> DateTime<Utc> {
        self.fire_time
    }

    /// When the trigger was scheduled to fire.
    pub fn scheduled_fire_time(&self) -> DateTime<Utc> {
        self.scheduled_fire_time
    }

    /// The trigger's previous fire time, if it fired before.
    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    /// The trigger's next fire time, if it will fire again.
    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    /// Whether an interrupt has been requested for this execution.
    ///
    /// Interruptible jobs are expected to poll this at safe points.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// Completes once an interrupt has been requested.
    pub async fn interrupted(&self) {
        self.interrupt.cancelled().await
    }

    pub(crate) fn interrupt_token(&self) -> &CancellationToken {
        &self.interrupt
    }
}
