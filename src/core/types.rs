//! Core identifier types for the scheduler.
//!
//! These types provide type-safe identities for jobs, triggers, and the
//! individual executions (fire instances) a trigger produces.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Group used when a key is created without an explicit group.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Unique identity of a job: a name within a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    name: String,
    group: String,
}

/// Unique identity of a trigger: a name within a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    name: String,
    group: String,
}

/// Unique identifier of one concrete execution of a job.
///
/// Generated by the firing loop at dispatch time and never reused for the
/// lifetime of the scheduler that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FireInstanceId(String);

impl JobKey {
    /// Create a key in the default group.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_group(name, DEFAULT_GROUP)
    }

    /// Create a key in the given group.
    pub fn with_group(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// Get the name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the group.
    pub fn group(&self) -> &str {
        &self.group
    }
}

impl From<&str> for JobKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for JobKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl TriggerKey {
    /// Create a key in the default group.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_group(name, DEFAULT_GROUP)
    }

    /// Create a key in the given group.
    pub fn with_group(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// Create a key with a random, unique name in the default group.
    pub fn unique() -> Self {
        Self::new(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Get the name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the group.
    pub fn group(&self) -> &str {
        &self.group
    }
}

impl From<&str> for TriggerKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TriggerKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl FireInstanceId {
    /// Create a fire instance id from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build the id for the `sequence`-th dispatch of a scheduler instance.
    pub(crate) fn for_dispatch(instance_id: &str, sequence: u64) -> Self {
        Self(format!("{}-{}", instance_id, sequence))
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FireInstanceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for FireInstanceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

impl fmt::Display for FireInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
