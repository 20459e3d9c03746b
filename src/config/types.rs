//! Scheduler configuration.
//!
//! Configuration comes from YAML or from flat `key = value` properties:
//!
//! ```text
//! scheduler.instanceName = TestScheduler
//! scheduler.instanceId = AUTO
//! threadPool.threadCount = 2
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::error::ConfigError;

/// Instance id value that asks for a generated id.
pub const AUTO_INSTANCE_ID: &str = "AUTO";

const KEY_INSTANCE_NAME: &str = "scheduler.instanceName";
const KEY_INSTANCE_ID: &str = "scheduler.instanceId";
const KEY_THREAD_COUNT: &str = "threadPool.threadCount";
const KEY_IDLE_WAIT: &str = "scheduler.idleWaitTime";
const KEY_MISFIRE_THRESHOLD: &str = "jobStore.misfireThreshold";
const KEY_INTERRUPT_ON_SHUTDOWN: &str = "scheduler.interruptJobsOnShutdown";

/// Configuration of one scheduler instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name of the scheduler.
    pub instance_name: String,
    /// Instance id; [`AUTO_INSTANCE_ID`] generates one when the scheduler is built.
    pub instance_id: String,
    /// Number of worker slots.
    pub thread_count: usize,
    /// Longest time the firing loop sleeps when nothing is due, in milliseconds.
    pub idle_wait_ms: u64,
    /// How late a trigger may fire before it counts as misfired, in milliseconds.
    pub misfire_threshold_ms: u64,
    /// Interrupt running jobs on shutdown instead of letting them drain.
    pub interrupt_jobs_on_shutdown: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            instance_name: "CadenceScheduler".to_string(),
            instance_id: AUTO_INSTANCE_ID.to_string(),
            thread_count: 10,
            idle_wait_ms: 30_000,
            misfire_threshold_ms: 60_000,
            interrupt_jobs_on_shutdown: false,
        }
    }
}

impl SchedulerConfig {
    /// Set the instance name.
    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = name.into();
        self
    }

    /// Set the instance id.
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }

    /// Set the number of worker slots.
    pub fn with_thread_count(mut self, count: usize) -> Self {
        self.thread_count = count;
        self
    }

    /// Set the idle wait.
    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait_ms = duration_ms(wait);
        self
    }

    /// Set the misfire threshold.
    pub fn with_misfire_threshold(mut self, threshold: Duration) -> Self {
        self.misfire_threshold_ms = duration_ms(threshold);
        self
    }

    /// Interrupt running jobs on shutdown.
    pub fn with_interrupt_jobs_on_shutdown(mut self, interrupt: bool) -> Self {
        self.interrupt_jobs_on_shutdown = interrupt;
        self
    }

    /// Idle wait as a duration.
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    /// Misfire threshold as a duration.
    pub fn misfire_threshold(&self) -> Duration {
        Duration::from_millis(self.misfire_threshold_ms)
    }

    /// Whether the instance id should be generated.
    pub fn is_auto_instance_id(&self) -> bool {
        self.instance_id.eq_ignore_ascii_case(AUTO_INSTANCE_ID)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = serde_yaml::from_str(yaml).map_err(ConfigError::YamlError)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SchedulerConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from key/value properties.
    ///
    /// Keys not listed here are ignored; missing keys keep their defaults.
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = SchedulerConfig::default();
        for (key, value) in properties {
            let (key, value) = (key.as_ref().trim(), value.as_ref().trim());
            match key {
                KEY_INSTANCE_NAME => config.instance_name = value.to_string(),
                KEY_INSTANCE_ID => config.instance_id = value.to_string(),
                KEY_THREAD_COUNT => config.thread_count = parse_property(key, value)?,
                KEY_IDLE_WAIT => config.idle_wait_ms = parse_property(key, value)?,
                KEY_MISFIRE_THRESHOLD => config.misfire_threshold_ms = parse_property(key, value)?,
                KEY_INTERRUPT_ON_SHUTDOWN => {
                    config.interrupt_jobs_on_shutdown = parse_property(key, value)?
                }
                _ => tracing::debug!(key = %key, "Ignoring unknown scheduler property"),
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from `key = value` lines.
    ///
    /// Blank lines and lines starting with `#` or `!` are skipped.
    pub fn from_properties_str(text: &str) -> Result<Self, ConfigError> {
        let mut pairs = Vec::new();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .or_else(|| line.split_once(':'))
                .ok_or_else(|| ConfigError::InvalidConfig(format!("malformed property line: {}", line)))?;
            pairs.push((key.to_string(), value.to_string()));
        }
        Self::from_properties(pairs)
    }

    /// Check the configuration for invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance_name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "instance_name must not be empty".into(),
            ));
        }
        if self.instance_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "instance_id must not be empty".into(),
            ));
        }
        if self.thread_count == 0 {
            return Err(ConfigError::InvalidConfig(
                "thread_count must be greater than 0".into(),
            ));
        }
        if self.thread_count > Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidConfig(format!(
                "thread_count must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.idle_wait_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "idle_wait_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn parse_property<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidProperty {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
