//! Configuration loading and parsing.
//!
//! This module provides scheduler settings loaded from YAML or from
//! flat properties.

mod error;
mod types;

pub use error::ConfigError;
pub use types::{SchedulerConfig, AUTO_INSTANCE_ID};
