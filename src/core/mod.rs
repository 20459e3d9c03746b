//! Core scheduling model: identities, jobs, triggers, and execution context.

pub mod context;
pub mod job;
pub mod trigger;
pub mod types;
