pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod scheduler;
pub mod storage;

pub use config::{ConfigError, SchedulerConfig};
pub use core::context::{ContextError, JobDataMap, JobExecutionContext};
pub use core::job::{Interruptible, Job, JobBuilder, JobDetail, JobError};
pub use core::trigger::{RepeatCount, Schedule, Trigger, TriggerBuilder, TriggerError};
pub use core::types::{FireInstanceId, JobKey, TriggerKey};
pub use events::{Event, EventBus, EventHandler, ExecutionOutcome};
pub use execution::{FireInstanceInfo, InterruptError};
pub use scheduler::{
    Scheduler, SchedulerError, SchedulerFactory, SchedulerMetaData, SchedulerState,
};
pub use storage::{InMemoryJobStore, JobStore, StoreError};
