//! Firing and execution integration tests.

use crate::common::{
    test_config, wait_for_executing, wait_until, CountingJob, FailingJob, PanickingJob,
    PollingJob, RecordingHandler, RecordingJob,
};
use async_trait::async_trait;
use cadence::{
    Event, ExecutionOutcome, Job, JobBuilder, JobError, JobExecutionContext, JobKey, Schedule,
    Scheduler, SchedulerFactory, TriggerBuilder,
};
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[tokio::test]
async fn test_fired_job_is_listed_while_running() {
    let scheduler = Scheduler::new(test_config(2)).unwrap();
    scheduler.start().await.unwrap();

    let body = PollingJob::new(Duration::from_secs(5));
    let job = JobBuilder::new(body).with_identity("long").build();
    let trigger = TriggerBuilder::new().with_identity("now").start_now().build().unwrap();
    scheduler.schedule_job(job, trigger).await.unwrap();

    let running = wait_for_executing(&scheduler, 1, Duration::from_secs(2)).await;
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].job_key, JobKey::new("long"));
    assert_eq!(running[0].trigger_key.name(), "now");
    assert!(running[0].interruptible);
    assert!(!running[0].interrupt_requested);
    assert!(running[0]
        .fire_instance_id
        .as_str()
        .starts_with(scheduler.instance_id()));

    assert!(scheduler.interrupt(&running[0].fire_instance_id).await);
    scheduler.shutdown(true).await.unwrap();
    assert!(scheduler.currently_executing_jobs().await.is_empty());
}

#[tokio::test]
async fn test_same_fire_time_fires_in_scheduling_order() {
    let handler = RecordingHandler::new();
    let scheduler = Scheduler::new(test_config(1)).unwrap();
    scheduler.event_bus().register(handler.clone()).await;
    scheduler.start().await.unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let at = Utc::now() + chrono::Duration::milliseconds(200);
    for (job_name, trigger_name) in [("first", "t1"), ("second", "t2")] {
        let job = JobBuilder::new(RecordingJob {
            name: job_name.to_string(),
            log: Arc::clone(&log),
        })
        .with_identity(job_name)
        .build();
        let trigger = TriggerBuilder::new()
            .with_identity(trigger_name)
            .start_at(at)
            .build()
            .unwrap();
        scheduler.schedule_job(job, trigger).await.unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while log.lock().await.len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "jobs did not run");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(*log.lock().await, vec!["first", "second"]);
    assert_eq!(handler.fired_triggers().await, vec!["t1", "t2"]);
    scheduler.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_pool_limits_concurrent_executions() {
    let scheduler = Scheduler::new(test_config(2)).unwrap();
    scheduler.start().await.unwrap();

    for i in 0..3 {
        let job = JobBuilder::new(PollingJob::new(Duration::from_secs(5)))
            .with_identity(format!("job-{}", i))
            .build();
        let trigger = TriggerBuilder::new().start_now().build().unwrap();
        scheduler.schedule_job(job, trigger).await.unwrap();
    }

    wait_for_executing(&scheduler, 2, Duration::from_secs(2)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(scheduler.currently_executing_jobs().await.len(), 2);

    // freeing the slots lets the third job through
    assert_eq!(scheduler.interrupt_job(&JobKey::new("job-0")).await, 1);
    assert_eq!(scheduler.interrupt_job(&JobKey::new("job-1")).await, 1);
    let running = wait_for_executing(&scheduler, 1, Duration::from_secs(2)).await;
    assert_eq!(running[0].job_key, JobKey::new("job-2"));

    scheduler.interrupt_job(&JobKey::new("job-2")).await;
    scheduler.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_failing_jobs_do_not_stop_the_scheduler() {
    let handler = RecordingHandler::new();
    let scheduler = Scheduler::new(test_config(2)).unwrap();
    scheduler.event_bus().register(handler.clone()).await;
    scheduler.start().await.unwrap();

    let failing = JobBuilder::new(FailingJob).with_identity("fails").build();
    let panicking = JobBuilder::new(PanickingJob).with_identity("panics").build();
    scheduler
        .schedule_job(failing, TriggerBuilder::new().start_now().build().unwrap())
        .await
        .unwrap();
    scheduler
        .schedule_job(panicking, TriggerBuilder::new().start_now().build().unwrap())
        .await
        .unwrap();

    let (body, runs) = CountingJob::new();
    let healthy = JobBuilder::new(body).with_identity("healthy").build();
    let trigger = TriggerBuilder::new()
        .start_after(Duration::from_millis(100))
        .build()
        .unwrap();
    scheduler.schedule_job(healthy, trigger).await.unwrap();

    wait_until("healthy job to run", Duration::from_secs(3), || {
        runs.load(Ordering::SeqCst) == 1
    })
    .await;
    scheduler.shutdown(true).await.unwrap();
    handler
        .wait_for(3, Duration::from_secs(1), |e| {
            matches!(e, Event::JobCompleted { .. })
        })
        .await;

    let outcomes: Vec<(String, ExecutionOutcome)> = handler
        .events()
        .await
        .into_iter()
        .filter_map(|e| match e {
            Event::JobCompleted { job_key, outcome, .. } => {
                Some((job_key.name().to_string(), outcome))
            }
            _ => None,
        })
        .collect();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().any(|(name, outcome)| name == "fails"
        && matches!(outcome, ExecutionOutcome::Failed { error } if error.contains("boom"))));
    assert!(outcomes.iter().any(|(name, outcome)| name == "panics"
        && matches!(outcome, ExecutionOutcome::Failed { error } if error.contains("job exploded"))));
    assert!(outcomes
        .iter()
        .any(|(name, outcome)| name == "healthy" && outcome.is_success()));
}

#[tokio::test]
async fn test_repeating_trigger_fires_until_exhausted() {
    let handler = RecordingHandler::new();
    let scheduler = Scheduler::new(test_config(2)).unwrap();
    scheduler.event_bus().register(handler.clone()).await;
    scheduler.start().await.unwrap();

    let (body, runs) = CountingJob::new();
    let job = JobBuilder::new(body).with_identity("repeat").build();
    let trigger = TriggerBuilder::new()
        .with_identity("thrice")
        .start_now()
        .with_schedule(Schedule::repeat(Duration::from_millis(50), 2))
        .build()
        .unwrap();
    scheduler.schedule_job(job, trigger).await.unwrap();

    wait_until("three executions", Duration::from_secs(3), || {
        runs.load(Ordering::SeqCst) == 3
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    // the exhausted trigger took its non-durable job with it
    assert!(scheduler.get_job(&JobKey::new("repeat")).await.is_none());
    assert_eq!(
        handler
            .count(|e| matches!(e, Event::TriggerFinalized { trigger_key, .. } if trigger_key.name() == "thrice"))
            .await,
        1
    );
    scheduler.shutdown(true).await.unwrap();
}

/// Job that records the data it was given.
struct DataJob {
    seen: Arc<Mutex<Option<(String, u32)>>>,
}

#[async_trait]
impl Job for DataJob {
    async fn execute(&self, ctx: &JobExecutionContext) -> Result<(), JobError> {
        let target: String = ctx.data().get("target")?;
        let attempts: u32 = ctx.data().get("attempts")?;
        *self.seen.lock().await = Some((target, attempts));
        Ok(())
    }
}

#[tokio::test]
async fn test_trigger_data_overrides_job_data() {
    let scheduler = SchedulerFactory::new(test_config(1)).build().unwrap();
    scheduler.start().await.unwrap();

    let seen = Arc::new(Mutex::new(None));
    let job = JobBuilder::new(DataJob {
        seen: Arc::clone(&seen),
    })
    .with_identity("data")
    .with_data("target", "db-1")
    .with_data("attempts", 1)
    .build();
    let trigger = TriggerBuilder::new()
        .with_data("attempts", 3)
        .start_now()
        .build()
        .unwrap();
    scheduler.schedule_job(job, trigger).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while seen.lock().await.is_none() {
        assert!(tokio::time::Instant::now() < deadline, "job did not run");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(*seen.lock().await, Some(("db-1".to_string(), 3)));
    scheduler.shutdown(true).await.unwrap();
}
