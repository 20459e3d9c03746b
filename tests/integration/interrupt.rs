//! Interruption integration tests.

use crate::common::{
    test_config, wait_for_executing, wait_until, PollingJob, RecordingHandler, SleepJob,
};
use async_trait::async_trait;
use cadence::{
    Event, ExecutionOutcome, FireInstanceId, Interruptible, Job, JobBuilder, JobError,
    JobExecutionContext, JobKey, Scheduler, SchedulerError, TriggerBuilder,
};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn test_interrupt_stops_polling_job() {
    let handler = RecordingHandler::new();
    let scheduler = Scheduler::new(test_config(2)).unwrap();
    scheduler.event_bus().register(handler.clone()).await;
    scheduler.start().await.unwrap();

    let body = PollingJob::new(Duration::from_secs(10));
    let exited = body.exited.clone();
    let hook_called = body.hook_called.clone();
    let job = JobBuilder::new(body).with_identity("poller").build();
    scheduler
        .schedule_job(job, TriggerBuilder::new().start_now().build().unwrap())
        .await
        .unwrap();

    let running = wait_for_executing(&scheduler, 1, Duration::from_secs(2)).await;
    let id = running[0].fire_instance_id.clone();

    assert!(scheduler.interrupt(&id).await);
    assert!(hook_called.load(Ordering::SeqCst));

    // the job polls every 20ms
    wait_until("poller to exit", Duration::from_millis(100), || {
        exited.load(Ordering::SeqCst)
    })
    .await;
    wait_for_executing(&scheduler, 0, Duration::from_secs(1)).await;
    scheduler.shutdown(true).await.unwrap();
    handler
        .wait_for(1, Duration::from_secs(1), |e| {
            matches!(e, Event::JobCompleted { .. })
        })
        .await;

    let events = handler.events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        Event::JobInterruptRequested { fire_instance_id, .. } if fire_instance_id == &id
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::JobCompleted { fire_instance_id, outcome: ExecutionOutcome::Interrupted, .. }
            if fire_instance_id == &id
    )));
}

#[tokio::test]
async fn test_interrupt_unknown_id_returns_false() {
    let scheduler = Scheduler::new(test_config(2)).unwrap();
    scheduler.start().await.unwrap();

    let id = FireInstanceId::new("no-such-execution");
    assert!(!scheduler.interrupt(&id).await);
    assert!(matches!(
        scheduler.try_interrupt(&id).await,
        Err(SchedulerError::UnknownFireInstance(ref missing)) if missing == &id
    ));
    scheduler.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_interrupt_non_interruptible_job_is_refused() {
    let scheduler = Scheduler::new(test_config(2)).unwrap();
    scheduler.start().await.unwrap();

    let body = SleepJob::new(Duration::from_millis(300));
    let completed = body.completed.clone();
    let job = JobBuilder::new(body).with_identity("sleeper").build();
    scheduler
        .schedule_job(job, TriggerBuilder::new().start_now().build().unwrap())
        .await
        .unwrap();

    let running = wait_for_executing(&scheduler, 1, Duration::from_secs(2)).await;
    assert!(!running[0].interruptible);
    let id = running[0].fire_instance_id.clone();

    assert!(!scheduler.interrupt(&id).await);
    assert!(matches!(
        scheduler.try_interrupt(&id).await,
        Err(SchedulerError::NotInterruptible(_))
    ));
    assert_eq!(scheduler.interrupt_job(&JobKey::new("sleeper")).await, 0);

    scheduler.shutdown(true).await.unwrap();
    assert!(completed.load(Ordering::SeqCst));
}

/// Interruptible job that only looks at its flag once it is done sleeping.
struct StubbornJob {
    duration: Duration,
}

#[async_trait]
impl Job for StubbornJob {
    async fn execute(&self, ctx: &JobExecutionContext) -> Result<(), JobError> {
        tokio::time::sleep(self.duration).await;
        if ctx.is_interrupted() {
            return Err(JobError::Interrupted);
        }
        Ok(())
    }

    fn as_interruptible(&self) -> Option<&dyn Interruptible> {
        Some(self)
    }
}

impl Interruptible for StubbornJob {
    fn interrupt(&self) {}
}

#[tokio::test]
async fn test_interrupt_is_visible_in_listing() {
    let scheduler = Scheduler::new(test_config(2)).unwrap();
    scheduler.start().await.unwrap();

    let job = JobBuilder::new(StubbornJob {
        duration: Duration::from_millis(500),
    })
    .with_identity("stubborn")
    .build();
    scheduler
        .schedule_job(job, TriggerBuilder::new().start_now().build().unwrap())
        .await
        .unwrap();

    let running = wait_for_executing(&scheduler, 1, Duration::from_secs(2)).await;
    let id = running[0].fire_instance_id.clone();
    assert!(scheduler.interrupt(&id).await);
    assert!(scheduler.interrupt(&id).await);

    let running = scheduler.currently_executing_jobs().await;
    assert_eq!(running.len(), 1);
    assert!(running[0].interrupt_requested);

    wait_for_executing(&scheduler, 0, Duration::from_secs(2)).await;
    assert!(!scheduler.interrupt(&id).await);
    scheduler.shutdown(true).await.unwrap();
}
