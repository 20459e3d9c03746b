//! Lifecycle integration tests.
//!
//! Tests that verify start and shutdown rules, draining versus interrupting
//! running jobs on shutdown, and reloading scheduled work from a job store.

use crate::common::{
    test_config, wait_for_executing, wait_until, CountingJob, PollingJob, RecordingHandler,
    SleepJob,
};
use cadence::{
    Event, ExecutionOutcome, InMemoryJobStore, JobBuilder, JobKey, JobStore, Scheduler,
    SchedulerConfig, SchedulerError, SchedulerFactory, SchedulerState, TriggerBuilder, TriggerKey,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_schedule_before_start_is_rejected() {
    let scheduler = Scheduler::new(test_config(2)).unwrap();

    let (body, _runs) = CountingJob::new();
    let job = JobBuilder::new(body).with_identity("early").build();
    let trigger = TriggerBuilder::new().start_now().build().unwrap();
    let result = scheduler.schedule_job(job, trigger).await;

    assert!(matches!(result, Err(SchedulerError::NotStarted)));
    assert!(scheduler.get_job(&JobKey::new("early")).await.is_none());
    assert!(scheduler.currently_executing_jobs().await.is_empty());
}

#[tokio::test]
async fn test_shutdown_waits_for_running_jobs() {
    let handler = RecordingHandler::new();
    let scheduler = Scheduler::new(test_config(2)).unwrap();
    scheduler.event_bus().register(handler.clone()).await;
    scheduler.start().await.unwrap();

    let body = SleepJob::new(Duration::from_millis(300));
    let completed = body.completed.clone();
    let job = JobBuilder::new(body).with_identity("slow").build();
    scheduler
        .schedule_job(job, TriggerBuilder::new().start_now().build().unwrap())
        .await
        .unwrap();
    wait_for_executing(&scheduler, 1, Duration::from_secs(2)).await;

    scheduler.shutdown(true).await.unwrap();

    assert!(completed.load(Ordering::SeqCst), "shutdown returned before the job finished");
    assert!(scheduler.currently_executing_jobs().await.is_empty());
    assert_eq!(scheduler.state().await, SchedulerState::Stopped);
    handler
        .wait_for(1, Duration::from_secs(1), |e| {
            matches!(e, Event::JobCompleted { outcome, .. } if outcome.is_success())
        })
        .await;
    assert_eq!(
        handler
            .count(|e| matches!(e, Event::SchedulerShutdown { .. }))
            .await,
        1
    );
}

#[tokio::test]
async fn test_shutdown_without_wait_returns_immediately() {
    let scheduler = Scheduler::new(test_config(2)).unwrap();
    scheduler.start().await.unwrap();

    let body = SleepJob::new(Duration::from_millis(500));
    let completed = body.completed.clone();
    let job = JobBuilder::new(body).with_identity("slow").build();
    scheduler
        .schedule_job(job, TriggerBuilder::new().start_now().build().unwrap())
        .await
        .unwrap();
    wait_for_executing(&scheduler, 1, Duration::from_secs(2)).await;

    scheduler.shutdown(false).await.unwrap();
    assert!(!completed.load(Ordering::SeqCst));

    // the running job is left to finish on its own
    wait_until("job to finish", Duration::from_secs(2), || {
        completed.load(Ordering::SeqCst)
    })
    .await;
}

#[tokio::test]
async fn test_waiting_shutdown_after_non_waiting_one_drains() {
    let handler = RecordingHandler::new();
    let scheduler = Scheduler::new(test_config(2)).unwrap();
    scheduler.event_bus().register(handler.clone()).await;
    scheduler.start().await.unwrap();

    let body = SleepJob::new(Duration::from_millis(500));
    let completed = body.completed.clone();
    let job = JobBuilder::new(body).with_identity("slow").build();
    scheduler
        .schedule_job(job, TriggerBuilder::new().start_now().build().unwrap())
        .await
        .unwrap();
    wait_for_executing(&scheduler, 1, Duration::from_secs(2)).await;

    scheduler.shutdown(false).await.unwrap();
    scheduler.shutdown(true).await.unwrap();

    assert!(completed.load(Ordering::SeqCst));
    assert!(scheduler.currently_executing_jobs().await.is_empty());
    assert_eq!(
        handler
            .count(|e| matches!(e, Event::SchedulerShutdown { .. }))
            .await,
        1
    );
}

#[tokio::test]
async fn test_concurrent_waiting_shutdowns_both_drain() {
    let scheduler = Scheduler::new(test_config(2)).unwrap();
    scheduler.start().await.unwrap();

    let body = SleepJob::new(Duration::from_millis(400));
    let completed = body.completed.clone();
    let job = JobBuilder::new(body).with_identity("slow").build();
    scheduler
        .schedule_job(job, TriggerBuilder::new().start_now().build().unwrap())
        .await
        .unwrap();
    wait_for_executing(&scheduler, 1, Duration::from_secs(2)).await;

    let other = scheduler.clone();
    let (first, second) = tokio::join!(scheduler.shutdown(true), other.shutdown(true));
    first.unwrap();
    second.unwrap();

    assert!(completed.load(Ordering::SeqCst));
    assert!(other.currently_executing_jobs().await.is_empty());
}

#[tokio::test]
async fn test_shutdown_interrupts_jobs_when_configured() {
    let handler = RecordingHandler::new();
    let config = test_config(2).with_interrupt_jobs_on_shutdown(true);
    let scheduler = Scheduler::new(config).unwrap();
    scheduler.event_bus().register(handler.clone()).await;
    scheduler.start().await.unwrap();

    let body = PollingJob::new(Duration::from_secs(30));
    let exited = body.exited.clone();
    let job = JobBuilder::new(body).with_identity("poller").build();
    scheduler
        .schedule_job(job, TriggerBuilder::new().start_now().build().unwrap())
        .await
        .unwrap();
    wait_for_executing(&scheduler, 1, Duration::from_secs(2)).await;

    tokio::time::timeout(Duration::from_secs(2), scheduler.shutdown(true))
        .await
        .expect("shutdown should not wait for the full job")
        .unwrap();

    assert!(exited.load(Ordering::SeqCst));
    handler
        .wait_for(1, Duration::from_secs(1), |e| {
            matches!(
                e,
                Event::JobCompleted { outcome: ExecutionOutcome::Interrupted, .. }
            )
        })
        .await;
}

#[tokio::test]
async fn test_shutdown_stops_firing() {
    let scheduler = Scheduler::new(test_config(2)).unwrap();
    scheduler.start().await.unwrap();

    let (body, runs) = CountingJob::new();
    let job = JobBuilder::new(body).with_identity("later").build();
    let trigger = TriggerBuilder::new()
        .start_after(Duration::from_millis(200))
        .build()
        .unwrap();
    scheduler.schedule_job(job, trigger).await.unwrap();

    scheduler.shutdown(true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_final() {
    let handler = RecordingHandler::new();
    let scheduler = Scheduler::new(test_config(1)).unwrap();
    scheduler.event_bus().register(handler.clone()).await;
    scheduler.start().await.unwrap();

    scheduler.shutdown(true).await.unwrap();
    scheduler.shutdown(true).await.unwrap();
    scheduler.shutdown(false).await.unwrap();

    assert_eq!(
        handler
            .count(|e| matches!(e, Event::SchedulerShutdown { .. }))
            .await,
        1
    );
    assert!(matches!(
        scheduler.start().await,
        Err(SchedulerError::AlreadyStopped)
    ));
    assert!(matches!(
        scheduler.unschedule_job(&TriggerKey::new("any")).await,
        Err(SchedulerError::AlreadyStopped)
    ));
}

#[tokio::test]
async fn test_scheduled_work_survives_in_shared_store() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());

    let first = SchedulerFactory::new(test_config(1))
        .with_job_store(Arc::clone(&store))
        .build()
        .unwrap();
    first.start().await.unwrap();
    let (body, runs) = CountingJob::new();
    let job = JobBuilder::new(body).with_identity("carried").build();
    let trigger = TriggerBuilder::new()
        .with_identity("carried-trigger")
        .start_after(Duration::from_millis(300))
        .build()
        .unwrap();
    first.schedule_job(job, trigger).await.unwrap();
    first.shutdown(true).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    let second = SchedulerFactory::new(test_config(1))
        .with_job_store(Arc::clone(&store))
        .build()
        .unwrap();
    second.start().await.unwrap();
    assert!(second
        .get_trigger(&TriggerKey::new("carried-trigger"))
        .await
        .is_some());

    wait_until("reloaded trigger to fire", Duration::from_secs(3), || {
        runs.load(Ordering::SeqCst) == 1
    })
    .await;
    second.shutdown(true).await.unwrap();

    // the one-shot trigger retired, so the store no longer holds it
    assert!(store.load_all_triggers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scheduler_from_properties() {
    let text = "\
# scheduler settings
scheduler.instanceName = PropsScheduler
scheduler.instanceId = node-a
threadPool.threadCount: 4
scheduler.interruptJobsOnShutdown = true
";
    let config = SchedulerConfig::from_properties_str(text).unwrap();
    let scheduler = SchedulerFactory::new(config).build().unwrap();

    assert_eq!(scheduler.instance_name(), "PropsScheduler");
    assert_eq!(scheduler.instance_id(), "node-a");

    scheduler.start().await.unwrap();
    let meta = scheduler.metadata().await;
    assert_eq!(meta.thread_pool_size, 4);
    assert!(meta.interrupt_jobs_on_shutdown);
    assert_eq!(meta.state, SchedulerState::Started);
    scheduler.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_metadata_counts_executed_jobs() {
    let scheduler = Scheduler::new(test_config(2)).unwrap();
    scheduler.start().await.unwrap();

    let (body, runs) = CountingJob::new();
    let job = JobBuilder::new(body)
        .with_identity("counted")
        .durable(true)
        .build();
    scheduler.add_job(job, false).await.unwrap();
    for _ in 0..3 {
        scheduler
            .trigger_job(&JobKey::new("counted"), Default::default())
            .await
            .unwrap();
    }

    wait_until("three executions", Duration::from_secs(3), || {
        runs.load(Ordering::SeqCst) == 3
    })
    .await;
    wait_for_executing(&scheduler, 0, Duration::from_secs(1)).await;

    let meta = scheduler.metadata().await;
    assert_eq!(meta.jobs_executed, 3);
    assert_eq!(meta.currently_executing, 0);
    scheduler.shutdown(true).await.unwrap();
}
