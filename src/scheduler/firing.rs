//! The firing loop.
//!
//! A single task that waits for a free worker slot, takes every trigger that
//! is due (bounded by the free slots), advances it, and hands the resulting
//! execution to the worker pool. When nothing is due it sleeps until the next
//! fire time, the idle wait, or a command, whichever comes first.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use super::queue::{DueTrigger, TriggerQueue};
use super::types::LoopCommand;
use crate::core::context::JobExecutionContext;
use crate::core::trigger::Trigger;
use crate::core::types::{FireInstanceId, TriggerKey};
use crate::events::{Event, EventBus};
use crate::execution::{FireInstance, Slot, WorkerPool};
use crate::storage::JobStore;

/// An execution ready to be submitted, prepared under the queue lock.
struct Dispatch {
    slot: Slot,
    instance: Arc<FireInstance>,
    trigger_key: TriggerKey,
    lateness: Option<Duration>,
    retired: bool,
}

pub(crate) struct FiringLoop {
    instance_id: String,
    queue: Arc<Mutex<TriggerQueue>>,
    pool: Arc<WorkerPool>,
    store: Arc<dyn JobStore>,
    event_bus: Arc<EventBus>,
    idle_wait: Duration,
    misfire_threshold: Duration,
    next_sequence: u64,
}

enum Control {
    Continue,
    Stop,
}

impl FiringLoop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        instance_id: String,
        queue: Arc<Mutex<TriggerQueue>>,
        pool: Arc<WorkerPool>,
        store: Arc<dyn JobStore>,
        event_bus: Arc<EventBus>,
        idle_wait: Duration,
        misfire_threshold: Duration,
    ) -> Self {
        Self {
            instance_id,
            queue,
            pool,
            store,
            event_bus,
            idle_wait,
            misfire_threshold,
            next_sequence: 1,
        }
    }

    /// Run until halted or until every command sender is gone.
    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<LoopCommand>) {
        tracing::debug!(instance_id = %self.instance_id, "Firing loop started");

        loop {
            let slot = tokio::select! {
                biased;

                command = commands.recv() => match handle_command(command) {
                    Control::Continue => continue,
                    Control::Stop => break,
                },
                slot = self.pool.wait_for_slot() => match slot {
                    Some(slot) => slot,
                    None => break,
                },
            };

            let now = Utc::now();
            if self.fire_due(slot, now).await > 0 {
                continue;
            }

            let wait = self.time_until_next(now).await;
            tokio::select! {
                biased;

                command = commands.recv() => {
                    if let Control::Stop = handle_command(command) {
                        break;
                    }
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tracing::debug!(instance_id = %self.instance_id, "Firing loop stopped");
    }

    /// Dispatch every trigger due at `now` that a free slot can take.
    ///
    /// `slot` is the slot the loop waited for; more are reserved as needed.
    /// Returns the number of executions submitted.
    async fn fire_due(&mut self, slot: Slot, now: DateTime<Utc>) -> usize {
        let shared = Arc::clone(&self.queue);
        let mut queue = shared.lock().await;
        let due = queue.pop_due(now, 1 + self.pool.available_slots());
        if due.is_empty() {
            return 0;
        }

        let mut first = Some(slot);
        let mut dispatches = Vec::with_capacity(due.len());
        let mut fired = Vec::with_capacity(due.len());
        for item in due {
            let Some(slot) = first.take().or_else(|| self.pool.try_reserve()) else {
                let key = item.trigger.key().clone();
                if let Err(e) = queue.restore(item) {
                    tracing::warn!(trigger = %key, error = %e, "Failed to restore undispatched trigger");
                }
                continue;
            };
            if let Some((dispatch, trigger)) = self.prepare(item, slot, now) {
                dispatches.push(dispatch);
                fired.push(trigger);
            }
        }

        // exhausted triggers go last so retiring one cannot orphan a job
        // whose other triggers fired in this batch
        fired.sort_by_key(|t| t.next_fire_time().is_none());
        for trigger in fired {
            queue.requeue(trigger);
        }
        drop(queue);

        let count = dispatches.len();
        for dispatch in dispatches {
            self.submit(dispatch).await;
        }
        count
    }

    /// Advance a due trigger and build the execution it fires.
    ///
    /// The advanced trigger is handed back for requeueing.
    fn prepare(
        &mut self,
        item: DueTrigger,
        slot: Slot,
        now: DateTime<Utc>,
    ) -> Option<(Dispatch, Trigger)> {
        let DueTrigger {
            mut trigger, job, ..
        } = item;

        let previous = trigger.previous_fire_time();
        let scheduled = trigger.triggered()?;
        let lateness = (now - scheduled).to_std().unwrap_or_default();
        let misfired = lateness > self.misfire_threshold;
        if misfired {
            trigger.skip_missed(now);
        }

        let trigger_key = trigger.key().clone();
        let next = trigger.next_fire_time();
        let data = job.data().merged_with(trigger.data());
        let retired = next.is_none();

        let id = FireInstanceId::for_dispatch(&self.instance_id, self.next_sequence);
        self.next_sequence += 1;

        let context = JobExecutionContext::new(
            id,
            job.key().clone(),
            trigger_key.clone(),
            data,
            now,
            scheduled,
            previous,
            next,
        );
        let body = job.instantiate();
        let instance = Arc::new(FireInstance::new(job, body, context));

        let dispatch = Dispatch {
            slot,
            instance,
            trigger_key,
            lateness: misfired.then_some(lateness),
            retired,
        };
        Some((dispatch, trigger))
    }

    async fn submit(&self, dispatch: Dispatch) {
        let Dispatch {
            slot,
            instance,
            trigger_key,
            lateness,
            retired,
        } = dispatch;
        let job_key = instance.job().key().clone();

        if let Some(lateness) = lateness {
            tracing::warn!(
                trigger = %trigger_key,
                job = %job_key,
                lateness_ms = lateness.as_millis() as u64,
                "Trigger misfired, firing once and skipping missed occurrences"
            );
            self.event_bus
                .emit(Event::trigger_misfired(trigger_key.clone(), lateness))
                .await;
        }

        tracing::debug!(
            trigger = %trigger_key,
            job = %job_key,
            fire_instance_id = %instance.id(),
            "Trigger fired"
        );
        self.event_bus
            .emit(Event::trigger_fired(
                trigger_key.clone(),
                job_key,
                instance.id().clone(),
            ))
            .await;

        if retired {
            if let Err(e) = self.store.remove_trigger(&trigger_key).await {
                tracing::warn!(trigger = %trigger_key, error = %e, "Failed to remove finished trigger from store");
            }
            self.event_bus
                .emit(Event::trigger_finalized(trigger_key))
                .await;
        }

        self.pool.submit(slot, instance).await;
    }

    async fn time_until_next(&self, now: DateTime<Utc>) -> Duration {
        match self.queue.lock().await.next_fire_time() {
            Some(next) => (next - now).to_std().unwrap_or_default().min(self.idle_wait),
            None => self.idle_wait,
        }
    }
}

fn handle_command(command: Option<LoopCommand>) -> Control {
    match command {
        Some(LoopCommand::Wake) => Control::Continue,
        Some(LoopCommand::Halt { response }) => {
            let _ = response.send(());
            Control::Stop
        }
        None => Control::Stop,
    }
}
