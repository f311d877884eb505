use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use callforge_core::{
    CallError, CallOrchestrator, CallRequest, CallSessionStore, Component, Message, ScheduledCall,
    ScheduledCallStatus, ScheduledCallUpdate, TickSummary,
};

use crate::recurrence::{next_occurrence, retry_delay};
use crate::status_sync::StatusSync;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// Scheduled calls picked up per tick.
    pub batch_size: usize,
    pub sync_interval: Duration,
    /// In-flight calls untouched for this long are refreshed by the status sweep.
    pub stale_after: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            batch_size: 10,
            sync_interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(600),
        }
    }
}

/// How one scheduled call ended up after a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Dispatched,
    Rescheduled,
    Failed,
}

/// The scheduler component: dispatches due scheduled calls on a fixed tick
/// and runs the stale-call status sweep on a slower one.
pub struct CallScheduler {
    store: Arc<dyn CallSessionStore>,
    orchestrator: Arc<dyn CallOrchestrator>,
    sync: StatusSync,
    config: SchedulerConfig,
}

impl CallScheduler {
    pub fn new(
        store: Arc<dyn CallSessionStore>,
        orchestrator: Arc<dyn CallOrchestrator>,
        config: SchedulerConfig,
    ) -> Self {
        let stale_after = chrono::Duration::from_std(config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));
        let sync = StatusSync::new(
            store.clone(),
            orchestrator.clone(),
            stale_after,
            config.batch_size,
        );
        Self {
            store,
            orchestrator,
            sync,
            config,
        }
    }

    /// Dispatch every pending scheduled call due at `now`, oldest first, up
    /// to one batch. Items are handled independently; a failing item is
    /// counted and logged and the rest of the batch still runs.
    pub async fn process_due(&self, now: DateTime<Utc>) -> TickSummary {
        let due = match self
            .store
            .find_due_scheduled_calls(now, self.config.batch_size)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Could not load due scheduled calls");
                return TickSummary::default();
            }
        };

        let mut summary = TickSummary {
            selected: due.len(),
            ..Default::default()
        };
        for scheduled in due {
            let id = scheduled.id;
            match self.dispatch(scheduled, now).await {
                Ok(Outcome::Dispatched) => summary.dispatched += 1,
                Ok(Outcome::Rescheduled) => summary.rescheduled += 1,
                Ok(Outcome::Failed) => summary.failed += 1,
                Err(e) => {
                    error!(scheduled_call_id = %id, error = %e, "Scheduled call bookkeeping failed");
                    summary.failed += 1;
                }
            }
        }

        if summary.selected > 0 {
            info!(
                selected = summary.selected,
                dispatched = summary.dispatched,
                rescheduled = summary.rescheduled,
                failed = summary.failed,
                "Scheduler pass finished"
            );
        }
        summary
    }

    async fn dispatch(&self, scheduled: ScheduledCall, now: DateTime<Utc>) -> Result<Outcome, CallError> {
        self.store
            .update_scheduled_call(
                scheduled.id,
                ScheduledCallUpdate {
                    status: Some(ScheduledCallStatus::Queued),
                    ..Default::default()
                },
            )
            .await?;

        let request = CallRequest {
            driver_id: scheduled.driver_id.clone(),
            agent_id: scheduled.agent_id.clone(),
            provider_override: None,
        };

        // The call is out of our hands from here on; bookkeeping failures are
        // logged and never turn a placed call into a failed item.
        match self.orchestrator.place_call(request).await {
            Ok(handle) => {
                self.record(
                    &scheduled,
                    ScheduledCallUpdate {
                        status: Some(ScheduledCallStatus::Completed),
                        call_id: Some(handle.call_id),
                        ..Default::default()
                    },
                )
                .await;
                info!(
                    scheduled_call_id = %scheduled.id,
                    call_id = %handle.call_id,
                    provider = %handle.provider,
                    "Scheduled call dispatched"
                );
                if let Err(e) = self.schedule_next(&scheduled).await {
                    error!(
                        scheduled_call_id = %scheduled.id,
                        error = %e,
                        "Could not create the next occurrence"
                    );
                }
                Ok(Outcome::Dispatched)
            }
            Err(e) => {
                let retry_count = scheduled.retry_count + 1;
                if retry_count < scheduled.max_retries {
                    let retry_at = now + retry_delay(retry_count);
                    warn!(
                        scheduled_call_id = %scheduled.id,
                        retry_count,
                        retry_at = %retry_at,
                        error = %e,
                        "Scheduled call failed, will retry"
                    );
                    self.record(
                        &scheduled,
                        ScheduledCallUpdate {
                            status: Some(ScheduledCallStatus::Pending),
                            scheduled_at: Some(retry_at),
                            retry_count: Some(retry_count),
                            last_error: Some(e.to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                    Ok(Outcome::Rescheduled)
                } else {
                    error!(
                        scheduled_call_id = %scheduled.id,
                        retry_count,
                        error = %e,
                        "Scheduled call failed permanently"
                    );
                    self.record(
                        &scheduled,
                        ScheduledCallUpdate {
                            status: Some(ScheduledCallStatus::Failed),
                            retry_count: Some(retry_count),
                            last_error: Some(e.to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                    Ok(Outcome::Failed)
                }
            }
        }
    }

    async fn record(&self, scheduled: &ScheduledCall, update: ScheduledCallUpdate) {
        let status = update.status;
        if let Err(e) = self.store.update_scheduled_call(scheduled.id, update).await {
            error!(
                scheduled_call_id = %scheduled.id,
                status = ?status,
                error = %e,
                "Could not record scheduled call outcome"
            );
        }
    }

    /// Create the single successor of a recurring call that just completed.
    async fn schedule_next(&self, scheduled: &ScheduledCall) -> Result<(), CallError> {
        let Some(recurrence) = scheduled.recurring else {
            return Ok(());
        };
        let Some(at) = next_occurrence(scheduled.scheduled_at, recurrence) else {
            warn!(scheduled_call_id = %scheduled.id, "Next occurrence out of range, recurrence stopped");
            return Ok(());
        };

        let mut next = ScheduledCall::new(scheduled.driver_id.clone(), at)
            .with_recurrence(recurrence)
            .with_max_retries(scheduled.max_retries);
        next.agent_id = scheduled.agent_id.clone();
        next.timezone = scheduled.timezone.clone();

        let next = self.store.create_scheduled_call(next).await?;
        debug!(
            scheduled_call_id = %scheduled.id,
            next_id = %next.id,
            next_at = %next.scheduled_at,
            "Recurring call rescheduled"
        );
        Ok(())
    }
}

#[async_trait]
impl Component for CallScheduler {
    fn name(&self) -> &str {
        "scheduler"
    }

    async fn start(&self, mut rx: mpsc::Receiver<Message>) -> Result<()> {
        info!(
            tick_secs = self.config.tick_interval.as_secs(),
            batch_size = self.config.batch_size,
            sync_secs = self.config.sync_interval.as_secs(),
            "Scheduler started"
        );

        let mut ticker = time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sync_ticker = time::interval(self.config.sync_interval);
        sync_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.process_due(Utc::now()).await;
                }
                _ = sync_ticker.tick() => {
                    self.sync.sweep(Utc::now()).await;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(Message::ProcessScheduled { reply }) => {
                            let summary = self.process_due(Utc::now()).await;
                            if let Some(tx) = reply {
                                let _ = tx.send(summary);
                            }
                        }
                        Some(Message::SyncStatus { reply }) => {
                            let summary = self.sync.sweep(Utc::now()).await;
                            if let Some(tx) = reply {
                                let _ = tx.send(summary);
                            }
                        }
                        None => {
                            info!("Scheduler channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
