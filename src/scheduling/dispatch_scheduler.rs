use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::dispatch::{DispatchJob, DispatchResponse};

pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_secs(60);

pub struct ScheduledTask {
    task_handle: JoinHandle<()>,
    cancellation_token: CancellationToken,
}

impl ScheduledTask {
    pub fn new(task_handle: JoinHandle<()>, cancellation_token: CancellationToken) -> Self {
        Self {
            task_handle,
            cancellation_token,
        }
    }

    /// Stops scheduling new runs. A run already in progress finishes first,
    /// unless it outlasts `timeout`.
    pub async fn cancel(self, timeout: Duration) {
        self.cancellation_token.cancel();
        let cancel_with_timeout = time::timeout(timeout, self.task_handle);
        if cancel_with_timeout.await.is_err() {
            log::warn!("Dispatch scheduler did not stop within {:?}", timeout);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task_handle.is_finished()
    }
}

/// Triggers the dispatch job on a fixed cadence.
pub struct DispatchScheduler;

impl DispatchScheduler {
    pub fn spawn(
        job: Arc<DispatchJob>,
        period: Duration,
        cancellation_token: CancellationToken,
    ) -> ScheduledTask {
        let task_cancellation_token = cancellation_token.child_token();

        log::info!("Scheduling reminder dispatch every {:?}", period);

        let task_handle = tokio::spawn(async move {
            Self::run_periodically(job, period, task_cancellation_token).await
        });

        ScheduledTask::new(task_handle, cancellation_token)
    }

    async fn run_periodically(
        job: Arc<DispatchJob>,
        period: Duration,
        cancellation_token: CancellationToken,
    ) {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    log::info!("Dispatch scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {}
            }

            // Runs are not interrupted by cancellation.
            Self::run_once(&job).await;
        }
    }

    pub async fn run_once(job: &DispatchJob) -> DispatchResponse {
        let now = Utc::now();
        let response = DispatchResponse::new(job.run(now).await, now);

        match serde_json::to_string(&response) {
            Ok(json) if response.is_success() => log::info!("{}", json),
            Ok(json) => log::error!("{}", json),
            Err(e) => log::warn!("Could not serialize dispatch response: {}", e),
        }

        response
    }
}
