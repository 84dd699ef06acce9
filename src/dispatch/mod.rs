//! Due-reminder dispatch.
//!
//! A run selects every reminder that is pending, not yet emailed and due at
//! or before `now`, sends one email per reminder and records the outcome on
//! the reminder. Items are isolated from each other: a failed send or a
//! failed write-back is logged and counted, and the run carries on. Only a
//! failed selection fails the run as a whole.
//!
//! Delivery is at-least-once. The reminder is marked as sent strictly after
//! the transport accepts the message, so a crash in between leaves it pending
//! and the next run sends it again. Failed reminders stay failed until an
//! operator resets them to pending.

mod report;

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
    delivery::{DeliveryError, MailTransport, OutgoingMail, compose_notification},
    reminder::{ReferenceZone, Reminder},
    storage::{ReminderFilter, ReminderPatch, ReminderStore, StoreError},
};

pub use report::{
    CompletedRun, DispatchReport, DispatchResponse, FailedRun, ItemOutcome, ReminderFailure,
};

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("could not select due reminders: {0}")]
    Selection(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Upper bound for a single send. Expiry counts as a failed delivery.
    pub send_timeout: Duration,
    /// How many reminders may be in flight at once. `1` processes them one by one.
    pub max_concurrent_sends: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            send_timeout: DEFAULT_SEND_TIMEOUT,
            max_concurrent_sends: 1,
        }
    }
}

pub struct DispatchJob {
    store: Arc<dyn ReminderStore>,
    transport: Arc<dyn MailTransport>,
    zone: ReferenceZone,
    settings: DispatchSettings,
    // Serializes runs within this process only.
    run_lock: Mutex<()>,
}

impl DispatchJob {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        transport: Arc<dyn MailTransport>,
        zone: ReferenceZone,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            transport,
            zone,
            settings,
            run_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ReminderStore> {
        &self.store
    }

    pub fn zone(&self) -> &ReferenceZone {
        &self.zone
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<DispatchReport, DispatchError> {
        let _guard = self.run_lock.lock().await;

        log::info!("Checking for reminders due at {}", now.to_rfc3339());

        let due = self
            .store
            .query(&ReminderFilter::due_at(now))
            .await
            .inspect_err(|e| log::error!("Dispatch run aborted, selection failed: {}", e))?;

        log::info!("Found {} due reminders", due.len());

        let mut report = DispatchReport::new(now, due.len());
        let outcomes: Vec<ItemOutcome> = stream::iter(due)
            .map(|reminder| self.process(reminder, now))
            .buffer_unordered(self.settings.max_concurrent_sends.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            report.record(outcome);
        }

        log::info!(
            "Dispatch run finished: processed = {}, sent = {}, errors = {}, write_back_failures = {}",
            report.processed,
            report.sent,
            report.errors,
            report.write_back_failures
        );

        Ok(report)
    }

    async fn process(&self, reminder: Reminder, now: DateTime<Utc>) -> ItemOutcome {
        let mail = compose_notification(&reminder, &self.zone);
        let id = reminder.id;

        match self.deliver(&mail).await {
            Ok(()) => {
                log::info!("Email sent for reminder {} to {}", id, mail.to);

                match self.store.update(&id, ReminderPatch::mark_sent(now)).await {
                    Ok(_) => ItemOutcome::Sent { reminder_id: id },
                    Err(e) => {
                        log::error!(
                            "Reminder {} was emailed but could not be marked as sent: {}",
                            id,
                            e
                        );
                        ItemOutcome::SentUnrecorded {
                            reminder_id: id,
                            write_error: e.to_string(),
                        }
                    }
                }
            }
            Err(delivery_error) => {
                let reason = delivery_error.to_string();
                log::warn!("Failed to send email for reminder {}: {}", id, reason);

                let recorded = match self
                    .store
                    .update(&id, ReminderPatch::mark_failed(reason.as_str()))
                    .await
                {
                    Ok(_) => true,
                    Err(e) => {
                        log::error!("Failed to record error status for reminder {}: {}", id, e);
                        false
                    }
                };

                ItemOutcome::Failed {
                    reminder_id: id,
                    reason,
                    recorded,
                }
            }
        }
    }

    async fn deliver(&self, mail: &OutgoingMail) -> Result<(), DeliveryError> {
        let timeout = self.settings.send_timeout;
        match tokio::time::timeout(timeout, self.transport.send(mail)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests;
