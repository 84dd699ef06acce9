use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::reminder::ReminderId;

use super::DispatchError;

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Sent {
        reminder_id: ReminderId,
    },
    /// Email went out but the reminder could not be marked as sent.
    SentUnrecorded {
        reminder_id: ReminderId,
        write_error: String,
    },
    Failed {
        reminder_id: ReminderId,
        reason: String,
        recorded: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderFailure {
    pub reminder_id: ReminderId,
    pub reason: String,
    /// The email was accepted by the transport despite the failure.
    pub delivered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub timestamp: DateTime<Utc>,
    pub processed: usize,
    /// Delivered and recorded as sent.
    pub sent: usize,
    /// Failed sends plus deliveries that could not be recorded.
    pub errors: usize,
    pub write_back_failures: usize,
    pub failures: Vec<ReminderFailure>,
}

impl DispatchReport {
    pub fn new(timestamp: DateTime<Utc>, processed: usize) -> Self {
        Self {
            timestamp,
            processed,
            sent: 0,
            errors: 0,
            write_back_failures: 0,
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Sent { .. } => self.sent += 1,
            ItemOutcome::SentUnrecorded {
                reminder_id,
                write_error,
            } => {
                self.errors += 1;
                self.write_back_failures += 1;
                self.failures.push(ReminderFailure {
                    reminder_id,
                    reason: format!("sent but not recorded: {write_error}"),
                    delivered: true,
                });
            }
            ItemOutcome::Failed {
                reminder_id,
                reason,
                recorded,
            } => {
                self.errors += 1;
                if !recorded {
                    self.write_back_failures += 1;
                }
                self.failures.push(ReminderFailure {
                    reminder_id,
                    reason,
                    delivered: false,
                });
            }
        }
    }
}

/// Outward result of a run, as returned to the scheduler or a manual trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DispatchResponse {
    Completed(CompletedRun),
    Failed(FailedRun),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRun {
    pub success: bool,
    pub message: String,
    pub processed_count: usize,
    pub sent_count: usize,
    pub error_count: usize,
    pub failures: Vec<ReminderFailure>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRun {
    pub success: bool,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl DispatchResponse {
    pub fn new(result: Result<DispatchReport, DispatchError>, timestamp: DateTime<Utc>) -> Self {
        match result {
            Ok(report) => DispatchResponse::Completed(CompletedRun {
                success: true,
                message: format!("Processed {} reminders", report.processed),
                processed_count: report.processed,
                sent_count: report.sent,
                error_count: report.errors,
                failures: report.failures,
                timestamp: report.timestamp,
            }),
            Err(e) => DispatchResponse::Failed(FailedRun {
                success: false,
                error: e.to_string(),
                timestamp,
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DispatchResponse::Completed(_))
    }
}
