use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::reminder::{Reminder, ReminderStatus, UserId};

#[derive(Debug, Clone, PartialEq)]
pub struct NewReminder {
    pub user_id: UserId,
    pub email: String,
    pub subject: String,
    pub description: String,
    pub fire_at: DateTime<Utc>,
    pub timezone: String,
}

/// Partial update. `None` leaves a field untouched; `last_error: Some(None)`
/// clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReminderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_sent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<Option<String>>,
}

impl ReminderPatch {
    pub fn mark_sent(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(ReminderStatus::Sent),
            email_sent: Some(true),
            sent_at: Some(now),
            ..Default::default()
        }
    }

    /// Leaves `email_sent` untouched.
    pub fn mark_failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(ReminderStatus::Failed),
            last_error: Some(Some(reason.into())),
            ..Default::default()
        }
    }

    pub fn reset_to_pending() -> Self {
        Self {
            status: Some(ReminderStatus::Pending),
            last_error: Some(None),
            ..Default::default()
        }
    }

    pub fn cancel() -> Self {
        Self {
            status: Some(ReminderStatus::Cancelled),
            ..Default::default()
        }
    }

    pub fn apply(self, reminder: &mut Reminder) {
        if let Some(status) = self.status {
            reminder.status = status;
        }
        if let Some(email_sent) = self.email_sent {
            reminder.email_sent = email_sent;
        }
        if let Some(sent_at) = self.sent_at {
            reminder.sent_at = Some(sent_at);
        }
        if let Some(last_error) = self.last_error {
            reminder.last_error = last_error;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderField {
    Status,
    EmailSent,
    FireAt,
    UserId,
}

impl ReminderField {
    /// Attribute name in the document store.
    pub fn attribute(&self) -> &'static str {
        match self {
            ReminderField::Status => "status",
            ReminderField::EmailSent => "emailSent",
            ReminderField::FireAt => "reminderDateTime",
            ReminderField::UserId => "userId",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Status(ReminderStatus),
    Bool(bool),
    Instant(DateTime<Utc>),
    Text(String),
}

impl Value {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Status(status) => serde_json::Value::from(status.as_str()),
            Value::Bool(b) => serde_json::Value::from(*b),
            Value::Instant(instant) => {
                serde_json::Value::from(instant.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Value::Text(text) => serde_json::Value::from(text.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equal(ReminderField, Value),
    LessThanEqual(ReminderField, Value),
}

impl Condition {
    pub fn matches(&self, reminder: &Reminder) -> bool {
        match self {
            Condition::Equal(field, value) => match (field, value) {
                (ReminderField::Status, Value::Status(s)) => reminder.status == *s,
                (ReminderField::EmailSent, Value::Bool(b)) => reminder.email_sent == *b,
                (ReminderField::FireAt, Value::Instant(t)) => reminder.fire_at == *t,
                (ReminderField::UserId, Value::Text(id)) => reminder.user_id == *id,
                _ => false,
            },
            Condition::LessThanEqual(field, value) => match (field, value) {
                (ReminderField::FireAt, Value::Instant(t)) => reminder.fire_at <= *t,
                _ => false,
            },
        }
    }
}

/// Conjunction of conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReminderFilter {
    pub conditions: Vec<Condition>,
}

impl ReminderFilter {
    pub fn due_at(now: DateTime<Utc>) -> Self {
        Self::default()
            .and(Condition::Equal(
                ReminderField::Status,
                Value::Status(ReminderStatus::Pending),
            ))
            .and(Condition::Equal(ReminderField::EmailSent, Value::Bool(false)))
            .and(Condition::LessThanEqual(
                ReminderField::FireAt,
                Value::Instant(now),
            ))
    }

    pub fn with_status(status: ReminderStatus) -> Self {
        Self::default().and(Condition::Equal(ReminderField::Status, Value::Status(status)))
    }

    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn matches(&self, reminder: &Reminder) -> bool {
        self.conditions.iter().all(|c| c.matches(reminder))
    }
}
