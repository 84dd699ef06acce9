use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    reminder::{Reminder, ReminderStatus},
    storage::{NewReminder, StoreError},
};

#[derive(Debug, Deserialize)]
pub struct DocumentList {
    pub documents: Vec<serde_json::Value>,
}

impl DocumentList {
    pub fn last_id(&self) -> Option<String> {
        self.documents
            .last()
            .and_then(|doc| doc.get("$id"))
            .and_then(|id| id.as_str())
            .map(str::to_owned)
    }

    /// Documents that cannot be decoded are skipped so one bad record does
    /// not block the rest of the collection.
    pub fn into_reminders(self) -> Vec<Reminder> {
        self.documents
            .into_iter()
            .filter_map(|raw| {
                let id = raw
                    .get("$id")
                    .and_then(|id| id.as_str())
                    .unwrap_or("<unknown>")
                    .to_owned();

                let decoded = serde_json::from_value::<ReminderDocument>(raw)
                    .map_err(|e| StoreError::Malformed(e.to_string()))
                    .and_then(Reminder::try_from);

                match decoded {
                    Ok(reminder) => Some(reminder),
                    Err(e) => {
                        log::warn!("Skipping reminder document {}: {}", id, e);
                        None
                    }
                }
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderDocument {
    #[serde(rename = "$id")]
    pub id: String,
    pub user_id: String,
    pub email: String,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    pub reminder_date_time: DateTime<Utc>,
    pub status: String,
    #[serde(default)]
    pub email_sent: bool,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl TryFrom<ReminderDocument> for Reminder {
    type Error = StoreError;

    fn try_from(value: ReminderDocument) -> Result<Self, Self::Error> {
        let status: ReminderStatus = value
            .status
            .parse()
            .map_err(|e: crate::reminder::UnknownStatus| StoreError::Malformed(e.to_string()))?;

        Ok(Self {
            id: value.id,
            user_id: value.user_id,
            email: value.email,
            subject: value.subject,
            description: value.description,
            fire_at: value.reminder_date_time,
            status,
            email_sent: value.email_sent,
            sent_at: value.sent_at,
            last_error: value.last_error,
            timezone: value.timezone,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReminderDocument<'a> {
    pub user_id: &'a str,
    pub email: &'a str,
    pub subject: &'a str,
    pub description: &'a str,
    pub reminder_date_time: DateTime<Utc>,
    pub status: ReminderStatus,
    pub timezone: &'a str,
    pub is_recurring: bool,
    pub email_sent: bool,
}

impl<'a> From<&'a NewReminder> for NewReminderDocument<'a> {
    fn from(value: &'a NewReminder) -> Self {
        Self {
            user_id: &value.user_id,
            email: &value.email,
            subject: &value.subject,
            description: &value.description,
            reminder_date_time: value.fire_at,
            status: ReminderStatus::Pending,
            timezone: &value.timezone,
            is_recurring: false,
            email_sent: false,
        }
    }
}
