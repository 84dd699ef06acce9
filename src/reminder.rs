use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc, offset::LocalResult};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::NewReminder;

pub type ReminderId = String;
pub type UserId = String;

pub const DEFAULT_REFERENCE_TIMEZONE: Tz = chrono_tz::Asia::Kathmandu;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Sent,
    Cancelled,
    Failed,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Sent => "sent",
            ReminderStatus::Cancelled => "cancelled",
            ReminderStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown reminder status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for ReminderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReminderStatus::Pending),
            "sent" => Ok(ReminderStatus::Sent),
            "cancelled" => Ok(ReminderStatus::Cancelled),
            "failed" => Ok(ReminderStatus::Failed),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: ReminderId,
    pub user_id: UserId,
    pub email: String,
    pub subject: String,
    pub description: String,
    pub fire_at: DateTime<Utc>,
    pub status: ReminderStatus,
    pub email_sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub timezone: Option<String>,
}

impl Reminder {
    /// Pending, not yet emailed and scheduled at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ReminderStatus::Pending && !self.email_sent && self.fire_at <= now
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ZoneError {
    #[error("unknown timezone `{0}`")]
    UnknownZone(String),

    #[error("{local} does not exist in {zone}")]
    NonExistentLocalTime { local: NaiveDateTime, zone: Tz },
}

/// Civil timezone users enter reminder times in. Instants are stored in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceZone(Tz);

impl Default for ReferenceZone {
    fn default() -> Self {
        Self(DEFAULT_REFERENCE_TIMEZONE)
    }
}

impl FromStr for ReferenceZone {
    type Err = ZoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Tz>()
            .map(Self)
            .map_err(|_| ZoneError::UnknownZone(s.to_owned()))
    }
}

impl ReferenceZone {
    pub fn new(tz: Tz) -> Self {
        Self(tz)
    }

    pub fn tz(&self) -> Tz {
        self.0
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Ambiguous wall-clock times resolve to the earliest instant; times
    /// skipped by a DST jump are rejected.
    pub fn to_instant(&self, local: NaiveDateTime) -> Result<DateTime<Utc>, ZoneError> {
        match self.0.from_local_datetime(&local) {
            LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
            LocalResult::None => Err(ZoneError::NonExistentLocalTime {
                local,
                zone: self.0,
            }),
        }
    }

    pub fn render(&self, instant: DateTime<Utc>) -> String {
        format!(
            "{} ({})",
            instant
                .with_timezone(&self.0)
                .format("%B %-d, %Y at %-I:%M %p"),
            self.name()
        )
    }
}

/// Reminder as entered by a user, with the fire time in the reference zone.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderDraft {
    pub user_id: UserId,
    pub email: String,
    pub subject: String,
    pub description: String,
    pub reminder_date_time: NaiveDateTime,
}

#[derive(Debug, Error, Serialize, PartialEq, Default)]
#[error("reminder has {} invalid field(s)", .errors.len())]
pub struct ValidationErrors {
    pub errors: BTreeMap<&'static str, String>,
}

impl ValidationErrors {
    fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.insert(field, message.into());
    }

    pub fn has(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }
}

impl ReminderDraft {
    pub fn validate(
        self,
        zone: &ReferenceZone,
        now: DateTime<Utc>,
    ) -> Result<NewReminder, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        if self.email.trim().parse::<lettre::Address>().is_err() {
            errors.add("email", "Valid email is required");
        }
        if self.subject.trim().is_empty() {
            errors.add("subject", "Subject is required");
        }
        if self.description.trim().is_empty() {
            errors.add("description", "Description is required");
        }

        let fire_at = match zone.to_instant(self.reminder_date_time) {
            Ok(fire_at) if fire_at <= now => {
                errors.add("reminderDateTime", "Reminder time must be in the future");
                None
            }
            Ok(fire_at) => Some(fire_at),
            Err(e) => {
                errors.add("reminderDateTime", e.to_string());
                None
            }
        };

        match fire_at {
            Some(fire_at) if errors.errors.is_empty() => Ok(NewReminder {
                user_id: self.user_id,
                email: self.email.trim().to_owned(),
                subject: self.subject,
                description: self.description,
                fire_at,
                timezone: zone.name().to_owned(),
            }),
            _ => Err(errors),
        }
    }
}
