use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    delivery::{DeliveryError, MailTransport, OutgoingMail},
    dispatch::{DispatchJob, DispatchSettings},
    reminder::{ReferenceZone, Reminder, ReminderId, ReminderStatus},
    storage::{
        InMemoryReminderStorage, NewReminder, ReminderFilter, ReminderPatch, ReminderStore,
        StoreError,
    },
};

pub fn utc(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

pub fn reminder(id: &str, email: &str, fire_at: &str) -> Reminder {
    Reminder {
        id: id.to_owned(),
        user_id: "user-1".to_owned(),
        email: email.to_owned(),
        subject: "S".to_owned(),
        description: "D".to_owned(),
        fire_at: utc(fire_at),
        status: ReminderStatus::Pending,
        email_sent: false,
        sent_at: None,
        last_error: None,
        timezone: Some("Asia/Kathmandu".to_owned()),
    }
}

/// Accepts every message except those addressed to `rejected` recipients.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<OutgoingMail>>,
    pub rejected: HashSet<String>,
    pub delay: Option<Duration>,
}

impl RecordingTransport {
    pub fn rejecting(addresses: &[&str]) -> Self {
        Self {
            rejected: addresses.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn sent_to(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.to.clone()).collect()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), DeliveryError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.rejected.contains(&mail.to) {
            return Err(DeliveryError::Transport(format!(
                "550 mailbox unavailable: {}",
                mail.to
            )));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

/// In-memory store with injectable failures that records every update.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryReminderStorage,
    pub fail_query: bool,
    pub fail_updates_for: HashSet<ReminderId>,
    pub updates: Mutex<Vec<(ReminderId, ReminderPatch)>>,
}

impl FlakyStore {
    pub async fn with(reminders: Vec<Reminder>) -> Self {
        let store = Self::default();
        for r in reminders {
            store.inner.put(r).await;
        }
        store
    }

    pub fn updated_ids(&self) -> Vec<ReminderId> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn reminder(&self, id: &str) -> Reminder {
        self.inner.get(&id.to_owned()).await.unwrap().unwrap()
    }
}

#[async_trait]
impl ReminderStore for FlakyStore {
    async fn query(&self, filter: &ReminderFilter) -> Result<Vec<Reminder>, StoreError> {
        if self.fail_query {
            return Err(StoreError::Unavailable("connection refused".to_owned()));
        }
        self.inner.query(filter).await
    }

    async fn get(&self, id: &ReminderId) -> Result<Option<Reminder>, StoreError> {
        self.inner.get(id).await
    }

    async fn insert(&self, reminder: NewReminder) -> Result<Reminder, StoreError> {
        self.inner.insert(reminder).await
    }

    async fn update(&self, id: &ReminderId, patch: ReminderPatch) -> Result<Reminder, StoreError> {
        self.updates.lock().unwrap().push((id.clone(), patch.clone()));
        if self.fail_updates_for.contains(id) {
            return Err(StoreError::Unavailable("write timed out".to_owned()));
        }
        self.inner.update(id, patch).await
    }
}

pub fn job(
    store: Arc<FlakyStore>,
    transport: Arc<RecordingTransport>,
    settings: DispatchSettings,
) -> DispatchJob {
    DispatchJob::new(store, transport, ReferenceZone::default(), settings)
}
