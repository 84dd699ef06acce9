use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::reminder::{Reminder, ReminderId, ReminderStatus};

use super::model::{NewReminder, ReminderFilter, ReminderPatch};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reminder store is unavailable: {0}")]
    Unavailable(String),

    #[error("reminder {0} does not exist")]
    NotFound(ReminderId),

    #[error("reminder store rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed reminder document: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Snapshot of every reminder matching `filter`.
    async fn query(&self, filter: &ReminderFilter) -> Result<Vec<Reminder>, StoreError>;
    async fn get(&self, id: &ReminderId) -> Result<Option<Reminder>, StoreError>;
    async fn insert(&self, reminder: NewReminder) -> Result<Reminder, StoreError>;
    async fn update(&self, id: &ReminderId, patch: ReminderPatch) -> Result<Reminder, StoreError>;
}

struct InMemoryReminderStore {
    current_id: u64,
    storage: HashMap<ReminderId, Reminder>,
}

pub struct InMemoryReminderStorage {
    store: RwLock<InMemoryReminderStore>,
}

impl Default for InMemoryReminderStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryReminderStorage {
    pub fn new() -> Self {
        InMemoryReminderStorage {
            store: RwLock::new(InMemoryReminderStore {
                current_id: 0,
                storage: HashMap::new(),
            }),
        }
    }

    /// Stores a reminder as-is, replacing any reminder with the same id.
    pub async fn put(&self, reminder: Reminder) {
        let mut store = self.store.write().await;
        store.storage.insert(reminder.id.clone(), reminder);
    }

    pub async fn all(&self) -> Vec<Reminder> {
        let store = self.store.read().await;
        store.storage.values().cloned().collect()
    }
}

#[async_trait]
impl ReminderStore for InMemoryReminderStorage {
    async fn query(&self, filter: &ReminderFilter) -> Result<Vec<Reminder>, StoreError> {
        let store = self.store.read().await;
        let mut reminders: Vec<Reminder> = store
            .storage
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        reminders.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.id.cmp(&b.id)));

        Ok(reminders)
    }

    async fn get(&self, id: &ReminderId) -> Result<Option<Reminder>, StoreError> {
        let store = self.store.read().await;
        Ok(store.storage.get(id).cloned())
    }

    async fn insert(&self, reminder: NewReminder) -> Result<Reminder, StoreError> {
        let mut store = self.store.write().await;
        let id = format!("mem-{}", store.current_id);
        let NewReminder {
            user_id,
            email,
            subject,
            description,
            fire_at,
            timezone,
        } = reminder;
        let created = Reminder {
            id: id.clone(),
            user_id,
            email,
            subject,
            description,
            fire_at,
            status: ReminderStatus::Pending,
            email_sent: false,
            sent_at: None,
            last_error: None,
            timezone: Some(timezone),
        };

        store.storage.insert(id.clone(), created.clone());
        store.current_id += 1;
        log::debug!("Inserted reminder {}", id);

        Ok(created)
    }

    async fn update(&self, id: &ReminderId, patch: ReminderPatch) -> Result<Reminder, StoreError> {
        let mut store = self.store.write().await;
        match store.storage.get_mut(id) {
            Some(reminder) => {
                patch.apply(reminder);
                Ok(reminder.clone())
            }
            None => Err(StoreError::NotFound(id.clone())),
        }
    }
}
