mod appwrite;
mod model;
mod reminder_storage;

pub use appwrite::{
    AppwriteConfig, AppwriteReminderStore, DEFAULT_PAGE_SIZE, DEFAULT_REQUEST_TIMEOUT,
};
pub use model::{Condition, NewReminder, ReminderField, ReminderFilter, ReminderPatch, Value};
pub use reminder_storage::{InMemoryReminderStorage, ReminderStore, StoreError};
