mod model;

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use model::{DocumentList, NewReminderDocument, ReminderDocument};
use reqwest::{
    StatusCode,
    header::{HeaderMap, HeaderValue},
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::json;

use crate::reminder::{Reminder, ReminderId};

use super::{
    model::{Condition, NewReminder, ReminderFilter, ReminderPatch},
    reminder_storage::{ReminderStore, StoreError},
};

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct AppwriteConfig {
    /// Base API url, e.g. `https://cloud.appwrite.io/v1`.
    pub endpoint: String,
    pub project_id: String,
    pub api_key: String,
    pub database_id: String,
    pub collection_id: String,
    pub page_size: u32,
    pub request_timeout: Duration,
}

/// Reminder collection in an Appwrite database, accessed over its REST API.
pub struct AppwriteReminderStore {
    client: reqwest::Client,
    documents_url: String,
    page_size: u32,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl AppwriteReminderStore {
    pub fn new(config: AppwriteConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Appwrite-Project",
            HeaderValue::from_str(&config.project_id).context("invalid Appwrite project id")?,
        );
        let mut api_key =
            HeaderValue::from_str(&config.api_key).context("invalid Appwrite API key")?;
        api_key.set_sensitive(true);
        headers.insert("X-Appwrite-Key", api_key);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .context("could not build Appwrite HTTP client")?;

        let documents_url = format!(
            "{}/databases/{}/collections/{}/documents",
            config.endpoint.trim_end_matches('/'),
            config.database_id,
            config.collection_id
        );

        Ok(Self {
            client,
            documents_url,
            page_size: config.page_size.max(1),
        })
    }

    fn document_url(&self, id: &ReminderId) -> String {
        format!("{}/{}", self.documents_url, id)
    }

    async fn fetch_page(&self, queries: &[String]) -> Result<DocumentList, StoreError> {
        let params: Vec<(&str, &str)> = queries.iter().map(|q| ("queries[]", q.as_str())).collect();
        let response = self
            .client
            .get(&self.documents_url)
            .query(&params)
            .send()
            .await
            .map_err(unavailable)?;

        read_json(response).await
    }
}

#[async_trait]
impl ReminderStore for AppwriteReminderStore {
    async fn query(&self, filter: &ReminderFilter) -> Result<Vec<Reminder>, StoreError> {
        let base: Vec<String> = filter.conditions.iter().map(encode_condition).collect();
        let limit = json!({ "method": "limit", "values": [self.page_size] }).to_string();

        let mut reminders = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut queries = base.clone();
            queries.push(limit.clone());
            if let Some(cursor) = &cursor {
                queries.push(json!({ "method": "cursorAfter", "values": [cursor] }).to_string());
            }

            let page = self.fetch_page(&queries).await?;
            let page_len = page.documents.len();
            cursor = page.last_id();
            reminders.extend(page.into_reminders());

            if page_len < self.page_size as usize || cursor.is_none() {
                break;
            }
        }

        Ok(reminders)
    }

    async fn get(&self, id: &ReminderId) -> Result<Option<Reminder>, StoreError> {
        let response = self
            .client
            .get(self.document_url(id))
            .send()
            .await
            .map_err(unavailable)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let document: ReminderDocument = read_json(response).await?;
        document.try_into().map(Some)
    }

    async fn insert(&self, reminder: NewReminder) -> Result<Reminder, StoreError> {
        let body = json!({
            "documentId": "unique()",
            "data": NewReminderDocument::from(&reminder),
        });
        let response = self
            .client
            .post(&self.documents_url)
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;

        let document: ReminderDocument = read_json(response).await?;
        document.try_into()
    }

    async fn update(&self, id: &ReminderId, patch: ReminderPatch) -> Result<Reminder, StoreError> {
        let response = self
            .client
            .patch(self.document_url(id))
            .json(&json!({ "data": patch }))
            .send()
            .await
            .map_err(unavailable)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id.clone()));
        }

        let document: ReminderDocument = read_json(response).await?;
        document.try_into()
    }
}

fn encode_condition(condition: &Condition) -> String {
    let (method, field, value) = match condition {
        Condition::Equal(field, value) => ("equal", field, value),
        Condition::LessThanEqual(field, value) => ("lessThanEqual", field, value),
    };

    json!({
        "method": method,
        "attribute": field.attribute(),
        "values": [value.to_json()],
    })
    .to_string()
}

fn unavailable(error: reqwest::Error) -> StoreError {
    StoreError::Unavailable(error.to_string())
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StoreError> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.message)
            .unwrap_or_default();

        return Err(if status.is_server_error() {
            StoreError::Unavailable(format!("HTTP {}: {}", status.as_u16(), message))
        } else {
            StoreError::Rejected {
                status: status.as_u16(),
                message,
            }
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| StoreError::Malformed(e.to_string()))
}
