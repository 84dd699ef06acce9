use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::{
    dispatch::{DispatchJob, DispatchResponse},
    reminder::{Reminder, ReminderDraft, ReminderId, ReminderStatus, ValidationErrors},
    scheduling::DispatchScheduler,
    storage::{ReminderFilter, ReminderPatch, StoreError},
};

#[derive(Clone)]
pub struct AppState {
    pub job: Arc<DispatchJob>,
    pub api_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("reminder {0} does not exist")]
    NotFound(ReminderId),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => ApiError::NotFound(id),
            other => ApiError::Store(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(_) => StatusCode::BAD_GATEWAY,
        };

        let body = match &self {
            ApiError::Validation(errors) => json!({ "error": self.to_string(), "fields": errors.errors }),
            _ => json!({ "error": self.to_string() }),
        };

        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        }

        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/dispatch", post(trigger_dispatch))
        .route("/reminders", post(create_reminder))
        .route("/reminders/failed", get(list_failed))
        .route("/reminders/{id}/retry", post(retry_reminder))
        .route("/reminders/{id}/cancel", post(cancel_reminder))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token))
        .route("/health", get(health_check))
        .with_state(state)
}

pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Listening for manual dispatch triggers on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancellation_token.cancelled().await })
        .await?;

    Ok(())
}

async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if provided == Some(expected) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn trigger_dispatch(State(state): State<AppState>) -> (StatusCode, Json<DispatchResponse>) {
    log::info!("Manual dispatch triggered");
    let response = DispatchScheduler::run_once(&state.job).await;
    let status = if response.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (status, Json(response))
}

async fn list_failed(State(state): State<AppState>) -> Result<Json<Vec<Reminder>>, ApiError> {
    let failed = state
        .job
        .store()
        .query(&ReminderFilter::with_status(ReminderStatus::Failed))
        .await?;

    Ok(Json(failed))
}

async fn retry_reminder(
    State(state): State<AppState>,
    Path(id): Path<ReminderId>,
) -> Result<Json<Reminder>, ApiError> {
    transition(&state, id, ReminderStatus::Failed, ReminderPatch::reset_to_pending()).await
}

async fn cancel_reminder(
    State(state): State<AppState>,
    Path(id): Path<ReminderId>,
) -> Result<Json<Reminder>, ApiError> {
    transition(&state, id, ReminderStatus::Pending, ReminderPatch::cancel()).await
}

async fn transition(
    state: &AppState,
    id: ReminderId,
    required: ReminderStatus,
    patch: ReminderPatch,
) -> Result<Json<Reminder>, ApiError> {
    let store = state.job.store();
    let reminder = store
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(id.clone()))?;

    if reminder.status != required {
        return Err(ApiError::Conflict(format!(
            "reminder {} is {}, expected {}",
            id, reminder.status, required
        )));
    }

    let updated = store.update(&id, patch).await?;
    log::info!("Reminder {} moved from {} to {}", id, required, updated.status);

    Ok(Json(updated))
}

async fn create_reminder(
    State(state): State<AppState>,
    Json(draft): Json<ReminderDraft>,
) -> Result<(StatusCode, Json<Reminder>), ApiError> {
    let new_reminder = draft.validate(state.job.zone(), Utc::now())?;
    let created = state.job.store().insert(new_reminder).await?;
    log::info!("Created reminder {} for {}", created.id, created.fire_at);

    Ok((StatusCode::CREATED, Json(created)))
}
