use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use uuid::Uuid;

use crate::checks::model::{Cadence, Check, Flip, Ping};
use crate::web::{ApiError, AppState};

pub fn create_check_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_checks).post(create_check))
        .route("/{id}", get(get_check).delete(delete_check))
        .route("/{id}/pause", post(pause_check))
        .route("/{id}/resume", post(resume_check))
        .route("/{id}/flips", get(list_flips))
        .route("/{id}/pings", get(list_pings))
}

#[derive(Debug, Deserialize)]
pub struct CreateCheckRequest {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub cadence: Cadence,
    #[serde(default)]
    pub grace_secs: u32,
    /// IANA timezone name, e.g. "Europe/Berlin". Defaults to UTC.
    #[serde(default = "default_tz")]
    pub tz: Tz,
}

fn default_tz() -> Tz {
    chrono_tz::UTC
}

async fn create_check(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateCheckRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let check = app_state
        .checks
        .create_check(payload.name, payload.tags, payload.cadence, payload.grace_secs, payload.tz)
        .await?;
    Ok((StatusCode::CREATED, Json(check)))
}

async fn list_checks(State(app_state): State<Arc<AppState>>) -> Result<Json<Vec<Check>>, ApiError> {
    Ok(Json(app_state.store.list_checks().await?))
}

async fn get_check(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Check>, ApiError> {
    Ok(Json(app_state.store.load_check(id).await?))
}

async fn delete_check(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    app_state.checks.delete_check(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pause_check(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Check>, ApiError> {
    Ok(Json(app_state.checks.pause(id).await?))
}

async fn resume_check(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Check>, ApiError> {
    Ok(Json(app_state.checks.resume(id).await?))
}

#[derive(Debug, Deserialize)]
struct FlipsQuery {
    since: Option<DateTime<Utc>>,
}

async fn list_flips(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<FlipsQuery>,
) -> Result<Json<Vec<Flip>>, ApiError> {
    // Unknown checks 404 instead of answering with an empty history.
    app_state.store.load_check(id).await?;
    let since = query.since.unwrap_or(DateTime::<Utc>::MIN_UTC);
    Ok(Json(app_state.store.list_flips_since(id, since).await?))
}

#[derive(Debug, Deserialize)]
struct PingsQuery {
    limit: Option<usize>,
}

async fn list_pings(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<PingsQuery>,
) -> Result<Json<Vec<Ping>>, ApiError> {
    app_state.store.load_check(id).await?;
    let limit = query.limit.unwrap_or(100).min(1000);
    Ok(Json(app_state.store.list_pings(id, limit).await?))
}
