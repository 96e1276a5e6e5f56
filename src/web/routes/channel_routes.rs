use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::notifications::models::{Channel, ChannelConfig};
use crate::web::{ApiError, AppState};

pub fn create_channel_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_channels).post(create_channel))
        .route("/{id}", get(get_channel).delete(delete_channel))
        .route("/{id}/test", post(test_channel))
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    pub config: ChannelConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Explicit check scope; omit to apply the channel to every check.
    pub checks: Option<Vec<Uuid>>,
}

fn default_enabled() -> bool {
    true
}

async fn create_channel(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = Channel {
        id: Uuid::new_v4(),
        name: payload.name,
        config: payload.config,
        enabled: payload.enabled,
        checks: payload.checks,
    };
    app_state.store.create_channel(channel.clone()).await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

async fn list_channels(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<Channel>>, ApiError> {
    Ok(Json(app_state.store.list_channels().await?))
}

async fn get_channel(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Channel>, ApiError> {
    Ok(Json(app_state.store.load_channel(id).await?))
}

async fn delete_channel(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    app_state.store.delete_channel(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Pushes a synthetic message through the channel's transport so operators
/// can verify the configuration before relying on it.
async fn test_channel(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = app_state.store.load_channel(id).await?;
    app_state.notifications.send_test(&channel).await?;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "message": "Test notification sent successfully." })),
    ))
}
