use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::any;
use axum::Router;
use tracing::{debug, error};
use uuid::Uuid;

use crate::checks::model::PingKind;
use crate::checks::service::{CheckError, MAX_BODY_BYTES};
use crate::db::store::StoreError;
use crate::web::AppState;

/// Ping ingestion. Any HTTP method is accepted and responses are plain
/// text: `200 OK` or `404 not found`.
pub fn create_ping_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ping/{id}", any(ping_success))
        .route("/ping/{id}/fail", any(ping_fail))
        .route("/ping/{id}/start", any(ping_start))
        .route("/ping/{id}/log", any(ping_log))
        .route("/ping/{id}/{exit_status}", any(ping_exit_status))
}

async fn ping_success(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    ingest(app_state, id, PingKind::Success, None, body).await
}

async fn ping_fail(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    ingest(app_state, id, PingKind::Fail, None, body).await
}

async fn ping_start(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    ingest(app_state, id, PingKind::Start, None, body).await
}

async fn ping_log(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    ingest(app_state, id, PingKind::Log, None, body).await
}

/// The exit-status form: `/ping/{id}/0` reports success, any other value a
/// failure, mirroring process exit semantics.
async fn ping_exit_status(
    State(app_state): State<Arc<AppState>>,
    Path((id, exit_status)): Path<(Uuid, u8)>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let kind = if exit_status == 0 { PingKind::Success } else { PingKind::Fail };
    ingest(app_state, id, kind, Some(i32::from(exit_status)), body).await
}

async fn ingest(
    app_state: Arc<AppState>,
    id: Uuid,
    kind: PingKind,
    exit_status: Option<i32>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let body = if body.is_empty() {
        None
    } else {
        let capped = &body[..body.len().min(MAX_BODY_BYTES)];
        Some(String::from_utf8_lossy(capped).into_owned())
    };

    match app_state.checks.record_ping(id, kind, exit_status, body).await {
        Ok(outcome) => {
            debug!(check_id = %id, kind = %kind, status = %outcome.status, "Ping accepted.");
            (StatusCode::OK, "OK")
        }
        Err(CheckError::Store(StoreError::CheckNotFound)) => (StatusCode::NOT_FOUND, "not found"),
        Err(e) => {
            error!(check_id = %id, error = %e, "Ping ingestion failed.");
            (StatusCode::INTERNAL_SERVER_ERROR, "error")
        }
    }
}
