use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::checks::service::CheckService;
use crate::config::AppConfig;
use crate::db::store::Store;
use crate::notifications::service::NotificationService;

pub mod error;
pub mod routes;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub checks: Arc<CheckService>,
    pub notifications: Arc<NotificationService>,
    pub config: Arc<AppConfig>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check_handler))
        .merge(routes::ping_routes::create_ping_router())
        .nest("/api/checks", routes::check_routes::create_check_router())
        .nest("/api/channels", routes::channel_routes::create_channel_router())
        .with_state(app_state)
        .layer(cors)
}
