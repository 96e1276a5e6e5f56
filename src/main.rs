use std::sync::Arc;

use dotenv::dotenv;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pingmon::checks::service::CheckService;
use pingmon::clock::{Clock, SystemClock};
use pingmon::config::AppConfig;
use pingmon::db::store::Store;
use pingmon::notifications::service::NotificationService;
use pingmon::sweeper::sweep_service::SweepService;
use pingmon::web::{create_router, AppState};

fn init_logging() {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily("logs", "pingmon.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Default to `info` with quiet query logging if RUST_LOG is not set.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging();
    dotenv().ok();

    let config = match AppConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let store = build_store(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // --- Notification Dispatcher ---
    let (notifications, dispatch_rx) =
        NotificationService::new(store.clone(), clock.clone(), config.notify.clone());
    tokio::spawn(notifications.clone().run(dispatch_rx));

    // --- Check Service ---
    let checks = Arc::new(CheckService::new(
        store.clone(),
        clock.clone(),
        Some(notifications.clone()),
    ));

    // --- Sweep Task ---
    let sweeper = Arc::new(SweepService::new(store.clone(), clock.clone(), checks.clone()));
    let sweep_interval = config.sweep_interval_secs;
    tokio::spawn(async move {
        sweeper.start_periodic_sweep(sweep_interval).await;
    });

    // --- Axum HTTP Server ---
    let app_state = Arc::new(AppState {
        store,
        checks,
        notifications,
        config: config.clone(),
    });
    let app = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(address = %config.listen_addr, "HTTP server listening.");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install the shutdown signal handler.");
        return;
    }
    info!("Shutdown signal received.");
}

#[cfg(feature = "postgres")]
async fn build_store(config: &AppConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error + Send + Sync>> {
    let store = pingmon::db::postgres::PgStore::connect(&config.database_url).await?;
    info!("Connected to the Postgres store.");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn build_store(_config: &AppConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error + Send + Sync>> {
    info!("Using the in-memory store.");
    Ok(Arc::new(pingmon::db::memory::MemoryStore::new()))
}
