use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub mod core;
pub mod error_handler;
pub mod middleware_layer;
pub mod routes;
pub mod webhook;

use core::app_state::AppState;
use core::config_loader;
use error_handler::{AppError, AppResult};
use middleware_layer::json_extractor::json_error_mapper;
use mr_reviewer::Application;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", post(routes::webhook_route::webhook_route))
        .route(
            "/reviews",
            post(routes::reviews_route::trigger_review_route),
        )
        .route(
            "/reviews/{task_id}",
            get(routes::reviews_route::get_review_task_route),
        )
        .route("/status", get(routes::status_route::status_route))
        .route("/health", get(routes::health_route::health_route))
        .layer(middleware::from_fn(json_error_mapper))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Waits for either Ctrl+C or SIGTERM. Grounded in the same
/// `tokio::select!`-over-signals shape used elsewhere in this pack's
/// long-running service binaries.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down gracefully"),
        _ = terminate => info!("received SIGTERM, shutting down gracefully"),
    }
}

/// Process entry point: load config, build the pipeline, bind, serve, and
/// shut down cleanly on signal.
pub async fn start() -> AppResult<()> {
    init_tracing();

    let config = config_loader::load_config()?;
    let bind_addr: SocketAddr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()
        .map_err(|_| AppError::BadRequest("invalid BIND_ADDR".to_string()))?;

    let grace_period = config.scheduling.shutdown_grace_period;
    let application = Application::new(config).map_err(AppError::from)?;
    let state = Arc::new(AppState::new(application));
    let supervisor = state.app.supervisor.clone();

    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(AppError::Bind)?;
    info!(%bind_addr, "mr-reviewer api listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .map_err(AppError::Server)?;

    info!(
        grace_period_secs = grace_period.as_secs(),
        "draining in-flight reviews"
    );
    supervisor.shutdown().await;

    Ok(())
}
