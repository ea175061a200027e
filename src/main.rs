//! Fableport Server
//!
//! Content backend for the Fableport reading platform: imports author
//! manuscripts (DOCX) and batch spreadsheets (XLSX) into story chapters,
//! with embedded image relocation to S3-compatible storage.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod import;
mod routes;
mod state;
mod storage;

use config::{Config, StorageProvider};
use db::ImportJobRepository;
use state::AppState;
use storage::{MediaStorage, MemoryStorage, S3Storage};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check(State(_state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "fableport_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Fableport Server v{}", env!("CARGO_PKG_VERSION"));

    // Initialize media storage
    let media: Arc<dyn MediaStorage> = match config.storage.provider {
        StorageProvider::Memory => {
            tracing::warn!("Using in-process media storage; uploads will not survive restarts");
            Arc::new(MemoryStorage::new())
        }
        _ => {
            tracing::info!("S3 endpoint: {}", config.storage.endpoint);
            tracing::info!("S3 bucket: {}", config.storage.bucket);
            Arc::new(
                S3Storage::new(&config.storage)
                    .await
                    .expect("Failed to initialize S3 storage"),
            )
        }
    };

    // Initialize database
    let db_pool = db::create_pool(&config.database.url)
        .await
        .expect("Failed to initialize database");
    tracing::info!("Database initialized at {}", config.database.url);

    // Jobs left mid-flight by a previous process can never finish
    match ImportJobRepository::new(&db_pool).fail_interrupted().await {
        Ok(0) => {}
        Ok(count) => tracing::warn!("Marked {} interrupted import job(s) as failed", count),
        Err(e) => tracing::error!("Failed to sweep interrupted import jobs: {}", e),
    }

    // Create application state
    let app_state = AppState::new(config.clone(), db_pool, media);

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/health", get(health_check))
        .nest("/api/v1/imports", routes::imports::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state.clone());

    // Start server with graceful shutdown
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Fableport Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    app_state.shutdown().await;
    tracing::info!("Server shutdown complete");
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
