use crate::core::{AppConfig, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use db::services::email::PgStore;
use dotenvy::dotenv;
use ingest::pipeline::Pipeline;
use ingest::source::GmailClient;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

mod api;
mod core;

fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(api::health::index_handler))
        .route("/api/health", get(api::health::health_handler))
        .route("/api/emails", get(api::emails::list_emails_handler))
        .route("/api/emails/:id/read", post(api::emails::mark_read_handler))
        .route("/api/stats", get(api::emails::stats_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from a .env file.
    dotenv().ok();
    // Use a JSON logger for production-ready structured logging
    tracing_subscriber::fmt().json().init();

    let config = AppConfig::from_env();

    // --- Database Store ---
    // The pool connects lazily so the API can come up before Postgres.
    let store = PgStore::connect_lazy(&config.database_url)?;
    if let Err(e) = store.run_migrations().await {
        warn!("Skipping migrations, database unreachable: {}", e);
    }

    // --- Mail Source ---
    let source = match config.gmail_api_base.as_deref() {
        Some(base) => GmailClient::with_base_url(base)?,
        None => GmailClient::new()?,
    };

    // --- Shared Application State (for Axum) ---
    let pipeline = Pipeline::new(Arc::new(source), Arc::new(store));
    let state = AppState {
        pipeline: Arc::new(pipeline),
    };

    let app = app(state);

    // --- Start HTTP Server ---
    // Bind to 0.0.0.0 to be reachable in a container
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            info!("HTTP Server listening on {}", addr);
            listener
        }
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
    }

    Ok(())
}
