use axum::Json;
use serde_json::{json, Value};

/// Service banner served at the root path.
pub async fn index_handler() -> Json<Value> {
    Json(json!({
        "message": "JobMail Insight API",
        "status": "running",
        "version": "1.0.0"
    }))
}

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "healthy", "database": "connected" }))
}
