use std::env;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use db::services::error::ServiceError;
use ingest::pipeline::{Pipeline, PipelineError};
use ingest::source::{AccessToken, SourceError};

const DEFAULT_DATABASE_URL: &str = "postgres://localhost:5432/jobmail_insight";
const DEFAULT_PORT: u16 = 5000;

// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

/// Process configuration, read once at startup.
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    /// Overrides the Gmail API root, mainly for local stand-ins.
    pub gmail_api_base: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let gmail_api_base = env::var("GMAIL_API_BASE").ok();

        Self {
            database_url,
            port,
            gmail_api_base,
        }
    }
}

// Define a custom error type for our API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Mail provider unavailable: {0}")]
    Upstream(SourceError),

    #[error("Database error")]
    Database(#[from] ServiceError),
}

impl From<SourceError> for ApiError {
    fn from(error: SourceError) -> Self {
        if error.is_unauthorized() {
            ApiError::Unauthenticated
        } else {
            ApiError::Upstream(error)
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Source(source) => source.into(),
            PipelineError::Store(store) => ApiError::Database(store),
        }
    }
}

// Implement `IntoResponse` for `ApiError` to convert it into an HTTP response.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, "Not authenticated".to_string())
            }
            ApiError::Upstream(source) => {
                error!("mail source failure: {}", source);
                (
                    StatusCode::BAD_GATEWAY,
                    "The mail provider could not be reached.".to_string(),
                )
            }
            ApiError::Database(db_error) => {
                error!("database failure: {}", db_error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected database error occurred.".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}

/// Bearer credential taken from the `Authorization` header.
///
/// Rejects with the unauthenticated error before the handler runs, so
/// handlers only ever see a present (if not necessarily valid) token.
pub struct Credential(pub AccessToken);

#[async_trait]
impl<S> FromRequestParts<S> for Credential
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .filter(|token| !token.is_empty())
            .ok_or(ApiError::Unauthenticated)?;

        Ok(Credential(AccessToken::new(token)))
    }
}
