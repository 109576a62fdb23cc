use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use db::models::email::{EmailDto, StatsSummary};

use crate::core::{ApiError, AppState, Credential};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// When true, bypass stored records and re-ingest from the mailbox.
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct EmailListResponse {
    pub emails: Vec<EmailDto>,
    pub total: usize,
    pub cached: bool,
}

/// Returns the owner's job emails, ingesting from the mailbox when the
/// store is empty or a refresh was requested.
#[axum::debug_handler]
pub async fn list_emails_handler(
    State(state): State<AppState>,
    Credential(token): Credential,
    Query(params): Query<ListParams>,
) -> Result<Json<EmailListResponse>, ApiError> {
    let owner = state.pipeline.resolve_owner(&token).await?;
    let batch = state
        .pipeline
        .list_emails(&owner, &token, params.refresh)
        .await?;

    let emails: Vec<EmailDto> = batch.records.iter().map(EmailDto::from).collect();
    Ok(Json(EmailListResponse {
        total: emails.len(),
        cached: batch.cached,
        emails,
    }))
}

#[axum::debug_handler]
pub async fn stats_handler(
    State(state): State<AppState>,
    Credential(token): Credential,
) -> Result<Json<StatsSummary>, ApiError> {
    let owner = state.pipeline.resolve_owner(&token).await?;
    let summary = state.pipeline.stats(&owner).await?;
    Ok(Json(summary))
}

/// Flags one stored message as read. Succeeds even when the id matches
/// nothing, mirroring the store's no-op contract.
#[axum::debug_handler]
pub async fn mark_read_handler(
    State(state): State<AppState>,
    Credential(token): Credential,
    Path(email_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let owner = state.pipeline.resolve_owner(&token).await?;
    state.pipeline.mark_read(&owner, &email_id).await?;
    Ok(Json(json!({ "success": true })))
}
