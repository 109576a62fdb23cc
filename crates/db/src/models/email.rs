use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Hiring status assigned to a message by the classifier.
///
/// Stored as TEXT using the variant name, which is also what the API emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum Status {
    Rejection,
    Selection,
    Pending,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Rejection => "Rejection",
            Status::Selection => "Selection",
            Status::Pending => "Pending",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted, classified mailbox message. Unique per
/// `(owner_email, gmail_id)`; refreshing the same message updates the
/// classification fields in place and leaves `is_read` and `created_at` alone.
#[derive(Debug, Clone, FromRow)]
pub struct EmailRecord {
    pub id: Uuid,
    pub owner_email: String,
    pub gmail_id: String,
    pub subject: String,
    pub sender: String,
    pub company: String,
    pub status: Status,
    pub date: DateTime<Utc>,
    pub snippet: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Classification fields for an upsert; everything the pipeline derives from
/// one fetched message.
pub struct NewEmail<'a> {
    pub owner_email: &'a str,
    pub gmail_id: &'a str,
    pub subject: &'a str,
    pub sender: &'a str,
    pub company: &'a str,
    pub status: Status,
    pub date: DateTime<Utc>,
    pub snippet: &'a str,
}

/// Per-status row count for one owner, as returned by the aggregation query.
#[derive(Debug, FromRow)]
pub struct StatusCount {
    pub status: Status,
    pub count: i64,
}

// DTO for API responses.
#[derive(Debug, Serialize)]
pub struct EmailDto {
    pub id: String,
    pub gmail_id: String,
    pub subject: String,
    pub sender: String,
    pub company: String,
    pub status: Status,
    pub date: String,
    pub snippet: String,
    pub read: bool,
}

impl From<&EmailRecord> for EmailDto {
    fn from(record: &EmailRecord) -> Self {
        EmailDto {
            id: record.id.to_string(),
            gmail_id: record.gmail_id.clone(),
            subject: record.subject.clone(),
            sender: record.sender.clone(),
            company: record.company.clone(),
            status: record.status,
            date: record.date.format("%Y-%m-%d").to_string(),
            snippet: record.snippet.clone(),
            read: record.is_read,
        }
    }
}

/// Aggregated counts for one owner; zero-filled when nothing is stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total: i64,
    pub rejection: i64,
    pub selection: i64,
    pub pending: i64,
    pub unread: i64,
}
