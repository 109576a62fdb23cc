use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::email::{EmailRecord, NewEmail, StatusCount};
use crate::services::error::ServiceError;

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

const RECORD_COLUMNS: &str =
    "id, owner_email, gmail_id, subject, sender, company, status, date, snippet, is_read, created_at";

/// Storage contract for classified email records. The ingestion pipeline only
/// talks to this trait; the Postgres implementation lives below and tests
/// substitute an in-memory one.
///
/// Implementations must enforce uniqueness on `(owner_email, gmail_id)` so a
/// lost upsert race becomes an overwrite, never a duplicate row.
#[async_trait]
pub trait EmailStore: Send + Sync {
    /// All records for one owner, newest mail date first.
    async fn find_by_owner(&self, owner: &str) -> Result<Vec<EmailRecord>, ServiceError>;

    /// One record by its dedup key, if present.
    async fn find_one(&self, owner: &str, gmail_id: &str)
        -> Result<Option<EmailRecord>, ServiceError>;

    /// Inserts the record or overwrites its classification fields in place.
    /// Must not touch `is_read` or `created_at` on an existing row.
    async fn upsert_classification(&self, email: &NewEmail<'_>)
        -> Result<EmailRecord, ServiceError>;

    /// Flags a record as read; returns the number of rows that matched.
    async fn set_read(&self, owner: &str, gmail_id: &str) -> Result<u64, ServiceError>;

    /// Row counts grouped by status for one owner.
    async fn status_counts(&self, owner: &str) -> Result<Vec<StatusCount>, ServiceError>;

    async fn count_unread(&self, owner: &str) -> Result<i64, ServiceError>;
}

/// Postgres-backed [`EmailStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Builds the pool without connecting. Connections are established on
    /// first use, so a database that is down at boot surfaces as per-request
    /// errors instead of a startup crash.
    pub fn connect_lazy(database_url: &str) -> Result<Self, ServiceError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), ServiceError> {
        tracing::info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl EmailStore for PgStore {
    async fn find_by_owner(&self, owner: &str) -> Result<Vec<EmailRecord>, ServiceError> {
        let records = sqlx::query_as::<_, EmailRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM emails WHERE owner_email = $1 ORDER BY date DESC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn find_one(
        &self,
        owner: &str,
        gmail_id: &str,
    ) -> Result<Option<EmailRecord>, ServiceError> {
        let record = sqlx::query_as::<_, EmailRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM emails WHERE owner_email = $1 AND gmail_id = $2"
        ))
        .bind(owner)
        .bind(gmail_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn upsert_classification(
        &self,
        email: &NewEmail<'_>,
    ) -> Result<EmailRecord, ServiceError> {
        // The update list is confined to classification fields; `is_read` and
        // `created_at` keep their stored values when the row already exists.
        let record = sqlx::query_as::<_, EmailRecord>(&format!(
            r#"
            INSERT INTO emails (id, owner_email, gmail_id, subject, sender, company, status, date, snippet, is_read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, $10)
            ON CONFLICT (owner_email, gmail_id) DO UPDATE SET
                subject = EXCLUDED.subject,
                sender  = EXCLUDED.sender,
                company = EXCLUDED.company,
                status  = EXCLUDED.status,
                date    = EXCLUDED.date,
                snippet = EXCLUDED.snippet
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(email.owner_email)
        .bind(email.gmail_id)
        .bind(email.subject)
        .bind(email.sender)
        .bind(email.company)
        .bind(email.status)
        .bind(email.date)
        .bind(email.snippet)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn set_read(&self, owner: &str, gmail_id: &str) -> Result<u64, ServiceError> {
        let result =
            sqlx::query("UPDATE emails SET is_read = TRUE WHERE owner_email = $1 AND gmail_id = $2")
                .bind(owner)
                .bind(gmail_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    async fn status_counts(&self, owner: &str) -> Result<Vec<StatusCount>, ServiceError> {
        let counts = sqlx::query_as::<_, StatusCount>(
            "SELECT status, COUNT(*) AS count FROM emails WHERE owner_email = $1 GROUP BY status",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }

    async fn count_unread(&self, owner: &str) -> Result<i64, ServiceError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM emails WHERE owner_email = $1 AND is_read = FALSE",
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
