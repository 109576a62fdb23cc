use std::sync::Arc;

use tracing::{debug, instrument};

use db::models::email::{EmailRecord, NewEmail, StatsSummary, Status, StatusCount};
use db::services::email::EmailStore;
use db::services::error::ServiceError;

use crate::classify::classify;
use crate::company::extract_company;
use crate::normalize::normalize;
use crate::source::{AccessToken, MailSource, Message, SourceError, JOB_QUERY};

/// Upper bound on candidate messages pulled per refresh.
pub const MAX_CANDIDATES: u32 = 100;
/// Stored snippets are clipped to this many characters.
pub const SNIPPET_LIMIT: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] ServiceError),
}

/// Result of [`Pipeline::list_emails`]: the records plus whether they
/// came straight from the store.
#[derive(Debug)]
pub struct EmailBatch {
    pub records: Vec<EmailRecord>,
    pub cached: bool,
}

/// Feed-forward ingestion pass over one owner's mailbox.
///
/// Holds no per-request state of its own; everything durable lives in
/// the store, everything fresh comes from the mail source.
pub struct Pipeline {
    source: Arc<dyn MailSource>,
    store: Arc<dyn EmailStore>,
}

impl Pipeline {
    pub fn new(source: Arc<dyn MailSource>, store: Arc<dyn EmailStore>) -> Self {
        Self { source, store }
    }

    /// Resolves the owner identity behind a delegated credential.
    pub async fn resolve_owner(&self, credential: &AccessToken) -> Result<String, PipelineError> {
        Ok(self.source.account_identity(credential).await?)
    }

    /// Returns the owner's job emails, newest first when served from the
    /// store.
    ///
    /// Without `force_refresh`, existing records win and the mailbox is
    /// not contacted. Otherwise up to [`MAX_CANDIDATES`] matching
    /// messages are fetched, classified and upserted one by one, in the
    /// source's listing order. A mid-batch source failure aborts the
    /// call; records upserted before the failure stay durable, so a
    /// retry converges on the same state.
    #[instrument(skip(self, credential))]
    pub async fn list_emails(
        &self,
        owner: &str,
        credential: &AccessToken,
        force_refresh: bool,
    ) -> Result<EmailBatch, PipelineError> {
        if !force_refresh {
            let cached = self.store.find_by_owner(owner).await?;
            if !cached.is_empty() {
                debug!(total = cached.len(), "serving records from store");
                return Ok(EmailBatch {
                    records: cached,
                    cached: true,
                });
            }
        }

        let candidates = self
            .source
            .list_candidates(credential, JOB_QUERY, MAX_CANDIDATES)
            .await?;
        debug!(candidates = candidates.len(), "refreshing from mail source");

        let mut records = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !force_refresh {
                if let Some(existing) = self.store.find_one(owner, &candidate.id).await? {
                    records.push(existing);
                    continue;
                }
            }
            let message = self.source.fetch_message(credential, &candidate.id).await?;
            let record = self.ingest(owner, &message).await?;
            records.push(record);
        }

        Ok(EmailBatch {
            records,
            cached: false,
        })
    }

    /// Normalizes, classifies and upserts a single message.
    async fn ingest(&self, owner: &str, message: &Message) -> Result<EmailRecord, PipelineError> {
        let raw = normalize(message);
        let status = classify(&raw.subject, raw.classification_text());
        let company = extract_company(&raw.sender);
        let snippet: String = raw.classification_text().chars().take(SNIPPET_LIMIT).collect();

        let record = self
            .store
            .upsert_classification(&NewEmail {
                owner_email: owner,
                gmail_id: &raw.id,
                subject: &raw.subject,
                sender: &raw.sender,
                company: &company,
                status,
                date: raw.date,
                snippet: &snippet,
            })
            .await?;
        Ok(record)
    }

    /// Flags one stored message as read. Unknown ids are a no-op, not an
    /// error.
    pub async fn mark_read(&self, owner: &str, gmail_id: &str) -> Result<(), PipelineError> {
        let updated = self.store.set_read(owner, gmail_id).await?;
        if updated == 0 {
            debug!(gmail_id, "mark-read matched no stored message");
        }
        Ok(())
    }

    /// Aggregates the owner's stored records into a zero-filled summary.
    pub async fn stats(&self, owner: &str) -> Result<StatsSummary, PipelineError> {
        let counts = self.store.status_counts(owner).await?;
        let mut summary = StatsSummary::default();
        for StatusCount { status, count } in counts {
            summary.total += count;
            match status {
                Status::Rejection => summary.rejection = count,
                Status::Selection => summary.selection = count,
                Status::Pending => summary.pending = count,
            }
        }
        summary.unread = self.store.count_unread(owner).await?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Header, MessagePart, MessageRef, PartBody};
    use async_trait::async_trait;
    use base64::engine::general_purpose::URL_SAFE;
    use base64::Engine;
    use chrono::Utc;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    const OWNER: &str = "me@example.com";

    struct MemStore {
        rows: Mutex<Vec<EmailRecord>>,
    }

    impl MemStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                rows: Mutex::new(Vec::new()),
            })
        }

        fn snapshot(&self) -> Vec<EmailRecord> {
            self.rows.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EmailStore for MemStore {
        async fn find_by_owner(&self, owner: &str) -> Result<Vec<EmailRecord>, ServiceError> {
            let mut rows: Vec<EmailRecord> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|row| row.owner_email == owner)
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.date.cmp(&a.date));
            Ok(rows)
        }

        async fn find_one(
            &self,
            owner: &str,
            gmail_id: &str,
        ) -> Result<Option<EmailRecord>, ServiceError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|row| row.owner_email == owner && row.gmail_id == gmail_id)
                .cloned())
        }

        async fn upsert_classification(
            &self,
            email: &NewEmail<'_>,
        ) -> Result<EmailRecord, ServiceError> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(row) = rows
                .iter_mut()
                .find(|row| row.owner_email == email.owner_email && row.gmail_id == email.gmail_id)
            {
                row.subject = email.subject.to_string();
                row.sender = email.sender.to_string();
                row.company = email.company.to_string();
                row.status = email.status;
                row.date = email.date;
                row.snippet = email.snippet.to_string();
                return Ok(row.clone());
            }

            let row = EmailRecord {
                id: Uuid::new_v4(),
                owner_email: email.owner_email.to_string(),
                gmail_id: email.gmail_id.to_string(),
                subject: email.subject.to_string(),
                sender: email.sender.to_string(),
                company: email.company.to_string(),
                status: email.status,
                date: email.date,
                snippet: email.snippet.to_string(),
                is_read: false,
                created_at: Utc::now(),
            };
            rows.push(row.clone());
            Ok(row)
        }

        async fn set_read(&self, owner: &str, gmail_id: &str) -> Result<u64, ServiceError> {
            let mut rows = self.rows.lock().unwrap();
            match rows
                .iter_mut()
                .find(|row| row.owner_email == owner && row.gmail_id == gmail_id)
            {
                Some(row) => {
                    row.is_read = true;
                    Ok(1)
                }
                None => Ok(0),
            }
        }

        async fn status_counts(&self, owner: &str) -> Result<Vec<StatusCount>, ServiceError> {
            let rows = self.rows.lock().unwrap();
            let mut counts: Vec<StatusCount> = Vec::new();
            for row in rows.iter().filter(|row| row.owner_email == owner) {
                match counts.iter_mut().find(|entry| entry.status == row.status) {
                    Some(entry) => entry.count += 1,
                    None => counts.push(StatusCount {
                        status: row.status,
                        count: 1,
                    }),
                }
            }
            Ok(counts)
        }

        async fn count_unread(&self, owner: &str) -> Result<i64, ServiceError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|row| row.owner_email == owner && !row.is_read)
                .count() as i64)
        }
    }

    /// Store whose owner-wide listing trails its per-id lookups, as when
    /// a concurrent request upserts between the two queries.
    struct UnlistedStore {
        inner: Arc<MemStore>,
    }

    #[async_trait]
    impl EmailStore for UnlistedStore {
        async fn find_by_owner(&self, _owner: &str) -> Result<Vec<EmailRecord>, ServiceError> {
            Ok(Vec::new())
        }

        async fn find_one(
            &self,
            owner: &str,
            gmail_id: &str,
        ) -> Result<Option<EmailRecord>, ServiceError> {
            self.inner.find_one(owner, gmail_id).await
        }

        async fn upsert_classification(
            &self,
            email: &NewEmail<'_>,
        ) -> Result<EmailRecord, ServiceError> {
            self.inner.upsert_classification(email).await
        }

        async fn set_read(&self, owner: &str, gmail_id: &str) -> Result<u64, ServiceError> {
            self.inner.set_read(owner, gmail_id).await
        }

        async fn status_counts(&self, owner: &str) -> Result<Vec<StatusCount>, ServiceError> {
            self.inner.status_counts(owner).await
        }

        async fn count_unread(&self, owner: &str) -> Result<i64, ServiceError> {
            self.inner.count_unread(owner).await
        }
    }

    struct FakeSource {
        messages: Vec<Message>,
        extra_candidates: Vec<String>,
        list_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(messages: Vec<Message>) -> Arc<Self> {
            Arc::new(Self {
                messages,
                extra_candidates: Vec::new(),
                list_calls: AtomicUsize::new(0),
                fetch_calls: AtomicUsize::new(0),
            })
        }

        /// Candidate ids with no fetchable message behind them, to force
        /// a mid-batch failure.
        fn with_missing(messages: Vec<Message>, missing: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                messages,
                extra_candidates: missing.iter().map(|id| id.to_string()).collect(),
                list_calls: AtomicUsize::new(0),
                fetch_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MailSource for FakeSource {
        async fn account_identity(&self, _credential: &AccessToken) -> Result<String, SourceError> {
            Ok(OWNER.to_string())
        }

        async fn list_candidates(
            &self,
            _credential: &AccessToken,
            _query: &str,
            max_results: u32,
        ) -> Result<Vec<MessageRef>, SourceError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .messages
                .iter()
                .map(|message| message.id.clone())
                .chain(self.extra_candidates.iter().cloned())
                .take(max_results as usize)
                .map(|id| MessageRef { id })
                .collect())
        }

        async fn fetch_message(
            &self,
            _credential: &AccessToken,
            id: &str,
        ) -> Result<Message, SourceError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            self.messages
                .iter()
                .find(|message| message.id == id)
                .cloned()
                .ok_or(SourceError::Status(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }

    fn header(name: &str, value: &str) -> Header {
        Header {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn message(id: &str, subject: &str, sender: &str, date: &str, snippet: &str) -> Message {
        Message {
            id: id.to_string(),
            snippet: snippet.to_string(),
            payload: Some(MessagePart {
                headers: vec![
                    header("Subject", subject),
                    header("From", sender),
                    header("Date", date),
                ],
                ..Default::default()
            }),
        }
    }

    fn token() -> AccessToken {
        AccessToken::new("test-token")
    }

    fn pipeline(source: Arc<FakeSource>, store: Arc<MemStore>) -> Pipeline {
        Pipeline::new(source, store)
    }

    #[tokio::test]
    async fn empty_store_pulls_from_source_in_listing_order() {
        let source = FakeSource::new(vec![
            message(
                "m1",
                "Interview invitation",
                "Acme <hr@acme.com>",
                "Mon, 01 Jan 2024 09:00:00 +0000",
                "we would like to schedule an interview",
            ),
            message(
                "m2",
                "Application update",
                "careers@stripe.com",
                "Tue, 02 Jan 2024 09:00:00 +0000",
                "unfortunately we regret to inform you",
            ),
        ]);
        let store = MemStore::new();
        let pipeline = pipeline(source.clone(), store.clone());

        let batch = pipeline.list_emails(OWNER, &token(), false).await.unwrap();

        assert!(!batch.cached);
        assert_eq!(batch.records.len(), 2);
        let ids: Vec<&str> = batch.records.iter().map(|r| r.gmail_id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2"]);
        assert_eq!(batch.records[0].status, Status::Selection);
        assert_eq!(batch.records[0].company, "Acme");
        assert_eq!(batch.records[1].status, Status::Rejection);
        assert_eq!(batch.records[1].company, "Stripe");
    }

    #[tokio::test]
    async fn populated_store_short_circuits_the_source() {
        let source = FakeSource::new(vec![message(
            "m1",
            "Interview",
            "hr@acme.com",
            "Mon, 01 Jan 2024 09:00:00 +0000",
            "interview",
        )]);
        let store = MemStore::new();
        let pipeline = pipeline(source.clone(), store.clone());

        pipeline.list_emails(OWNER, &token(), true).await.unwrap();
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);

        let batch = pipeline.list_emails(OWNER, &token(), false).await.unwrap();
        assert!(batch.cached);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_forced_ingest_reuses_stored_rows_without_fetching() {
        let source = FakeSource::new(vec![message(
            "m1",
            "Fresh fetch",
            "jobs@globex.com",
            "Tue, 02 Jan 2024 09:00:00 +0000",
            "unfortunately we regret this",
        )]);
        let inner = MemStore::new();
        let seeded = inner
            .upsert_classification(&NewEmail {
                owner_email: OWNER,
                gmail_id: "m1",
                subject: "Already ingested",
                sender: "hr@acme.com",
                company: "Acme",
                status: Status::Selection,
                date: Utc::now(),
                snippet: "stored by an earlier pass",
            })
            .await
            .unwrap();
        let pipeline = Pipeline::new(
            source.clone(),
            Arc::new(UnlistedStore {
                inner: inner.clone(),
            }),
        );

        let batch = pipeline.list_emails(OWNER, &token(), false).await.unwrap();

        assert!(!batch.cached);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].id, seeded.id);
        assert_eq!(batch.records[0].subject, "Already ingested");
        assert_eq!(batch.records[0].status, Status::Selection);
        assert_eq!(source.fetch_calls.load(Ordering::SeqCst), 0);
        assert_eq!(inner.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn cached_records_come_back_newest_first() {
        let source = FakeSource::new(vec![
            message(
                "older",
                "First application",
                "a@acme.com",
                "Mon, 01 Jan 2024 09:00:00 +0000",
                "received your application",
            ),
            message(
                "newer",
                "Second application",
                "b@acme.com",
                "Mon, 05 Feb 2024 09:00:00 +0000",
                "received your application",
            ),
        ]);
        let store = MemStore::new();
        let pipeline = pipeline(source, store);

        pipeline.list_emails(OWNER, &token(), true).await.unwrap();
        let batch = pipeline.list_emails(OWNER, &token(), false).await.unwrap();

        assert!(batch.cached);
        let ids: Vec<&str> = batch.records.iter().map(|r| r.gmail_id.as_str()).collect();
        assert_eq!(ids, ["newer", "older"]);
    }

    #[tokio::test]
    async fn forced_refresh_is_idempotent() {
        let source = FakeSource::new(vec![
            message(
                "m1",
                "Interview",
                "hr@acme.com",
                "Mon, 01 Jan 2024 09:00:00 +0000",
                "interview",
            ),
            message(
                "m2",
                "Update",
                "jobs@initech.com",
                "Tue, 02 Jan 2024 09:00:00 +0000",
                "unfortunately",
            ),
        ]);
        let store = MemStore::new();
        let pipeline = pipeline(source, store.clone());

        let first = pipeline.list_emails(OWNER, &token(), true).await.unwrap();
        let second = pipeline.list_emails(OWNER, &token(), true).await.unwrap();

        assert_eq!(first.records.len(), second.records.len());
        assert_eq!(store.snapshot().len(), 2);
        for (a, b) in first.records.iter().zip(second.records.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.status, b.status);
            assert_eq!(a.company, b.company);
        }
    }

    #[tokio::test]
    async fn decoded_body_feeds_the_classifier() {
        let mut msg = message(
            "m1",
            "Your application",
            "Globex <no-reply@globex.com>",
            "Mon, 01 Jan 2024 09:00:00 +0000",
            "neutral preview text",
        );
        if let Some(payload) = msg.payload.as_mut() {
            payload.body = PartBody {
                data: Some(URL_SAFE.encode(
                    "We regret to inform you that we are not moving forward with other candidates.",
                )),
            };
        }
        let store = MemStore::new();
        let pipeline = pipeline(FakeSource::new(vec![msg]), store);

        let batch = pipeline.list_emails(OWNER, &token(), true).await.unwrap();

        assert_eq!(batch.records[0].status, Status::Rejection);
        assert_eq!(batch.records[0].company, "Globex");
        assert!(batch.records[0].snippet.starts_with("We regret"));
    }

    #[tokio::test]
    async fn stored_snippet_is_truncated() {
        let long_body = "evaluating ".repeat(100);
        let mut msg = message(
            "m1",
            "Application received",
            "hr@acme.com",
            "Mon, 01 Jan 2024 09:00:00 +0000",
            "",
        );
        if let Some(payload) = msg.payload.as_mut() {
            payload.body = PartBody {
                data: Some(URL_SAFE.encode(&long_body)),
            };
        }
        let store = MemStore::new();
        let pipeline = pipeline(FakeSource::new(vec![msg]), store);

        let batch = pipeline.list_emails(OWNER, &token(), true).await.unwrap();
        assert_eq!(batch.records[0].snippet.chars().count(), SNIPPET_LIMIT);
    }

    #[tokio::test]
    async fn mark_read_survives_forced_refresh() {
        let source = FakeSource::new(vec![message(
            "m1",
            "Interview",
            "hr@acme.com",
            "Mon, 01 Jan 2024 09:00:00 +0000",
            "interview",
        )]);
        let store = MemStore::new();
        let pipeline = pipeline(source, store.clone());

        pipeline.list_emails(OWNER, &token(), true).await.unwrap();
        pipeline.mark_read(OWNER, "m1").await.unwrap();
        pipeline.list_emails(OWNER, &token(), true).await.unwrap();

        assert!(store.snapshot()[0].is_read);
    }

    #[tokio::test]
    async fn mark_read_for_unknown_id_is_a_noop() {
        let store = MemStore::new();
        let pipeline = pipeline(FakeSource::new(Vec::new()), store.clone());

        pipeline.mark_read(OWNER, "never-seen").await.unwrap();
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn stats_fold_matches_store_contents() {
        let source = FakeSource::new(vec![
            message("r1", "Update", "a@acme.com", "bad date", "unfortunately we regret this"),
            message("r2", "Update", "a@acme.com", "bad date", "unfortunately we regret this"),
            message("r3", "Update", "a@acme.com", "bad date", "unfortunately we regret this"),
            message("s1", "Interview", "a@acme.com", "bad date", "congratulations and interview"),
            message("s2", "Interview", "a@acme.com", "bad date", "congratulations and interview"),
        ]);
        let store = MemStore::new();
        let pipeline = pipeline(source, store);

        pipeline.list_emails(OWNER, &token(), true).await.unwrap();
        for id in ["r1", "r2", "r3", "s1"] {
            pipeline.mark_read(OWNER, id).await.unwrap();
        }

        let summary = pipeline.stats(OWNER).await.unwrap();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.rejection, 3);
        assert_eq!(summary.selection, 2);
        assert_eq!(summary.pending, 0);
        assert_eq!(summary.unread, 1);
    }

    #[tokio::test]
    async fn stats_for_unknown_owner_are_zero_filled() {
        let pipeline = pipeline(FakeSource::new(Vec::new()), MemStore::new());
        let summary = pipeline.stats("nobody@example.com").await.unwrap();
        assert_eq!(summary, StatsSummary::default());
    }

    #[tokio::test]
    async fn mid_batch_fetch_failure_aborts_but_keeps_earlier_upserts() {
        let source = FakeSource::with_missing(
            vec![message(
                "good",
                "Interview",
                "hr@acme.com",
                "Mon, 01 Jan 2024 09:00:00 +0000",
                "interview",
            )],
            &["gone"],
        );
        let store = MemStore::new();
        let pipeline = pipeline(source, store.clone());

        let result = pipeline.list_emails(OWNER, &token(), true).await;

        assert!(matches!(result, Err(PipelineError::Source(_))));
        let rows = store.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].gmail_id, "good");
    }
}
