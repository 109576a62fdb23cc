use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

// Re-exported so callers can match on [`SourceError::Status`] without
// depending on reqwest themselves.
pub use reqwest::StatusCode;

/// Root of the Gmail REST API.
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Subject keywords and age window used to pre-filter candidate messages
/// on the provider side.
pub const JOB_QUERY: &str = "subject:(application OR interview OR position OR job OR \
                             opportunity OR career OR hiring OR recruitment OR candidate OR \
                             role OR offer) newer_than:6m";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Delegated bearer credential for the mailbox owner.
///
/// Holds the token opaquely; `Debug` is redacted so the secret cannot
/// leak through logs or panic messages.
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub(crate) fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("mail API request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("mail API returned status {0}")]
    Status(StatusCode),
}

impl SourceError {
    /// True when the upstream rejected the credential itself.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::Status(code)
                if *code == StatusCode::UNAUTHORIZED || *code == StatusCode::FORBIDDEN
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub email_address: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageList {
    /// Absent entirely when the query matches nothing.
    #[serde(default)]
    pub messages: Vec<MessageRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRef {
    pub id: String,
}

/// A full-format message: provider snippet plus the MIME part tree.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub snippet: String,
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagePart {
    pub mime_type: String,
    pub headers: Vec<Header>,
    pub body: PartBody,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartBody {
    pub data: Option<String>,
}

/// Read-only view of the owner's mailbox.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Resolves the mailbox owner's primary address.
    async fn account_identity(&self, credential: &AccessToken) -> Result<String, SourceError>;

    /// Lists ids of up to `max_results` messages matching `query`.
    async fn list_candidates(
        &self,
        credential: &AccessToken,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<MessageRef>, SourceError>;

    /// Retrieves one message in full, headers and body parts included.
    async fn fetch_message(
        &self,
        credential: &AccessToken,
        id: &str,
    ) -> Result<Message, SourceError>;
}

/// [`MailSource`] backed by the Gmail REST API over HTTPS.
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
}

impl GmailClient {
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_url(GMAIL_API_BASE)
    }

    /// Points the client at a different API root, e.g. a local stand-in
    /// server in tests.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    async fn get_json<T>(
        &self,
        credential: &AccessToken,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SourceError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .bearer_auth(credential.secret())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl MailSource for GmailClient {
    async fn account_identity(&self, credential: &AccessToken) -> Result<String, SourceError> {
        let profile: Profile = self.get_json(credential, "/users/me/profile", &[]).await?;
        Ok(profile.email_address)
    }

    async fn list_candidates(
        &self,
        credential: &AccessToken,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<MessageRef>, SourceError> {
        let max = max_results.to_string();
        let list: MessageList = self
            .get_json(
                credential,
                "/users/me/messages",
                &[("q", query), ("maxResults", max.as_str())],
            )
            .await?;
        Ok(list.messages)
    }

    async fn fetch_message(
        &self,
        credential: &AccessToken,
        id: &str,
    ) -> Result<Message, SourceError> {
        let path = format!("/users/me/messages/{}", id);
        self.get_json(credential, &path, &[("format", "full")]).await
    }
}
