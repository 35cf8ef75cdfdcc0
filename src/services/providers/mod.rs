pub mod crmcal;
pub mod nexcal;
pub mod oauth;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{BusyInterval, ProviderKind};

/// Failure modes for outbound provider calls. `Unauthorized` is split out
/// because it is the one case that earns a reactive token refresh and retry.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider rejected credentials")]
    Unauthorized,

    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Fields needed to mirror an appointment as an external event.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub description: Option<String>,
    pub attendee_email: Option<String>,
}

/// Result of an OAuth2 refresh-token exchange.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_seconds: i64,
}

/// An external calendar system the engine mirrors appointments into. All
/// implementations are best-effort dependencies; callers absorb failures.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError>;

    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, ProviderError>;

    /// Returns the provider's event id for the created mirror.
    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        draft: &EventDraft,
    ) -> Result<String, ProviderError>;

    async fn patch_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), ProviderError>;

    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), ProviderError>;
}

/// Map an HTTP status to the provider error taxonomy.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ProviderError::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}
