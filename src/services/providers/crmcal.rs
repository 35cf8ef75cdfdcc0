use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{check_status, CalendarProvider, EventDraft, ProviderError, TokenGrant};
use crate::models::{BusyInterval, ProviderKind};

/// Secondary CRM-calendar REST API client. Its event surface is flatter than
/// the primary provider's and it has no native patch, so reschedules update
/// the event with a PUT of the time fields.
pub struct CrmCalProvider {
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    client: reqwest::Client,
}

impl CrmCalProvider {
    pub fn new(base_url: String, token_url: String, client_id: String, client_secret: String) -> Self {
        Self {
            base_url,
            token_url,
            client_id,
            client_secret,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Deserialize)]
struct CrmEventList {
    #[serde(default)]
    events: Vec<CrmEvent>,
}

#[derive(Deserialize)]
struct CrmEvent {
    #[serde(rename = "startTime")]
    start_time: Option<DateTime<Utc>>,
    #[serde(rename = "endTime")]
    end_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct CrmCreated {
    id: String,
}

#[async_trait]
impl CalendarProvider for CrmCalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Secondary
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let token: TokenResponse = check_status(response).await?.json().await?;
        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in_seconds: token.expires_in,
        })
    }

    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, ProviderError> {
        let url = format!("{}/calendars/{}/events", self.base_url, calendar_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[
                ("startTime", start.to_rfc3339()),
                ("endTime", end.to_rfc3339()),
            ])
            .send()
            .await?;

        let list: CrmEventList = check_status(response).await?.json().await?;
        Ok(list
            .events
            .into_iter()
            .filter_map(|e| Some(BusyInterval::new(e.start_time?, e.end_time?)))
            .collect())
    }

    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        draft: &EventDraft,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/calendars/{}/events", self.base_url, calendar_id);
        let body = serde_json::json!({
            "title": draft.title,
            "startTime": draft.start.to_rfc3339(),
            "endTime": draft.end.to_rfc3339(),
            "notes": draft.description,
            "attendeeEmail": draft.attendee_email,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;

        let created: CrmCreated = check_status(response).await?.json().await?;
        Ok(created.id)
    }

    async fn patch_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), ProviderError> {
        let url = format!("{}/calendars/{}/events/{}", self.base_url, calendar_id, event_id);
        let body = serde_json::json!({
            "startTime": start.to_rfc3339(),
            "endTime": end.to_rfc3339(),
        });

        let response = self
            .client
            .put(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;

        check_status(response).await?;
        Ok(())
    }

    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), ProviderError> {
        let url = format!("{}/calendars/{}/events/{}", self.base_url, calendar_id, event_id);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(access_token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }
}
