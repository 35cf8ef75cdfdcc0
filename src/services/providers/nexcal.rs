use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{check_status, CalendarProvider, EventDraft, ProviderError, TokenGrant};
use crate::models::{BusyInterval, ProviderKind};

/// Primary OAuth2 calendar REST API client.
pub struct NexcalProvider {
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    client: reqwest::Client,
}

impl NexcalProvider {
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
struct EventList {
    #[serde(default)]
    items: Vec<EventTime>,
}

#[derive(Deserialize)]
struct EventTime {
    start: EventInstant,
    end: EventInstant,
}

#[derive(Deserialize)]
struct EventInstant {
    #[serde(rename = "dateTime")]
    date_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct CreatedEvent {
    id: String,
}

#[async_trait]
impl CalendarProvider for NexcalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Primary
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
                ("timeMin", start.to_rfc3339()),
                ("timeMax", end.to_rfc3339()),
                ("singleEvents", "true".to_string()),
            ])
            .send()
            .await?;

        let list: EventList = check_status(response).await?.json().await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|e| Some(BusyInterval::new(e.start.date_time?, e.end.date_time?)))
            .collect())
    }

    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        draft: &EventDraft,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/calendars/{}/events", self.base_url, calendar_id);
        let mut body = serde_json::json!({
            "summary": draft.title,
            "start": { "dateTime": draft.start.to_rfc3339() },
            "end": { "dateTime": draft.end.to_rfc3339() },
        });
        if let Some(description) = &draft.description {
            body["description"] = serde_json::json!(description);
        }
        if let Some(email) = &draft.attendee_email {
            body["attendees"] = serde_json::json!([{ "email": email }]);
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;

        let created: CreatedEvent = check_status(response).await?.json().await?;
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
            "start": { "dateTime": start.to_rfc3339() },
            "end": { "dateTime": end.to_rfc3339() },
        });

        let response = self
            .client
            .patch(&url)
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

        // Deleting an already-deleted mirror is fine.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }
}
