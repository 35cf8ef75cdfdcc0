use chrono::{DateTime, Duration, Utc};

use super::{EventDraft, ProviderError, TokenGrant};
use crate::db::queries;
use crate::models::{BusyInterval, CalendarIntegration};
use crate::state::AppState;

/// Outcome of a synced provider operation. `NeedsReconnect` means the stored
/// grant is unusable and the account must re-authorize out of band; callers
/// record it, they never surface it as a transport fault.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("provider connection needs re-authorization")]
    NeedsReconnect,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Proactive half of the token lifecycle: refresh when the access token
/// expires inside the lead window and a refresh token is on hand.
pub async fn ensure_fresh_token(
    state: &AppState,
    integration: &CalendarIntegration,
    now: DateTime<Utc>,
) -> Result<String, SyncError> {
    let lead = Duration::minutes(state.config.token_refresh_lead_minutes);
    if !integration.needs_refresh(now, lead) {
        return Ok(integration.access_token.clone());
    }

    if integration.refresh_token.is_none() {
        if integration.expires_at <= now {
            return Err(SyncError::NeedsReconnect);
        }
        // Inside the lead window but still valid; use what we have.
        return Ok(integration.access_token.clone());
    }

    refresh_and_persist(state, integration, now).await
}

/// Reactive half: exactly one refresh after an authorization failure.
async fn refresh_and_persist(
    state: &AppState,
    integration: &CalendarIntegration,
    now: DateTime<Utc>,
) -> Result<String, SyncError> {
    let refresh_token = integration
        .refresh_token
        .as_deref()
        .ok_or(SyncError::NeedsReconnect)?;

    let provider = state.provider(integration.provider);
    let grant = match provider.refresh_token(refresh_token).await {
        Ok(grant) => grant,
        Err(e) => {
            tracing::warn!(
                account = %integration.account_id,
                provider = integration.provider.as_str(),
                error = %e,
                "token refresh failed"
            );
            return Err(SyncError::NeedsReconnect);
        }
    };

    persist_grant(state, integration, &grant, now)?;
    Ok(grant.access_token)
}

fn persist_grant(
    state: &AppState,
    integration: &CalendarIntegration,
    grant: &TokenGrant,
    now: DateTime<Utc>,
) -> Result<(), SyncError> {
    let expires_at = now + Duration::seconds(grant.expires_in_seconds);
    let db = state.db.lock().unwrap();
    queries::update_integration_tokens(
        &db,
        &integration.account_id,
        integration.provider,
        &grant.access_token,
        grant.refresh_token.as_deref(),
        expires_at,
    )
    .map_err(|e| {
        tracing::error!(error = %e, "failed to persist refreshed token");
        SyncError::NeedsReconnect
    })
}

// Synced operations: proactive refresh before the call, one reactive
// refresh-and-retry after an authorization failure.

pub async fn list_events_synced(
    state: &AppState,
    integration: &CalendarIntegration,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<BusyInterval>, SyncError> {
    let provider = state.provider(integration.provider);
    let token = ensure_fresh_token(state, integration, now).await?;
    match provider
        .list_events(&token, &integration.calendar_id, start, end)
        .await
    {
        Err(ProviderError::Unauthorized) => {
            let token = refresh_and_persist(state, integration, now).await?;
            Ok(provider
                .list_events(&token, &integration.calendar_id, start, end)
                .await?)
        }
        other => Ok(other?),
    }
}

pub async fn create_event_synced(
    state: &AppState,
    integration: &CalendarIntegration,
    draft: &EventDraft,
    now: DateTime<Utc>,
) -> Result<String, SyncError> {
    let provider = state.provider(integration.provider);
    let token = ensure_fresh_token(state, integration, now).await?;
    match provider
        .create_event(&token, &integration.calendar_id, draft)
        .await
    {
        Err(ProviderError::Unauthorized) => {
            let token = refresh_and_persist(state, integration, now).await?;
            Ok(provider
                .create_event(&token, &integration.calendar_id, draft)
                .await?)
        }
        other => Ok(other?),
    }
}

pub async fn patch_event_synced(
    state: &AppState,
    integration: &CalendarIntegration,
    event_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), SyncError> {
    let provider = state.provider(integration.provider);
    let token = ensure_fresh_token(state, integration, now).await?;
    match provider
        .patch_event(&token, &integration.calendar_id, event_id, start, end)
        .await
    {
        Err(ProviderError::Unauthorized) => {
            let token = refresh_and_persist(state, integration, now).await?;
            Ok(provider
                .patch_event(&token, &integration.calendar_id, event_id, start, end)
                .await?)
        }
        other => Ok(other?),
    }
}

pub async fn delete_event_synced(
    state: &AppState,
    integration: &CalendarIntegration,
    event_id: &str,
    now: DateTime<Utc>,
) -> Result<(), SyncError> {
    let provider = state.provider(integration.provider);
    let token = ensure_fresh_token(state, integration, now).await?;
    match provider
        .delete_event(&token, &integration.calendar_id, event_id)
        .await
    {
        Err(ProviderError::Unauthorized) => {
            let token = refresh_and_persist(state, integration, now).await?;
            Ok(provider
                .delete_event(&token, &integration.calendar_id, event_id)
                .await?)
        }
        other => Ok(other?),
    }
}
