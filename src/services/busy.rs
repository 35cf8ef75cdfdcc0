use chrono::{DateTime, Utc};

use crate::db::queries;
use crate::models::{BusyInterval, ProviderKind, ProviderPreference};
use crate::services::providers::oauth;
use crate::state::AppState;

/// Union of committed time over `[start, end)`: local appointments always,
/// plus each preference-enabled, connected provider. Each source is queried
/// independently; a provider failure contributes nothing beyond a log line.
/// Callers only test containment, so ordering and overlap are unspecified.
pub async fn collect_busy_intervals(
    state: &AppState,
    account_id: &str,
    preference: ProviderPreference,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<BusyInterval>> {
    let mut intervals: Vec<BusyInterval> = {
        let db = state.db.lock().unwrap();
        queries::get_appointments_in_range(&db, account_id, start, end)?
            .iter()
            .map(|a| BusyInterval::new(a.start_time, a.end_time))
            .collect()
    };

    if preference.allows_primary() {
        intervals.extend(provider_busy(state, account_id, ProviderKind::Primary, start, end, now).await);
    }
    if preference.allows_secondary() {
        intervals.extend(provider_busy(state, account_id, ProviderKind::Secondary, start, end, now).await);
    }

    Ok(intervals)
}

async fn provider_busy(
    state: &AppState,
    account_id: &str,
    kind: ProviderKind,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<BusyInterval> {
    let integration = {
        let db = state.db.lock().unwrap();
        match queries::get_integration(&db, account_id, kind) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, provider = kind.as_str(), "integration lookup failed");
                return vec![];
            }
        }
    };

    let Some(integration) = integration else {
        return vec![];
    };
    if !integration.sync_enabled {
        return vec![];
    }

    match oauth::list_events_synced(state, &integration, start, end, now).await {
        Ok(intervals) => intervals,
        Err(e) => {
            tracing::warn!(
                account = %account_id,
                provider = kind.as_str(),
                error = %e,
                "busy lookup failed, treating provider as free"
            );
            vec![]
        }
    }
}
