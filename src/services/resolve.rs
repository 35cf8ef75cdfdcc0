use chrono::{DateTime, Duration, Utc};

use crate::db::queries;
use crate::models::{Appointment, AppointmentStatus, ProviderKind};
use crate::services::caller::{phone_alternates, CallerContext};
use crate::services::providers::oauth;
use crate::services::timezone::ZonedClock;
use crate::state::AppState;

/// Everything a voice request might carry that could identify an existing
/// appointment. Callers rarely hold an id; the weaker signals exist so that
/// "cancel my appointment" still lands on the right row.
#[derive(Debug, Clone, Default)]
pub struct ResolveSignals {
    pub appointment_id: Option<String>,
    pub event_id: Option<String>,
    pub caller: Option<CallerContext>,
    pub target_time: Option<DateTime<Utc>>,
    pub name_fragment: Option<String>,
}

/// Strongest-signal-first resolution. Each strategy either decides the
/// answer or yields to the next; only the final fallback guesses.
///
/// 1. explicit appointment id (any status, so cancelling twice is a no-op)
/// 2. explicit provider event id
/// 3. caller identity: linked contact or stored phone
/// 4. proximity to a stated target time
/// 5. title or attendee name fragment
/// 6. the soonest upcoming appointment
pub fn resolve_targets(
    conn: &rusqlite::Connection,
    account_id: &str,
    signals: &ResolveSignals,
    now: DateTime<Utc>,
    match_window: Duration,
) -> anyhow::Result<Vec<Appointment>> {
    if let Some(id) = &signals.appointment_id {
        if let Some(appt) = queries::get_appointment_by_id(conn, id)? {
            if appt.account_id == account_id {
                return Ok(vec![appt]);
            }
        }
        // An id was given but doesn't match; guessing here would be worse
        // than matching nothing.
        return Ok(vec![]);
    }

    if let Some(event_id) = &signals.event_id {
        if let Some(appt) = queries::get_appointment_by_event_id(conn, account_id, event_id)? {
            return Ok(vec![appt]);
        }
        return Ok(vec![]);
    }

    let upcoming = queries::get_upcoming_appointments(conn, account_id, now)?;
    if upcoming.is_empty() {
        return Ok(vec![]);
    }

    if let Some(caller) = &signals.caller {
        let matched = filter_for_caller(&upcoming, caller);
        if !matched.is_empty() {
            return Ok(refine(matched, signals, match_window));
        }
    }

    if let Some(target) = signals.target_time {
        let matched = by_time(&upcoming, target, match_window);
        if !matched.is_empty() {
            return Ok(matched);
        }
    }

    if let Some(fragment) = &signals.name_fragment {
        let matched = by_name(&upcoming, fragment);
        if !matched.is_empty() {
            return Ok(matched);
        }
    }

    Ok(vec![upcoming[0].clone()])
}

/// Within a caller's own appointments, a stated time or name narrows
/// further; without one the whole set stands (needed for cancel-all).
fn refine(matched: Vec<Appointment>, signals: &ResolveSignals, window: Duration) -> Vec<Appointment> {
    if let Some(target) = signals.target_time {
        let narrowed = by_time(&matched, target, window);
        if !narrowed.is_empty() {
            return narrowed;
        }
    }
    if let Some(fragment) = &signals.name_fragment {
        let narrowed = by_name(&matched, fragment);
        if !narrowed.is_empty() {
            return narrowed;
        }
    }
    matched
}

/// Appointments belonging to this caller: a linked contact id, or a stored
/// phone that matches any loose form of the caller's number.
pub fn filter_for_caller(upcoming: &[Appointment], caller: &CallerContext) -> Vec<Appointment> {
    let alternates = phone_alternates(&caller.phone);
    upcoming
        .iter()
        .filter(|a| {
            if let (Some(appt_contact), Some(caller_contact)) = (&a.contact_id, &caller.contact_id)
            {
                if appt_contact == caller_contact {
                    return true;
                }
            }
            let stored = [
                a.metadata.caller_phone.as_deref(),
                a.metadata.attendee_phone.as_deref(),
            ];
            stored
                .iter()
                .flatten()
                .any(|p| alternates.iter().any(|alt| alt == p))
        })
        .cloned()
        .collect()
}

fn by_time(pool: &[Appointment], target: DateTime<Utc>, window: Duration) -> Vec<Appointment> {
    let mut matched: Vec<Appointment> = pool
        .iter()
        .filter(|a| (a.start_time - target).abs() <= window)
        .cloned()
        .collect();
    matched.sort_by_key(|a| (a.start_time - target).abs());
    matched
}

fn by_name(pool: &[Appointment], fragment: &str) -> Vec<Appointment> {
    let needle = fragment.to_lowercase();
    pool.iter()
        .filter(|a| {
            a.title.to_lowercase().contains(&needle)
                || a.metadata
                    .attendee_name
                    .as_deref()
                    .is_some_and(|n| n.to_lowercase().contains(&needle))
        })
        .cloned()
        .collect()
}

#[derive(Debug, Default)]
pub struct CancelOutcome {
    pub cancelled: Vec<Appointment>,
    pub already_cancelled: usize,
}

/// Cancel the first target, or every target when `all` is set. Already
/// cancelled rows are counted and skipped, so a retried cancel succeeds
/// without touching the providers again. Mirror deletions are best-effort;
/// one provider failing never stops the batch.
pub async fn cancel_appointments(
    state: &AppState,
    targets: Vec<Appointment>,
    all: bool,
    clock: &ZonedClock,
) -> anyhow::Result<CancelOutcome> {
    let mut outcome = CancelOutcome::default();
    let selected: Vec<Appointment> = if all {
        targets
    } else {
        targets.into_iter().take(1).collect()
    };

    for mut appt in selected {
        if appt.status == AppointmentStatus::Cancelled {
            outcome.already_cancelled += 1;
            continue;
        }

        {
            let db = state.db.lock().unwrap();
            queries::update_appointment_status(&db, &appt.id, &AppointmentStatus::Cancelled)?;
        }
        appt.status = AppointmentStatus::Cancelled;

        for kind in [ProviderKind::Primary, ProviderKind::Secondary] {
            mirror_delete(state, &appt, kind, clock).await;
        }

        tracing::info!(appointment = %appt.id, "appointment cancelled");
        outcome.cancelled.push(appt);
    }

    Ok(outcome)
}

async fn mirror_delete(state: &AppState, appt: &Appointment, kind: ProviderKind, clock: &ZonedClock) {
    let Some(event_id) = appt.event_id_for(kind) else {
        return;
    };
    let integration = {
        let db = state.db.lock().unwrap();
        match queries::get_integration(&db, &appt.account_id, kind) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, provider = kind.as_str(), "integration lookup failed");
                return;
            }
        }
    };
    let Some(integration) = integration else {
        return;
    };

    if let Err(e) = oauth::delete_event_synced(state, &integration, event_id, clock.now).await {
        tracing::warn!(
            appointment = %appt.id,
            provider = kind.as_str(),
            error = %e,
            "mirror delete failed, local cancellation stands"
        );
    }
}

#[derive(Debug)]
pub enum RescheduleOutcome {
    Updated(Appointment),
    PastTime,
}

/// Move an appointment to a new time. The row and its provider event ids
/// are kept; mirrors are patched in place rather than deleted and
/// recreated. No conflict check: the operator asked for this time.
pub async fn reschedule_appointment(
    state: &AppState,
    mut appt: Appointment,
    new_start: DateTime<Utc>,
    new_end: DateTime<Utc>,
    clock: &ZonedClock,
) -> anyhow::Result<RescheduleOutcome> {
    if new_start <= clock.now {
        return Ok(RescheduleOutcome::PastTime);
    }

    {
        let db = state.db.lock().unwrap();
        queries::update_appointment_times(&db, &appt.id, new_start, new_end)?;
    }
    appt.start_time = new_start;
    appt.end_time = new_end;
    appt.updated_at = clock.now;

    let mut metadata = appt.metadata.clone();
    for kind in [ProviderKind::Primary, ProviderKind::Secondary] {
        let Some(event_id) = appt.event_id_for(kind) else {
            continue;
        };
        let integration = {
            let db = state.db.lock().unwrap();
            queries::get_integration(&db, &appt.account_id, kind).ok().flatten()
        };
        let Some(integration) = integration else {
            continue;
        };

        match oauth::patch_event_synced(state, &integration, event_id, new_start, new_end, clock.now)
            .await
        {
            Ok(()) => {
                metadata.sync.insert(kind.as_str().to_string(), true);
            }
            Err(e) => {
                tracing::warn!(
                    appointment = %appt.id,
                    provider = kind.as_str(),
                    error = %e,
                    "mirror patch failed, local reschedule stands"
                );
                metadata.sync.insert(kind.as_str().to_string(), false);
            }
        }
    }

    if metadata.sync != appt.metadata.sync {
        let db = state.db.lock().unwrap();
        queries::update_appointment_metadata(&db, &appt.id, &metadata)?;
        appt.metadata = metadata;
    }

    tracing::info!(
        appointment = %appt.id,
        start = %appt.start_time,
        "appointment rescheduled"
    );
    Ok(RescheduleOutcome::Updated(appt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::AppointmentMetadata;
    use chrono::TimeZone;

    fn seed(conn: &rusqlite::Connection, id: &str, start: DateTime<Utc>, extra: impl FnOnce(&mut Appointment)) {
        let mut appt = Appointment {
            id: id.to_string(),
            account_id: "acct".to_string(),
            contact_id: None,
            title: "Appointment".to_string(),
            start_time: start,
            end_time: start + Duration::minutes(30),
            timezone: "America/Chicago".to_string(),
            status: AppointmentStatus::Scheduled,
            primary_event_id: None,
            secondary_event_id: None,
            metadata: AppointmentMetadata::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        extra(&mut appt);
        queries::create_appointment(conn, &appt).unwrap();
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn window() -> Duration {
        Duration::hours(2)
    }

    #[test]
    fn test_explicit_id_wins_even_when_cancelled() {
        let conn = db::init_db(":memory:").unwrap();
        seed(&conn, "a1", now() + Duration::hours(3), |a| {
            a.status = AppointmentStatus::Cancelled;
        });
        seed(&conn, "a2", now() + Duration::hours(1), |_| {});

        let signals = ResolveSignals {
            appointment_id: Some("a1".to_string()),
            ..Default::default()
        };
        let targets = resolve_targets(&conn, "acct", &signals, now(), window()).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, "a1");
    }

    #[test]
    fn test_unknown_explicit_id_matches_nothing() {
        let conn = db::init_db(":memory:").unwrap();
        seed(&conn, "a1", now() + Duration::hours(1), |_| {});

        let signals = ResolveSignals {
            appointment_id: Some("missing".to_string()),
            ..Default::default()
        };
        let targets = resolve_targets(&conn, "acct", &signals, now(), window()).unwrap();
        assert!(targets.is_empty());
    }

    #[test]
    fn test_event_id_resolves_either_provider_column() {
        let conn = db::init_db(":memory:").unwrap();
        seed(&conn, "a1", now() + Duration::hours(1), |a| {
            a.secondary_event_id = Some("evt-9".to_string());
        });

        let signals = ResolveSignals {
            event_id: Some("evt-9".to_string()),
            ..Default::default()
        };
        let targets = resolve_targets(&conn, "acct", &signals, now(), window()).unwrap();
        assert_eq!(targets[0].id, "a1");
    }

    #[test]
    fn test_caller_phone_scopes_to_own_appointments() {
        let conn = db::init_db(":memory:").unwrap();
        seed(&conn, "mine", now() + Duration::hours(2), |a| {
            a.metadata.caller_phone = Some("+15551230001".to_string());
        });
        seed(&conn, "theirs", now() + Duration::hours(1), |a| {
            a.metadata.caller_phone = Some("+15559990000".to_string());
        });

        let signals = ResolveSignals {
            caller: Some(CallerContext {
                phone: "+15551230001".to_string(),
                contact_id: None,
                contact_name: None,
            }),
            ..Default::default()
        };
        let targets = resolve_targets(&conn, "acct", &signals, now(), window()).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, "mine");
    }

    #[test]
    fn test_caller_matches_loosely_stored_phone() {
        let conn = db::init_db(":memory:").unwrap();
        seed(&conn, "a1", now() + Duration::hours(1), |a| {
            // stored without the country code
            a.metadata.attendee_phone = Some("5551230001".to_string());
        });

        let signals = ResolveSignals {
            caller: Some(CallerContext {
                phone: "+15551230001".to_string(),
                contact_id: None,
                contact_name: None,
            }),
            ..Default::default()
        };
        let targets = resolve_targets(&conn, "acct", &signals, now(), window()).unwrap();
        assert_eq!(targets[0].id, "a1");
    }

    #[test]
    fn test_target_time_picks_nearest_within_window() {
        let conn = db::init_db(":memory:").unwrap();
        seed(&conn, "near", now() + Duration::hours(3), |_| {});
        seed(&conn, "nearer", now() + Duration::minutes(150), |_| {});
        seed(&conn, "far", now() + Duration::hours(30), |_| {});

        let signals = ResolveSignals {
            target_time: Some(now() + Duration::minutes(160)),
            ..Default::default()
        };
        let targets = resolve_targets(&conn, "acct", &signals, now(), window()).unwrap();
        assert_eq!(targets[0].id, "nearer");
        assert!(targets.iter().all(|a| a.id != "far"));
    }

    #[test]
    fn test_name_fragment_matches_title_and_attendee() {
        let conn = db::init_db(":memory:").unwrap();
        seed(&conn, "a1", now() + Duration::hours(1), |a| {
            a.title = "Consultation".to_string();
            a.metadata.attendee_name = Some("Alice Johnson".to_string());
        });
        seed(&conn, "a2", now() + Duration::hours(2), |a| {
            a.title = "Appointment with Bob".to_string();
        });

        let signals = ResolveSignals {
            name_fragment: Some("alice".to_string()),
            ..Default::default()
        };
        let targets = resolve_targets(&conn, "acct", &signals, now(), window()).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, "a1");
    }

    #[test]
    fn test_fallback_is_soonest_upcoming() {
        let conn = db::init_db(":memory:").unwrap();
        seed(&conn, "later", now() + Duration::hours(5), |_| {});
        seed(&conn, "soonest", now() + Duration::hours(1), |_| {});

        let targets =
            resolve_targets(&conn, "acct", &ResolveSignals::default(), now(), window()).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, "soonest");
    }

    #[test]
    fn test_no_upcoming_resolves_empty() {
        let conn = db::init_db(":memory:").unwrap();
        seed(&conn, "past", now() - Duration::hours(1), |_| {});

        let targets =
            resolve_targets(&conn, "acct", &ResolveSignals::default(), now(), window()).unwrap();
        assert!(targets.is_empty());
    }

    #[test]
    fn test_caller_set_refined_by_time() {
        let conn = db::init_db(":memory:").unwrap();
        for (id, offset) in [("m1", 1), ("m2", 3)] {
            seed(&conn, id, now() + Duration::hours(offset), |a| {
                a.metadata.caller_phone = Some("+15551230001".to_string());
            });
        }

        let signals = ResolveSignals {
            caller: Some(CallerContext {
                phone: "+15551230001".to_string(),
                contact_id: None,
                contact_name: None,
            }),
            target_time: Some(now() + Duration::hours(3)),
            ..Default::default()
        };
        let targets = resolve_targets(&conn, "acct", &signals, now(), window()).unwrap();
        assert_eq!(targets[0].id, "m2");
    }
}
