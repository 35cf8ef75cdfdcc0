use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::db::queries;
use crate::models::{
    Appointment, AppointmentMetadata, AppointmentStatus, AvailabilityProfile, ProviderKind,
};
use crate::services::caller::CallerContext;
use crate::services::providers::{oauth, EventDraft};
use crate::services::timezone::{day_bounds, local_to_utc, parse_date, parse_time_of_day, ZonedClock};
use crate::state::AppState;

/// Booking parameters after envelope normalization. Aliases cover the field
/// spellings the orchestration layer has used over time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingParams {
    #[serde(default, alias = "start_time", alias = "datetime", alias = "start_at")]
    pub start: Option<String>,
    #[serde(default, alias = "end_time", alias = "end_at")]
    pub end: Option<String>,
    #[serde(default, alias = "appointment_date", alias = "day")]
    pub date: Option<String>,
    #[serde(default, alias = "appointment_time")]
    pub time: Option<String>,
    #[serde(default, alias = "duration")]
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "name", alias = "customer_name", alias = "attendee")]
    pub attendee_name: Option<String>,
    #[serde(default, alias = "email", alias = "customer_email")]
    pub attendee_email: Option<String>,
    #[serde(default, alias = "notes", alias = "reason")]
    pub description: Option<String>,
}

#[derive(Debug)]
pub enum BookingOutcome {
    Booked(Appointment),
    /// A retried request matched an appointment we already hold; no new row.
    Duplicate(Appointment),
    Conflict,
    PastTime,
    Unparsable,
}

enum ParsedStamp {
    /// Carried an explicit offset or Z marker.
    Zoned(DateTime<Utc>),
    /// Local-looking digits with no zone information.
    Bare(NaiveDateTime),
}

fn parse_timestamp(s: &str) -> Option<ParsedStamp> {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ParsedStamp::Zoned(dt.with_timezone(&Utc)));
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(ParsedStamp::Bare(naive));
        }
    }
    None
}

/// Disambiguate a bare timestamp by testing both readings against the weekly
/// schedule: digits-as-UTC versus wall-clock in the account's timezone. The
/// reading that lands inside a configured window wins; neither or both means
/// the wall-clock reading, which is what callers almost always mean.
pub fn resolve_bare_timestamp(
    naive: NaiveDateTime,
    profile: &AvailabilityProfile,
    duration: Duration,
) -> DateTime<Utc> {
    let tz = profile.tz();
    let as_utc = Utc.from_utc_datetime(&naive);
    let as_local = local_to_utc(naive.date(), naive.time(), tz);

    let utc_local_view = as_utc.with_timezone(&tz);
    let utc_in_window = profile.schedule.contains(
        utc_local_view.date_naive().weekday(),
        utc_local_view.time(),
        (utc_local_view + duration).time(),
    );
    let local_in_window = profile.schedule.contains(
        naive.date().weekday(),
        naive.time(),
        (naive + duration).time(),
    );

    match (local_in_window, utc_in_window, as_local) {
        (false, true, _) => as_utc,
        (_, _, Some(local)) => local,
        (_, _, None) => as_utc,
    }
}

/// "Book me at 3:30" with no date: today if that time is still comfortably
/// ahead of the local clock, otherwise tomorrow.
pub fn infer_date_for_time(
    time: chrono::NaiveTime,
    clock: &ZonedClock,
    tolerance: Duration,
) -> chrono::NaiveDate {
    let today = clock.today();
    if today.and_time(time) > clock.local_now() + tolerance {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Turn whichever temporal form the request carried into a UTC start.
pub fn normalize_start(
    params: &BookingParams,
    profile: &AvailabilityProfile,
    clock: &ZonedClock,
    tolerance: Duration,
) -> Option<DateTime<Utc>> {
    let duration = Duration::minutes(
        params
            .duration_minutes
            .unwrap_or(profile.default_duration_minutes),
    );

    if let Some(raw) = params.start.as_deref() {
        return match parse_timestamp(raw)? {
            ParsedStamp::Zoned(utc) => Some(utc),
            ParsedStamp::Bare(naive) => Some(resolve_bare_timestamp(naive, profile, duration)),
        };
    }

    let time = parse_time_of_day(params.time.as_deref()?)?;
    let date = match params.date.as_deref() {
        Some(raw) => parse_date(raw)?,
        None => infer_date_for_time(time, clock, tolerance),
    };
    local_to_utc(date, time, profile.tz())
}

fn normalize_end(
    params: &BookingParams,
    profile: &AvailabilityProfile,
    start: DateTime<Utc>,
) -> DateTime<Utc> {
    let duration = Duration::minutes(
        params
            .duration_minutes
            .unwrap_or(profile.default_duration_minutes),
    );

    if let Some(raw) = params.end.as_deref() {
        if let Some(parsed) = parse_timestamp(raw) {
            let end = match parsed {
                ParsedStamp::Zoned(utc) => utc,
                ParsedStamp::Bare(naive) => resolve_bare_timestamp(naive, profile, duration),
            };
            if end > start {
                return end;
            }
        }
    }
    start + duration
}

#[derive(Debug)]
pub enum ConflictCheck {
    Free,
    Duplicate(Appointment),
    Conflict,
}

/// Overlap scan with duplicate absorption: a retried booking lands within
/// the duplicate window of an existing appointment whose title or attendee
/// plausibly matches, and is answered with the existing record.
pub fn classify_conflict(
    existing: &[Appointment],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    attendee: Option<&str>,
    duplicate_window: Duration,
) -> ConflictCheck {
    let mut overlapping = false;

    for appt in existing {
        if appt.status == AppointmentStatus::Cancelled {
            continue;
        }
        if appt.start_time >= end || appt.end_time <= start {
            continue;
        }
        overlapping = true;

        let delta = (appt.start_time - start).abs();
        if delta <= duplicate_window && attendee_matches(appt, attendee) {
            return ConflictCheck::Duplicate(appt.clone());
        }
    }

    if overlapping {
        ConflictCheck::Conflict
    } else {
        ConflictCheck::Free
    }
}

fn attendee_matches(appt: &Appointment, attendee: Option<&str>) -> bool {
    let Some(name) = attendee else {
        // Nothing to compare; trust the time proximity.
        return true;
    };
    let needle = name.to_lowercase();

    let mut haystacks = vec![appt.title.to_lowercase()];
    if let Some(stored) = &appt.metadata.attendee_name {
        haystacks.push(stored.to_lowercase());
    }
    haystacks
        .iter()
        .any(|h| h.contains(&needle) || needle.contains(h.as_str()))
}

/// Normalize, validate, persist locally, then best-effort mirror. The local
/// write is the source of truth; provider outcomes are recorded per provider
/// in metadata and never fail the booking.
pub async fn book_appointment(
    state: &AppState,
    profile: &AvailabilityProfile,
    caller: Option<&CallerContext>,
    params: &BookingParams,
    clock: &ZonedClock,
) -> anyhow::Result<BookingOutcome> {
    let tolerance = Duration::minutes(state.config.time_inference_tolerance_minutes);
    let Some(start) = normalize_start(params, profile, clock, tolerance) else {
        return Ok(BookingOutcome::Unparsable);
    };
    let end = normalize_end(params, profile, start);

    if start <= clock.now {
        return Ok(BookingOutcome::PastTime);
    }

    let tz = profile.tz();
    let local_date = start.with_timezone(&tz).date_naive();
    let (day_start, day_end) =
        day_bounds(local_date, tz).unwrap_or((start - Duration::hours(12), start + Duration::hours(12)));

    let same_day = {
        let db = state.db.lock().unwrap();
        queries::get_appointments_in_range(&db, &profile.account_id, day_start, day_end)?
    };

    let duplicate_window = Duration::seconds(state.config.duplicate_window_seconds);
    match classify_conflict(&same_day, start, end, params.attendee_name.as_deref(), duplicate_window) {
        ConflictCheck::Duplicate(existing) => {
            tracing::info!(
                account = %profile.account_id,
                appointment = %existing.id,
                "absorbed duplicate booking attempt"
            );
            return Ok(BookingOutcome::Duplicate(existing));
        }
        ConflictCheck::Conflict => return Ok(BookingOutcome::Conflict),
        ConflictCheck::Free => {}
    }

    let title = params.title.clone().unwrap_or_else(|| {
        match params.attendee_name.as_deref().or(caller.and_then(|c| c.contact_name.as_deref())) {
            Some(name) => format!("Appointment with {name}"),
            None => "Appointment".to_string(),
        }
    });

    let mut metadata = AppointmentMetadata {
        attendee_name: params.attendee_name.clone(),
        attendee_email: params.attendee_email.clone(),
        attendee_phone: None,
        caller_phone: caller.map(|c| c.phone.clone()),
        source: Some("voice".to_string()),
        ..Default::default()
    };

    let mut appointment = Appointment {
        id: uuid::Uuid::new_v4().to_string(),
        account_id: profile.account_id.clone(),
        contact_id: caller.and_then(|c| c.contact_id.clone()),
        title,
        start_time: start,
        end_time: end,
        timezone: profile.timezone.clone(),
        status: AppointmentStatus::Scheduled,
        primary_event_id: None,
        secondary_event_id: None,
        metadata: metadata.clone(),
        created_at: clock.now,
        updated_at: clock.now,
    };

    {
        let db = state.db.lock().unwrap();
        queries::create_appointment(&db, &appointment)?;
    }

    // Mirrors are sequential and independent; each records its own outcome.
    let draft = EventDraft {
        title: appointment.title.clone(),
        start,
        end,
        description: params.description.clone(),
        attendee_email: params.attendee_email.clone(),
    };
    for kind in [ProviderKind::Primary, ProviderKind::Secondary] {
        let allowed = match kind {
            ProviderKind::Primary => profile.provider_preference.allows_primary(),
            ProviderKind::Secondary => profile.provider_preference.allows_secondary(),
        };
        if !allowed {
            continue;
        }
        if let Some(event_id) =
            mirror_create(state, &profile.account_id, kind, &appointment.id, &draft, &mut metadata, clock).await
        {
            match kind {
                ProviderKind::Primary => appointment.primary_event_id = Some(event_id),
                ProviderKind::Secondary => appointment.secondary_event_id = Some(event_id),
            }
        }
    }

    {
        let db = state.db.lock().unwrap();
        queries::update_appointment_metadata(&db, &appointment.id, &metadata)?;
    }
    appointment.metadata = metadata;

    Ok(BookingOutcome::Booked(appointment))
}

async fn mirror_create(
    state: &AppState,
    account_id: &str,
    kind: ProviderKind,
    appointment_id: &str,
    draft: &EventDraft,
    metadata: &mut AppointmentMetadata,
    clock: &ZonedClock,
) -> Option<String> {
    let integration = {
        let db = state.db.lock().unwrap();
        queries::get_integration(&db, account_id, kind).ok().flatten()
    }?;
    if !integration.sync_enabled {
        return None;
    }

    match oauth::create_event_synced(state, &integration, draft, clock.now).await {
        Ok(event_id) => {
            let db = state.db.lock().unwrap();
            if let Err(e) = queries::set_appointment_event_id(&db, appointment_id, kind, Some(&event_id)) {
                tracing::error!(error = %e, "failed to record mirror event id");
            }
            metadata.sync.insert(kind.as_str().to_string(), true);
            Some(event_id)
        }
        Err(e) => {
            tracing::warn!(
                account = %account_id,
                provider = kind.as_str(),
                error = %e,
                "mirror create failed, keeping local booking"
            );
            metadata.sync.insert(kind.as_str().to_string(), false);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WeeklySchedule;
    use chrono::{NaiveDate, NaiveTime};
    use chrono_tz::America::Chicago;

    fn profile() -> AvailabilityProfile {
        let mut profile = AvailabilityProfile::generic_fallback("acct", "America/Chicago");
        profile.schedule = WeeklySchedule::from_json(
            r#"{"windows":[
                {"day":"mon","start":"09:00","end":"17:00"},
                {"day":"tue","start":"09:00","end":"17:00"},
                {"day":"wed","start":"09:00","end":"17:00"},
                {"day":"thu","start":"09:00","end":"17:00"},
                {"day":"fri","start":"09:00","end":"17:00"},
                {"day":"sat","start":"09:00","end":"17:00"},
                {"day":"sun","start":"09:00","end":"17:00"}]}"#,
        )
        .unwrap();
        profile
    }

    fn clock_at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> ZonedClock {
        let naive = NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap();
        ZonedClock::new(
            local_to_utc(naive.date(), naive.time(), Chicago).unwrap(),
            Chicago,
        )
    }

    fn appt(id: &str, start: DateTime<Utc>, end: DateTime<Utc>, name: Option<&str>) -> Appointment {
        Appointment {
            id: id.to_string(),
            account_id: "acct".to_string(),
            contact_id: None,
            title: name.map_or("Appointment".to_string(), |n| format!("Appointment with {n}")),
            start_time: start,
            end_time: end,
            timezone: "America/Chicago".to_string(),
            status: AppointmentStatus::Scheduled,
            primary_event_id: None,
            secondary_event_id: None,
            metadata: AppointmentMetadata {
                attendee_name: name.map(str::to_string),
                ..Default::default()
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_bare_timestamp_prefers_in_window_local() {
        // 11:00 local falls inside the window; 11:00 UTC is 05:00 in Chicago
        let naive = NaiveDate::from_ymd_opt(2026, 1, 3)
            .unwrap()
            .and_hms_opt(11, 0, 0)
            .unwrap();
        let resolved = resolve_bare_timestamp(naive, &profile(), Duration::minutes(30));
        let expected = local_to_utc(naive.date(), naive.time(), Chicago).unwrap();
        assert_eq!(resolved, expected);
    }

    #[test]
    fn test_bare_timestamp_utc_reading_wins_when_only_it_fits() {
        // 15:00 UTC is 09:00 in Chicago (in window, winter); 15:00 local is
        // also in a 9-17 window, so narrow the schedule to force the choice.
        let mut p = profile();
        p.schedule = WeeklySchedule::from_json(
            r#"{"windows":[{"day":"sat","start":"09:00","end":"10:00"}]}"#,
        )
        .unwrap();
        let naive = NaiveDate::from_ymd_opt(2026, 1, 3)
            .unwrap()
            .and_hms_opt(15, 0, 0)
            .unwrap();
        let resolved = resolve_bare_timestamp(naive, &p, Duration::minutes(30));
        assert_eq!(resolved, Utc.from_utc_datetime(&naive));
    }

    #[test]
    fn test_bare_timestamp_defaults_to_local_when_neither_fits() {
        let naive = NaiveDate::from_ymd_opt(2026, 1, 3)
            .unwrap()
            .and_hms_opt(22, 0, 0)
            .unwrap();
        let resolved = resolve_bare_timestamp(naive, &profile(), Duration::minutes(30));
        let expected = local_to_utc(naive.date(), naive.time(), Chicago).unwrap();
        assert_eq!(resolved, expected);
    }

    #[test]
    fn test_time_only_after_passing_books_tomorrow() {
        // Requested 15:30 at 15:45 local: tomorrow.
        let clock = clock_at(2026, 3, 2, 15, 45);
        let time = NaiveTime::from_hms_opt(15, 30, 0).unwrap();
        let date = infer_date_for_time(time, &clock, Duration::minutes(5));
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 3, 3).unwrap());
    }

    #[test]
    fn test_time_only_still_ahead_books_today() {
        let clock = clock_at(2026, 3, 2, 14, 0);
        let time = NaiveTime::from_hms_opt(15, 30, 0).unwrap();
        let date = infer_date_for_time(time, &clock, Duration::minutes(5));
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
    }

    #[test]
    fn test_normalize_start_time_only_human_format() {
        let clock = clock_at(2026, 3, 2, 10, 0);
        let params = BookingParams {
            time: Some("2:30 PM".to_string()),
            ..Default::default()
        };
        let start = normalize_start(&params, &profile(), &clock, Duration::minutes(5)).unwrap();
        let expected = local_to_utc(
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
            Chicago,
        )
        .unwrap();
        assert_eq!(start, expected);
    }

    #[test]
    fn test_normalize_start_explicit_offset_respected() {
        let clock = clock_at(2026, 3, 2, 10, 0);
        let params = BookingParams {
            start: Some("2026-03-03T14:00:00-06:00".to_string()),
            ..Default::default()
        };
        let start = normalize_start(&params, &profile(), &clock, Duration::minutes(5)).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 3, 20, 0, 0).unwrap());
    }

    #[test]
    fn test_normalize_start_unparsable() {
        let clock = clock_at(2026, 3, 2, 10, 0);
        let params = BookingParams {
            time: Some("whenever works".to_string()),
            ..Default::default()
        };
        assert!(normalize_start(&params, &profile(), &clock, Duration::minutes(5)).is_none());
    }

    #[test]
    fn test_classify_duplicate_same_attendee_close_start() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 20, 0, 0).unwrap();
        let existing = vec![appt(
            "a1",
            start + Duration::seconds(60),
            start + Duration::minutes(31),
            Some("Alice"),
        )];

        match classify_conflict(&existing, start, start + Duration::minutes(30), Some("Alice"), Duration::seconds(120)) {
            ConflictCheck::Duplicate(a) => assert_eq!(a.id, "a1"),
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_conflict_different_attendee() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 20, 0, 0).unwrap();
        let existing = vec![appt("a1", start, start + Duration::minutes(30), Some("Bob"))];

        match classify_conflict(&existing, start, start + Duration::minutes(30), Some("Alice"), Duration::seconds(120)) {
            ConflictCheck::Conflict => {}
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_duplicate_when_no_name_given() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 20, 0, 0).unwrap();
        let existing = vec![appt("a1", start, start + Duration::minutes(30), Some("Bob"))];

        match classify_conflict(&existing, start, start + Duration::minutes(30), None, Duration::seconds(120)) {
            ConflictCheck::Duplicate(_) => {}
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_conflict_far_overlap_is_not_duplicate() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 20, 0, 0).unwrap();
        // Overlapping one-hour appointment that started 20 minutes earlier
        let existing = vec![appt(
            "a1",
            start - Duration::minutes(20),
            start + Duration::minutes(40),
            Some("Alice"),
        )];

        match classify_conflict(&existing, start, start + Duration::minutes(30), Some("Alice"), Duration::seconds(120)) {
            ConflictCheck::Conflict => {}
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_free_ignores_cancelled() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 20, 0, 0).unwrap();
        let mut cancelled = appt("a1", start, start + Duration::minutes(30), Some("Alice"));
        cancelled.status = AppointmentStatus::Cancelled;

        match classify_conflict(&[cancelled], start, start + Duration::minutes(30), None, Duration::seconds(120)) {
            ConflictCheck::Free => {}
            other => panic!("expected free, got {other:?}"),
        }
    }
}
