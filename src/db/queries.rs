use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection};

use crate::models::{
    Appointment, AppointmentMetadata, AppointmentStatus, AvailabilityProfile, CalendarIntegration,
    Contact, ProviderKind, ProviderPreference, WeeklySchedule,
};

const TS_FMT: &str = "%Y-%m-%d %H:%M:%S";

fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.naive_utc().format(TS_FMT).to_string()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, TS_FMT)
        .map(|n| DateTime::from_naive_utc_and_offset(n, Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ── Availability Profiles ──

pub fn get_profile(conn: &Connection, account_id: &str) -> anyhow::Result<Option<AvailabilityProfile>> {
    let result = conn.query_row(
        "SELECT account_id, timezone, weekly_schedule, slot_interval_minutes,
                default_duration_minutes, buffer_before_minutes, buffer_after_minutes,
                min_notice_hours, max_days_ahead, provider_preference
         FROM availability_profiles WHERE account_id = ?1",
        params![account_id],
        |row| {
            let schedule_json: String = row.get(2)?;
            let preference: String = row.get(9)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                schedule_json,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, i64>(8)?,
                preference,
            ))
        },
    );

    match result {
        Ok((
            account_id,
            timezone,
            schedule_json,
            slot_interval,
            default_duration,
            buffer_before,
            buffer_after,
            min_notice,
            max_days,
            preference,
        )) => {
            let schedule = WeeklySchedule::from_json(&schedule_json)
                .unwrap_or(WeeklySchedule { windows: vec![] });
            Ok(Some(AvailabilityProfile {
                account_id,
                timezone,
                schedule,
                slot_interval_minutes: slot_interval,
                default_duration_minutes: default_duration,
                buffer_before_minutes: buffer_before,
                buffer_after_minutes: buffer_after,
                min_notice_hours: min_notice,
                max_days_ahead: max_days,
                provider_preference: ProviderPreference::parse(&preference),
            }))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn save_profile(conn: &Connection, profile: &AvailabilityProfile) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO availability_profiles (account_id, timezone, weekly_schedule,
            slot_interval_minutes, default_duration_minutes, buffer_before_minutes,
            buffer_after_minutes, min_notice_hours, max_days_ahead, provider_preference)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(account_id) DO UPDATE SET
           timezone = excluded.timezone,
           weekly_schedule = excluded.weekly_schedule,
           slot_interval_minutes = excluded.slot_interval_minutes,
           default_duration_minutes = excluded.default_duration_minutes,
           buffer_before_minutes = excluded.buffer_before_minutes,
           buffer_after_minutes = excluded.buffer_after_minutes,
           min_notice_hours = excluded.min_notice_hours,
           max_days_ahead = excluded.max_days_ahead,
           provider_preference = excluded.provider_preference,
           updated_at = datetime('now')",
        params![
            profile.account_id,
            profile.timezone,
            profile.schedule.to_json(),
            profile.slot_interval_minutes,
            profile.default_duration_minutes,
            profile.buffer_before_minutes,
            profile.buffer_after_minutes,
            profile.min_notice_hours,
            profile.max_days_ahead,
            profile.provider_preference.as_str(),
        ],
    )?;
    Ok(())
}

// ── Calendar Integrations ──

pub fn get_integration(
    conn: &Connection,
    account_id: &str,
    provider: ProviderKind,
) -> anyhow::Result<Option<CalendarIntegration>> {
    let result = conn.query_row(
        "SELECT account_id, provider, access_token, refresh_token, expires_at, calendar_id, sync_enabled
         FROM calendar_integrations WHERE account_id = ?1 AND provider = ?2",
        params![account_id, provider.as_str()],
        |row| {
            let expires_at: String = row.get(4)?;
            Ok(CalendarIntegration {
                account_id: row.get(0)?,
                provider,
                access_token: row.get(2)?,
                refresh_token: row.get(3)?,
                expires_at: parse_ts(&expires_at),
                calendar_id: row.get(5)?,
                sync_enabled: row.get::<_, i64>(6)? != 0,
            })
        },
    );

    match result {
        Ok(integration) => Ok(Some(integration)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn save_integration(conn: &Connection, integration: &CalendarIntegration) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO calendar_integrations
            (account_id, provider, access_token, refresh_token, expires_at, calendar_id, sync_enabled)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(account_id, provider) DO UPDATE SET
           access_token = excluded.access_token,
           refresh_token = excluded.refresh_token,
           expires_at = excluded.expires_at,
           calendar_id = excluded.calendar_id,
           sync_enabled = excluded.sync_enabled",
        params![
            integration.account_id,
            integration.provider.as_str(),
            integration.access_token,
            integration.refresh_token,
            fmt_ts(integration.expires_at),
            integration.calendar_id,
            integration.sync_enabled as i64,
        ],
    )?;
    Ok(())
}

pub fn update_integration_tokens(
    conn: &Connection,
    account_id: &str,
    provider: ProviderKind,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: DateTime<Utc>,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE calendar_integrations
         SET access_token = ?1,
             refresh_token = COALESCE(?2, refresh_token),
             expires_at = ?3
         WHERE account_id = ?4 AND provider = ?5",
        params![
            access_token,
            refresh_token,
            fmt_ts(expires_at),
            account_id,
            provider.as_str(),
        ],
    )?;
    Ok(())
}

// ── Appointments ──

pub fn create_appointment(conn: &Connection, appt: &Appointment) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO appointments (id, account_id, contact_id, title, start_time, end_time,
            timezone, status, primary_event_id, secondary_event_id, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            appt.id,
            appt.account_id,
            appt.contact_id,
            appt.title,
            fmt_ts(appt.start_time),
            fmt_ts(appt.end_time),
            appt.timezone,
            appt.status.as_str(),
            appt.primary_event_id,
            appt.secondary_event_id,
            appt.metadata.to_json(),
            fmt_ts(appt.created_at),
            fmt_ts(appt.updated_at),
        ],
    )?;
    Ok(())
}

const APPOINTMENT_COLS: &str =
    "id, account_id, contact_id, title, start_time, end_time, timezone, status,
     primary_event_id, secondary_event_id, metadata, created_at, updated_at";

fn parse_appointment_row(row: &rusqlite::Row) -> anyhow::Result<Appointment> {
    let start_time: String = row.get(4)?;
    let end_time: String = row.get(5)?;
    let status: String = row.get(7)?;
    let metadata: String = row.get(10)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;

    Ok(Appointment {
        id: row.get(0)?,
        account_id: row.get(1)?,
        contact_id: row.get(2)?,
        title: row.get(3)?,
        start_time: parse_ts(&start_time),
        end_time: parse_ts(&end_time),
        timezone: row.get(6)?,
        status: AppointmentStatus::parse(&status),
        primary_event_id: row.get(8)?,
        secondary_event_id: row.get(9)?,
        metadata: AppointmentMetadata::from_json(&metadata),
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

pub fn get_appointment_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Appointment>> {
    let result = conn.query_row(
        &format!("SELECT {APPOINTMENT_COLS} FROM appointments WHERE id = ?1"),
        params![id],
        |row| Ok(parse_appointment_row(row)),
    );

    match result {
        Ok(appt) => Ok(Some(appt?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_appointment_by_event_id(
    conn: &Connection,
    account_id: &str,
    event_id: &str,
) -> anyhow::Result<Option<Appointment>> {
    let result = conn.query_row(
        &format!(
            "SELECT {APPOINTMENT_COLS} FROM appointments
             WHERE account_id = ?1 AND (primary_event_id = ?2 OR secondary_event_id = ?2)"
        ),
        params![account_id, event_id],
        |row| Ok(parse_appointment_row(row)),
    );

    match result {
        Ok(appt) => Ok(Some(appt?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Non-cancelled appointments overlapping `[start, end)`.
pub fn get_appointments_in_range(
    conn: &Connection,
    account_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> anyhow::Result<Vec<Appointment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLS} FROM appointments
         WHERE account_id = ?1 AND status != 'cancelled'
           AND start_time < ?2 AND end_time > ?3
         ORDER BY start_time ASC"
    ))?;

    let rows = stmt.query_map(
        params![account_id, fmt_ts(end), fmt_ts(start)],
        |row| Ok(parse_appointment_row(row)),
    )?;

    let mut appointments = vec![];
    for row in rows {
        appointments.push(row??);
    }
    Ok(appointments)
}

/// Non-cancelled appointments starting at or after `now`, soonest first.
pub fn get_upcoming_appointments(
    conn: &Connection,
    account_id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<Appointment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLS} FROM appointments
         WHERE account_id = ?1 AND status != 'cancelled' AND start_time >= ?2
         ORDER BY start_time ASC"
    ))?;

    let rows = stmt.query_map(params![account_id, fmt_ts(now)], |row| {
        Ok(parse_appointment_row(row))
    })?;

    let mut appointments = vec![];
    for row in rows {
        appointments.push(row??);
    }
    Ok(appointments)
}

pub fn update_appointment_times(
    conn: &Connection,
    id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE appointments SET start_time = ?1, end_time = ?2, updated_at = ?3 WHERE id = ?4",
        params![fmt_ts(start), fmt_ts(end), fmt_ts(Utc::now()), id],
    )?;
    Ok(count > 0)
}

pub fn update_appointment_status(
    conn: &Connection,
    id: &str,
    status: &AppointmentStatus,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE appointments SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), fmt_ts(Utc::now()), id],
    )?;
    Ok(count > 0)
}

pub fn set_appointment_event_id(
    conn: &Connection,
    id: &str,
    provider: ProviderKind,
    event_id: Option<&str>,
) -> anyhow::Result<()> {
    let column = match provider {
        ProviderKind::Primary => "primary_event_id",
        ProviderKind::Secondary => "secondary_event_id",
    };
    conn.execute(
        &format!("UPDATE appointments SET {column} = ?1, updated_at = ?2 WHERE id = ?3"),
        params![event_id, fmt_ts(Utc::now()), id],
    )?;
    Ok(())
}

pub fn update_appointment_metadata(
    conn: &Connection,
    id: &str,
    metadata: &AppointmentMetadata,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE appointments SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
        params![metadata.to_json(), fmt_ts(Utc::now()), id],
    )?;
    Ok(())
}

// ── Contacts ──

pub fn find_contact_by_phones(
    conn: &Connection,
    account_id: &str,
    phones: &[String],
) -> anyhow::Result<Option<Contact>> {
    for phone in phones {
        let result = conn.query_row(
            "SELECT id, account_id, name, phone, email FROM contacts
             WHERE account_id = ?1 AND phone = ?2",
            params![account_id, phone],
            |row| {
                Ok(Contact {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    name: row.get(2)?,
                    phone: row.get(3)?,
                    email: row.get(4)?,
                })
            },
        );

        match result {
            Ok(contact) => return Ok(Some(contact)),
            Err(rusqlite::Error::QueryReturnedNoRows) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}

pub fn save_contact(conn: &Connection, contact: &Contact) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO contacts (id, account_id, name, phone, email)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           phone = excluded.phone,
           email = excluded.email",
        params![
            contact.id,
            contact.account_id,
            contact.name,
            contact.phone,
            contact.email,
        ],
    )?;
    Ok(())
}

// ── Audit Log ──

pub fn insert_audit(
    conn: &Connection,
    account_id: &str,
    action: &str,
    params_json: &str,
    result_json: &str,
    success: bool,
    duration_ms: i64,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO audit_log (account_id, action, params, result, success, duration_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            account_id,
            action,
            params_json,
            result_json,
            success as i64,
            duration_ms,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::TimeZone;

    fn setup_db() -> Connection {
        db::init_db(":memory:").unwrap()
    }

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn make_appointment(id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Appointment {
        let now = Utc::now();
        Appointment {
            id: id.to_string(),
            account_id: "acct".to_string(),
            contact_id: None,
            title: "Consultation".to_string(),
            start_time: start,
            end_time: end,
            timezone: "America/Chicago".to_string(),
            status: AppointmentStatus::Scheduled,
            primary_event_id: None,
            secondary_event_id: None,
            metadata: AppointmentMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_appointment_round_trip() {
        let conn = setup_db();
        let appt = make_appointment("a1", utc(15, 0), utc(15, 30));
        create_appointment(&conn, &appt).unwrap();

        let loaded = get_appointment_by_id(&conn, "a1").unwrap().unwrap();
        assert_eq!(loaded.start_time, utc(15, 0));
        assert_eq!(loaded.end_time, utc(15, 30));
        assert_eq!(loaded.status, AppointmentStatus::Scheduled);
    }

    #[test]
    fn test_range_query_excludes_cancelled_and_outside() {
        let conn = setup_db();
        create_appointment(&conn, &make_appointment("in", utc(15, 0), utc(15, 30))).unwrap();
        create_appointment(&conn, &make_appointment("out", utc(20, 0), utc(20, 30))).unwrap();

        let mut cancelled = make_appointment("gone", utc(16, 0), utc(16, 30));
        cancelled.status = AppointmentStatus::Cancelled;
        create_appointment(&conn, &cancelled).unwrap();

        let found = get_appointments_in_range(&conn, "acct", utc(14, 0), utc(18, 0)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "in");
    }

    #[test]
    fn test_range_query_includes_straddling_appointment() {
        let conn = setup_db();
        create_appointment(&conn, &make_appointment("straddle", utc(13, 30), utc(14, 30))).unwrap();

        let found = get_appointments_in_range(&conn, "acct", utc(14, 0), utc(18, 0)).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_event_id_lookup() {
        let conn = setup_db();
        let mut appt = make_appointment("a2", utc(15, 0), utc(15, 30));
        appt.primary_event_id = Some("ev-123".to_string());
        create_appointment(&conn, &appt).unwrap();

        let found = get_appointment_by_event_id(&conn, "acct", "ev-123").unwrap();
        assert_eq!(found.unwrap().id, "a2");
        assert!(get_appointment_by_event_id(&conn, "acct", "ev-999")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_integration_token_update_keeps_refresh_token() {
        let conn = setup_db();
        let integration = CalendarIntegration {
            account_id: "acct".to_string(),
            provider: ProviderKind::Primary,
            access_token: "old".to_string(),
            refresh_token: Some("keep-me".to_string()),
            expires_at: utc(10, 0),
            calendar_id: "cal".to_string(),
            sync_enabled: true,
        };
        save_integration(&conn, &integration).unwrap();

        update_integration_tokens(&conn, "acct", ProviderKind::Primary, "new", None, utc(12, 0))
            .unwrap();

        let loaded = get_integration(&conn, "acct", ProviderKind::Primary)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.access_token, "new");
        assert_eq!(loaded.refresh_token.as_deref(), Some("keep-me"));
        assert_eq!(loaded.expires_at, utc(12, 0));
    }

    #[test]
    fn test_contact_lookup_tries_alternates() {
        let conn = setup_db();
        save_contact(
            &conn,
            &Contact {
                id: "c1".to_string(),
                account_id: "acct".to_string(),
                name: Some("Alice".to_string()),
                phone: "+15551230001".to_string(),
                email: None,
            },
        )
        .unwrap();

        let found = find_contact_by_phones(
            &conn,
            "acct",
            &["5551230001".to_string(), "+15551230001".to_string()],
        )
        .unwrap();
        assert_eq!(found.unwrap().id, "c1");
    }

    #[test]
    fn test_profile_round_trip() {
        let conn = setup_db();
        let profile = AvailabilityProfile::generic_fallback("acct", "America/Chicago");
        save_profile(&conn, &profile).unwrap();

        let loaded = get_profile(&conn, "acct").unwrap().unwrap();
        assert_eq!(loaded.timezone, "America/Chicago");
        assert_eq!(loaded.slot_interval_minutes, 30);
        assert_eq!(loaded.schedule.windows.len(), 5);
    }
}
