use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Appointment, AvailabilityProfile, Slot};
use crate::services::booking::{self, BookingOutcome, BookingParams};
use crate::services::busy::collect_busy_intervals;
use crate::services::caller::{resolve_caller, CallerContext};
use crate::services::resolve::{self, RescheduleOutcome, ResolveSignals};
use crate::services::slots::{generate_slots, SlotQuery};
use crate::services::timezone::{
    day_bounds, format_voice, format_voice_time, local_to_utc, parse_date, parse_time_of_day,
    ZonedClock,
};
use crate::services::audit;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Action {
    CheckAvailability,
    Book,
    List,
    Reschedule,
    Cancel,
}

/// Every spelling the orchestration layer has sent for each operation.
/// Matching is case-insensitive; aliases containing "all" also set the
/// cancel-all flag.
const ACTION_ALIASES: &[(&str, Action)] = &[
    ("check_availability", Action::CheckAvailability),
    ("checkavailability", Action::CheckAvailability),
    ("get_availability", Action::CheckAvailability),
    ("availability", Action::CheckAvailability),
    ("check_slots", Action::CheckAvailability),
    ("find_slots", Action::CheckAvailability),
    ("get_slots", Action::CheckAvailability),
    ("free_slots", Action::CheckAvailability),
    ("book", Action::Book),
    ("book_appointment", Action::Book),
    ("bookappointment", Action::Book),
    ("create_appointment", Action::Book),
    ("schedule", Action::Book),
    ("schedule_appointment", Action::Book),
    ("make_appointment", Action::Book),
    ("list", Action::List),
    ("list_appointments", Action::List),
    ("listappointments", Action::List),
    ("get_appointments", Action::List),
    ("my_appointments", Action::List),
    ("upcoming_appointments", Action::List),
    ("reschedule", Action::Reschedule),
    ("reschedule_appointment", Action::Reschedule),
    ("rescheduleappointment", Action::Reschedule),
    ("move_appointment", Action::Reschedule),
    ("change_appointment", Action::Reschedule),
    ("update_appointment", Action::Reschedule),
    ("cancel", Action::Cancel),
    ("cancel_appointment", Action::Cancel),
    ("cancelappointment", Action::Cancel),
    ("delete_appointment", Action::Cancel),
    ("cancel_all_appointments", Action::Cancel),
];

/// Envelope keys tried, in order, for the action name.
const ACTION_KEYS: &[&str] = &["action", "tool", "function", "intent", "name"];

/// Envelope keys tried, in order, for the parameter object. Falling through
/// to the top level keeps flat payloads working.
const PARAM_KEYS: &[&str] = &["arguments", "args", "params", "parameters"];

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slots: Option<Vec<SlotView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointments: Option<Vec<AppointmentView>>,
}

impl ActionResponse {
    fn message(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
            appointment_id: None,
            slots: None,
            appointments: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SlotView {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub spoken: String,
}

#[derive(Debug, Serialize)]
pub struct AppointmentView {
    pub id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: String,
    pub spoken: String,
}

fn appointment_view(appt: &Appointment, tz: chrono_tz::Tz) -> AppointmentView {
    AppointmentView {
        id: appt.id.clone(),
        title: appt.title.clone(),
        start: appt.start_time,
        end: appt.end_time,
        status: appt.status.as_str().to_string(),
        spoken: format_voice(appt.start_time, tz),
    }
}

pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<Json<ActionResponse>, AppError> {
    let started = Instant::now();

    let action_name = extract_action_name(&payload)
        .ok_or_else(|| AppError::UnknownAction("(missing)".to_string()))?;
    let Some((action, alias_all)) = resolve_action(&action_name) else {
        audit_entry(&state, "unknown", &action_name, &payload, &json!({}), false, started);
        return Err(AppError::UnknownAction(action_name));
    };

    let params = extract_params(&payload);
    let account_id = resolve_account(&state, &params, &payload)?;

    let profile = load_profile(&state, &account_id)?;
    let clock = ZonedClock::new(Utc::now(), profile.tz());
    let caller = {
        let db = state.db.lock().unwrap();
        resolve_caller(&db, &account_id, &params)
    };

    tracing::info!(
        action = %action_name,
        account = %account_id,
        caller = caller.is_some(),
        "dispatching assistant request"
    );

    let result = match action {
        Action::CheckAvailability => check_availability(&state, &profile, &params, &clock).await,
        Action::Book => book(&state, &profile, caller.as_ref(), &params, &clock).await,
        Action::List => list(&state, &profile, caller.as_ref(), &clock),
        Action::Reschedule => reschedule(&state, &profile, caller, &params, &clock).await,
        Action::Cancel => cancel(&state, &profile, caller, &params, alias_all, &clock).await,
    };

    match result {
        Ok(response) => {
            let result_json =
                serde_json::to_value(&response).unwrap_or_else(|_| json!({}));
            audit_entry(&state, &account_id, &action_name, &params, &result_json, response.success, started);
            Ok(Json(response))
        }
        Err(e) => {
            audit_entry(
                &state,
                &account_id,
                &action_name,
                &params,
                &json!({ "error": e.to_string() }),
                false,
                started,
            );
            Err(AppError::Internal(e))
        }
    }
}

fn audit_entry(
    state: &AppState,
    account_id: &str,
    action: &str,
    params: &Value,
    result: &Value,
    success: bool,
    started: Instant,
) {
    audit::record(
        state,
        account_id,
        action,
        params,
        result,
        success,
        started.elapsed().as_millis() as i64,
    );
}

fn extract_action_name(payload: &Value) -> Option<String> {
    for key in ACTION_KEYS {
        if let Some(name) = payload.get(key).and_then(Value::as_str) {
            if !name.trim().is_empty() {
                return Some(name.trim().to_string());
            }
        }
    }
    None
}

fn resolve_action(name: &str) -> Option<(Action, bool)> {
    let normalized = name.to_lowercase();
    let action = ACTION_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, action)| *action)?;
    Some((action, normalized.contains("all")))
}

fn extract_params(payload: &Value) -> Value {
    for key in PARAM_KEYS {
        match payload.get(key) {
            Some(Value::Object(_)) => return payload[key].clone(),
            // Some layers double-encode the arguments object.
            Some(Value::String(raw)) => {
                if let Ok(parsed @ Value::Object(_)) = serde_json::from_str(raw) {
                    return parsed;
                }
            }
            _ => {}
        }
    }
    payload.clone()
}

fn resolve_account(state: &AppState, params: &Value, payload: &Value) -> Result<String, AppError> {
    for source in [params, payload] {
        if let Some(id) = source.get("account_id").and_then(Value::as_str) {
            if !id.trim().is_empty() {
                return Ok(id.trim().to_string());
            }
        }
    }
    if state.config.default_account_id.is_empty() {
        return Err(AppError::MissingAccount);
    }
    Ok(state.config.default_account_id.clone())
}

/// Unconfigured accounts get standard business hours rather than a refusal.
fn load_profile(state: &AppState, account_id: &str) -> Result<AvailabilityProfile, AppError> {
    let db = state.db.lock().unwrap();
    match queries::get_profile(&db, account_id).map_err(AppError::Internal)? {
        Some(profile) => Ok(profile),
        None => {
            tracing::debug!(account = %account_id, "no availability profile, using fallback");
            Ok(AvailabilityProfile::generic_fallback(
                account_id,
                &state.config.default_timezone,
            ))
        }
    }
}

fn param_str<'a>(params: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| params.get(k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn param_i64(params: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| {
        let v = params.get(k)?;
        v.as_i64().or_else(|| v.as_str()?.trim().parse().ok())
    })
}

fn param_flag(params: &Value, keys: &[&str]) -> bool {
    keys.iter().any(|k| match params.get(k) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "true" | "yes" | "1" | "all"),
        _ => false,
    })
}

async fn check_availability(
    state: &AppState,
    profile: &AvailabilityProfile,
    params: &Value,
    clock: &ZonedClock,
) -> anyhow::Result<ActionResponse> {
    let tz = profile.tz();
    let start_date = param_str(params, &["date", "start_date", "day"])
        .and_then(parse_date)
        .map_or(clock.today(), |d| d.max(clock.today()));
    let end_date = param_str(params, &["end_date"])
        .and_then(parse_date)
        .unwrap_or(start_date + Duration::days(6))
        .min(clock.today() + Duration::days(profile.max_days_ahead.max(0)));

    let query = SlotQuery {
        start_date: Some(start_date),
        end_date: Some(end_date),
        duration_minutes: param_i64(params, &["duration_minutes", "duration"]),
    };

    let range_start = day_bounds(start_date, tz).map_or(clock.now, |(s, _)| s);
    let range_end = day_bounds(end_date, tz)
        .map_or(clock.now + Duration::days(7), |(_, e)| e);

    let busy = collect_busy_intervals(
        state,
        &profile.account_id,
        profile.provider_preference,
        range_start,
        range_end,
        clock.now,
    )
    .await?;

    let slots = generate_slots(profile, &busy, clock, &query);
    if slots.is_empty() {
        let message = if profile.schedule.is_empty() {
            "I don't see any openings in that range. Would you like to try different days?"
                .to_string()
        } else {
            format!(
                "I don't see any openings in that range. Our hours are {}.",
                profile.schedule.to_human_readable()
            )
        };
        return Ok(ActionResponse::message(true, message));
    }

    // Full date for the first slot of each day, time-only for the rest.
    let mut spoken: Vec<String> = Vec::with_capacity(slots.len());
    let mut prev_day = None;
    for slot in &slots {
        let day = slot.start.with_timezone(&tz).date_naive();
        if prev_day == Some(day) {
            spoken.push(format_voice_time(slot.start, tz));
        } else {
            spoken.push(format_voice(slot.start, tz));
        }
        prev_day = Some(day);
    }
    let views: Vec<SlotView> = slots
        .iter()
        .map(|s: &Slot| SlotView {
            start: s.start,
            end: s.end,
            spoken: format_voice(s.start, tz),
        })
        .collect();

    Ok(ActionResponse {
        success: true,
        message: format!("I have these times available: {}.", spoken.join("; ")),
        appointment_id: None,
        slots: Some(views),
        appointments: None,
    })
}

async fn book(
    state: &AppState,
    profile: &AvailabilityProfile,
    caller: Option<&CallerContext>,
    params: &Value,
    clock: &ZonedClock,
) -> anyhow::Result<ActionResponse> {
    let booking_params: BookingParams =
        serde_json::from_value(params.clone()).unwrap_or_default();
    let tz = profile.tz();

    match booking::book_appointment(state, profile, caller, &booking_params, clock).await? {
        BookingOutcome::Booked(appt) => Ok(ActionResponse {
            success: true,
            message: format!("You're booked for {}.", format_voice(appt.start_time, tz)),
            appointment_id: Some(appt.id.clone()),
            slots: None,
            appointments: Some(vec![appointment_view(&appt, tz)]),
        }),
        BookingOutcome::Duplicate(appt) => Ok(ActionResponse {
            success: true,
            message: format!(
                "You already have that appointment for {}.",
                format_voice(appt.start_time, tz)
            ),
            appointment_id: Some(appt.id.clone()),
            slots: None,
            appointments: Some(vec![appointment_view(&appt, tz)]),
        }),
        BookingOutcome::Conflict => Ok(ActionResponse::message(
            false,
            "That time is already taken. Would you like to hear other openings?",
        )),
        BookingOutcome::PastTime => Ok(ActionResponse::message(
            false,
            "That time has already passed. What other time works for you?",
        )),
        BookingOutcome::Unparsable => Ok(ActionResponse::message(
            false,
            "I couldn't make out the date and time. Could you say that again?",
        )),
    }
}

fn list(
    state: &AppState,
    profile: &AvailabilityProfile,
    caller: Option<&CallerContext>,
    clock: &ZonedClock,
) -> anyhow::Result<ActionResponse> {
    let upcoming = {
        let db = state.db.lock().unwrap();
        queries::get_upcoming_appointments(&db, &profile.account_id, clock.now)?
    };
    let scoped = match caller {
        Some(ctx) => {
            let own = resolve::filter_for_caller(&upcoming, ctx);
            // An unrecognized caller still hears the account's schedule.
            if own.is_empty() && ctx.contact_id.is_none() {
                upcoming
            } else {
                own
            }
        }
        None => upcoming,
    };

    if scoped.is_empty() {
        return Ok(ActionResponse::message(true, "You have no upcoming appointments."));
    }

    let tz = profile.tz();
    let views: Vec<AppointmentView> = scoped.iter().map(|a| appointment_view(a, tz)).collect();
    let spoken: Vec<String> = scoped
        .iter()
        .take(3)
        .map(|a| format!("{} on {}", a.title, format_voice(a.start_time, tz)))
        .collect();

    Ok(ActionResponse {
        success: true,
        message: format!("You have {} upcoming: {}.", scoped.len(), spoken.join("; ")),
        appointment_id: None,
        slots: None,
        appointments: Some(views),
    })
}

fn build_signals(
    profile: &AvailabilityProfile,
    caller: Option<CallerContext>,
    params: &Value,
    target_date_keys: &[&str],
    target_time_keys: &[&str],
) -> (ResolveSignals, bool) {
    let tz = profile.tz();
    let date = param_str(params, target_date_keys).and_then(parse_date);
    let time = param_str(params, target_time_keys).and_then(parse_time_of_day);

    // A date without a time targets the whole day; midday plus a wide
    // window covers it.
    let (target_time, date_only) = match (date, time) {
        (Some(d), Some(t)) => (local_to_utc(d, t, tz), false),
        (Some(d), None) => (
            local_to_utc(d, chrono::NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default(), tz),
            true,
        ),
        _ => (None, false),
    };

    let signals = ResolveSignals {
        appointment_id: param_str(params, &["appointment_id", "id"]).map(str::to_string),
        event_id: param_str(params, &["event_id", "calendar_event_id"]).map(str::to_string),
        caller,
        target_time,
        name_fragment: param_str(params, &["name", "customer_name", "attendee", "title"])
            .map(str::to_string),
    };
    (signals, date_only)
}

async fn reschedule(
    state: &AppState,
    profile: &AvailabilityProfile,
    caller: Option<CallerContext>,
    params: &Value,
    clock: &ZonedClock,
) -> anyhow::Result<ActionResponse> {
    let (signals, date_only) = build_signals(
        profile,
        caller,
        params,
        &["old_date", "original_date"],
        &["old_time", "original_time"],
    );
    let window = if date_only {
        Duration::hours(12)
    } else {
        Duration::hours(state.config.match_window_hours)
    };

    let targets = {
        let db = state.db.lock().unwrap();
        resolve::resolve_targets(&db, &profile.account_id, &signals, clock.now, window)?
    };
    let Some(target) = targets.into_iter().next() else {
        return Ok(ActionResponse::message(
            false,
            "I couldn't find an appointment to move. Could you tell me which one you mean?",
        ));
    };

    let new_time_params = BookingParams {
        start: param_str(params, &["new_start", "new_datetime", "start", "start_time"])
            .map(str::to_string),
        date: param_str(params, &["new_date", "date", "day"]).map(str::to_string),
        time: param_str(params, &["new_time", "time"]).map(str::to_string),
        ..Default::default()
    };
    let tolerance = Duration::minutes(state.config.time_inference_tolerance_minutes);
    let Some(new_start) = booking::normalize_start(&new_time_params, profile, clock, tolerance)
    else {
        return Ok(ActionResponse::message(
            false,
            "I couldn't make out the new time. Could you say that again?",
        ));
    };
    let new_end = new_start + (target.end_time - target.start_time);

    let tz = profile.tz();
    match resolve::reschedule_appointment(state, target, new_start, new_end, clock).await? {
        RescheduleOutcome::Updated(appt) => Ok(ActionResponse {
            success: true,
            message: format!("Done, you're moved to {}.", format_voice(appt.start_time, tz)),
            appointment_id: Some(appt.id.clone()),
            slots: None,
            appointments: Some(vec![appointment_view(&appt, tz)]),
        }),
        RescheduleOutcome::PastTime => Ok(ActionResponse::message(
            false,
            "That time has already passed. What other time works for you?",
        )),
    }
}

async fn cancel(
    state: &AppState,
    profile: &AvailabilityProfile,
    caller: Option<CallerContext>,
    params: &Value,
    alias_all: bool,
    clock: &ZonedClock,
) -> anyhow::Result<ActionResponse> {
    let all = alias_all || param_flag(params, &["all", "cancel_all"]);
    let (signals, date_only) =
        build_signals(profile, caller, params, &["date", "day"], &["time"]);
    let window = if date_only {
        Duration::hours(12)
    } else {
        Duration::hours(state.config.match_window_hours)
    };

    let targets = {
        let db = state.db.lock().unwrap();
        resolve::resolve_targets(&db, &profile.account_id, &signals, clock.now, window)?
    };
    if targets.is_empty() {
        return Ok(ActionResponse::message(
            false,
            "I couldn't find an appointment to cancel.",
        ));
    }

    let outcome = resolve::cancel_appointments(state, targets, all, clock).await?;
    let tz = profile.tz();

    if outcome.cancelled.is_empty() {
        // Only already-cancelled rows matched; a repeated cancel succeeds.
        return Ok(ActionResponse::message(
            true,
            "That appointment is already cancelled.",
        ));
    }

    let message = if outcome.cancelled.len() == 1 {
        format!(
            "Your appointment for {} is cancelled.",
            format_voice(outcome.cancelled[0].start_time, tz)
        )
    } else {
        format!("All {} appointments are cancelled.", outcome.cancelled.len())
    };

    Ok(ActionResponse {
        success: true,
        message,
        appointment_id: outcome.cancelled.first().map(|a| a.id.clone()),
        slots: None,
        appointments: Some(outcome.cancelled.iter().map(|a| appointment_view(a, tz)).collect()),
    })
}
