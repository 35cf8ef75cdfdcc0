use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Explicit clock context threaded through every date computation. Core
/// functions never read the process clock or zone themselves; only the
/// handler layer constructs one of these from `Utc::now()`.
#[derive(Debug, Clone, Copy)]
pub struct ZonedClock {
    pub now: DateTime<Utc>,
    pub tz: Tz,
}

impl ZonedClock {
    pub fn new(now: DateTime<Utc>, tz: Tz) -> Self {
        Self { now, tz }
    }

    /// Today's calendar date in the account's timezone.
    pub fn today(&self) -> NaiveDate {
        self.now.with_timezone(&self.tz).date_naive()
    }

    /// Current wall-clock date-time in the account's timezone.
    pub fn local_now(&self) -> NaiveDateTime {
        self.now.with_timezone(&self.tz).naive_local()
    }
}

/// Resolve a wall-clock (date, time) pair in `tz` to a UTC instant.
///
/// Ambiguous times during a DST fold take the earlier mapping; times that
/// fall inside a DST gap do not exist and yield `None`.
pub fn local_to_utc(date: NaiveDate, time: NaiveTime, tz: Tz) -> Option<DateTime<Utc>> {
    let local = tz.from_local_datetime(&date.and_time(time));
    local
        .single()
        .or_else(|| local.earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

/// UTC bounds of one local calendar day: local midnight through the next
/// day's local midnight. Never computed as `start + 24h`, which would drift
/// across daylight-saving transitions.
pub fn day_bounds(date: NaiveDate, tz: Tz) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let midnight = NaiveTime::from_hms_opt(0, 0, 0)?;
    let start = local_to_utc(date, midnight, tz)?;
    let end = local_to_utc(date.succ_opt()?, midnight, tz)?;
    Some((start, end))
}

/// Inclusive calendar-day iteration by date succession, not epoch math.
pub fn iter_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut day = start;
    while day <= end {
        days.push(day);
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    days
}

/// Render a UTC instant in the account timezone for a spoken reply,
/// e.g. "Monday, March 2 at 2:30 PM".
pub fn format_voice(instant: DateTime<Utc>, tz: Tz) -> String {
    instant
        .with_timezone(&tz)
        .format("%A, %B %-d at %-I:%M %p")
        .to_string()
}

/// Short spoken time-of-day, e.g. "2:30 PM".
pub fn format_voice_time(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format("%-I:%M %p").to_string()
}

/// Parse a human time-of-day: "14:30", "2:30 PM", "2:30pm", "2 PM".
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    let trimmed = s.trim();
    for fmt in ["%H:%M:%S", "%H:%M"] {
        if let Ok(t) = NaiveTime::parse_from_str(trimmed, fmt) {
            return Some(t);
        }
    }

    // Normalize "2:30pm" / "2 pm" forms for %p parsing.
    let upper = trimmed.to_uppercase().replace("A.M.", "AM").replace("P.M.", "PM");
    let spaced = if upper.ends_with("AM") || upper.ends_with("PM") {
        let (head, tail) = upper.split_at(upper.len() - 2);
        format!("{} {}", head.trim(), tail)
    } else {
        upper
    };
    for fmt in ["%I:%M %p", "%I %p"] {
        if let Ok(t) = NaiveTime::parse_from_str(&spaced, fmt) {
            return Some(t);
        }
    }
    None
}

/// Parse a human date: "2026-03-02", "03/02/2026".
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let trimmed = s.trim();
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(d);
        }
    }
    None
}
