use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Timelike};

use crate::models::{AvailabilityProfile, BusyInterval, Slot};
use crate::services::timezone::{iter_days, local_to_utc, ZonedClock};

/// Spoken lists stay short: generation stops at five slots by design.
pub const MAX_SLOTS: usize = 5;

#[derive(Debug, Clone, Copy, Default)]
pub struct SlotQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub duration_minutes: Option<i64>,
}

/// Walk calendar days in the account's timezone, step each configured window
/// by the slot interval, and keep candidates whose buffered extent clears
/// every busy interval and whose start honors the minimum notice.
pub fn generate_slots(
    profile: &AvailabilityProfile,
    busy: &[BusyInterval],
    clock: &ZonedClock,
    query: &SlotQuery,
) -> Vec<Slot> {
    let tz = profile.tz();
    let today = clock.today();

    // The start never precedes today; the span never exceeds max_days_ahead.
    let start_date = query.start_date.map_or(today, |d| d.max(today));
    let horizon = today + Duration::days(profile.max_days_ahead.max(0));
    let end_date = query
        .end_date
        .unwrap_or(start_date + Duration::days(6))
        .min(horizon);
    if end_date < start_date {
        return Vec::new();
    }

    let duration = Duration::minutes(
        query
            .duration_minutes
            .unwrap_or(profile.default_duration_minutes),
    );
    let interval = profile.slot_interval_minutes.max(1);
    let buffer_before = Duration::minutes(profile.buffer_before_minutes);
    let buffer_after = Duration::minutes(profile.buffer_after_minutes);
    let earliest_start = clock.now + Duration::hours(profile.min_notice_hours);

    let mut slots = Vec::new();

    'days: for day in iter_days(start_date, end_date) {
        for (window_start, window_end) in profile.schedule.windows_for(day.weekday()) {
            let open = minutes_of_day(window_start);
            let close = minutes_of_day(window_end);

            let mut candidate = open;
            while candidate + duration.num_minutes() <= close {
                let start_local = time_from_minutes(candidate);
                let end_local = time_from_minutes(candidate + duration.num_minutes());

                // Skip wall-clock times erased by a DST gap.
                if let (Some(start), Some(end)) = (
                    local_to_utc(day, start_local, tz),
                    local_to_utc(day, end_local, tz),
                ) {
                    let buffered_start = start - buffer_before;
                    let buffered_end = end + buffer_after;
                    let free = !busy
                        .iter()
                        .any(|b| b.intersects(buffered_start, buffered_end));

                    if start >= earliest_start && free {
                        slots.push(Slot { start, end });
                        if slots.len() >= MAX_SLOTS {
                            break 'days;
                        }
                    }
                }

                candidate += interval;
            }
        }
    }

    slots
}

fn minutes_of_day(t: NaiveTime) -> i64 {
    i64::from(t.hour()) * 60 + i64::from(t.minute())
}

fn time_from_minutes(m: i64) -> NaiveTime {
    let clamped = m.clamp(0, 23 * 60 + 59);
    NaiveTime::from_hms_opt((clamped / 60) as u32, (clamped % 60) as u32, 0)
        .unwrap_or(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WeeklySchedule;
    use chrono::{DateTime, TimeZone, Utc, Weekday};
    use chrono_tz::America::Chicago;

    fn monday_profile() -> AvailabilityProfile {
        let mut profile = AvailabilityProfile::generic_fallback("acct", "America/Chicago");
        profile.schedule = WeeklySchedule::from_json(
            r#"{"windows":[{"day":"mon","start":"09:00","end":"17:00"}]}"#,
        )
        .unwrap();
        profile
    }

    // 2026-03-02 is a Monday; Chicago is UTC-6 that day.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn chicago_utc(d: NaiveDate, h: u32, m: u32) -> DateTime<Utc> {
        local_to_utc(d, NaiveTime::from_hms_opt(h, m, 0).unwrap(), Chicago).unwrap()
    }

    fn sunday_evening_clock() -> ZonedClock {
        // Sunday 18:00 Chicago, the evening before the queried Monday
        ZonedClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap(),
            Chicago,
        )
    }

    fn monday_query() -> SlotQuery {
        SlotQuery {
            start_date: Some(monday()),
            end_date: Some(monday()),
            duration_minutes: Some(30),
        }
    }

    #[test]
    fn test_first_five_slots_of_open_day() {
        let profile = monday_profile();
        assert_eq!(monday().weekday(), Weekday::Mon);

        let slots = generate_slots(&profile, &[], &sunday_evening_clock(), &monday_query());

        let expected: Vec<DateTime<Utc>> = [(9, 0), (9, 30), (10, 0), (10, 30), (11, 0)]
            .iter()
            .map(|(h, m)| chicago_utc(monday(), *h, *m))
            .collect();
        assert_eq!(slots.len(), 5);
        let starts: Vec<_> = slots.iter().map(|s| s.start).collect();
        assert_eq!(starts, expected);
    }

    #[test]
    fn test_busy_slot_excluded_neighbors_kept() {
        let profile = monday_profile();
        let busy = vec![BusyInterval::new(
            chicago_utc(monday(), 14, 0),
            chicago_utc(monday(), 14, 30),
        )];

        // Narrow the range so 14:00 falls inside the first five candidates.
        let mut query = monday_query();
        query.duration_minutes = Some(30);
        let clock = ZonedClock::new(chicago_utc(monday(), 13, 0), Chicago);
        let slots = generate_slots(&profile, &busy, &clock, &query);

        let starts: Vec<_> = slots.iter().map(|s| s.start).collect();
        assert!(starts.contains(&chicago_utc(monday(), 13, 30)));
        assert!(!starts.contains(&chicago_utc(monday(), 14, 0)));
        assert!(starts.contains(&chicago_utc(monday(), 14, 30)));
    }

    #[test]
    fn test_min_notice_filters_early_slots() {
        let mut profile = monday_profile();
        profile.min_notice_hours = 3;

        // 08:00 Monday morning in Chicago; notice pushes earliest start to 11:00
        let clock = ZonedClock::new(chicago_utc(monday(), 8, 0), Chicago);
        let slots = generate_slots(&profile, &[], &clock, &monday_query());

        assert!(!slots.is_empty());
        for slot in &slots {
            assert!(slot.start >= clock.now + Duration::hours(3));
        }
        assert_eq!(slots[0].start, chicago_utc(monday(), 11, 0));
    }

    #[test]
    fn test_buffers_widen_the_exclusion() {
        let mut profile = monday_profile();
        profile.buffer_before_minutes = 15;
        profile.buffer_after_minutes = 15;

        let busy = vec![BusyInterval::new(
            chicago_utc(monday(), 14, 0),
            chicago_utc(monday(), 14, 30),
        )];
        let clock = ZonedClock::new(chicago_utc(monday(), 12, 30), Chicago);
        let slots = generate_slots(&profile, &busy, &clock, &monday_query());

        let starts: Vec<_> = slots.iter().map(|s| s.start).collect();
        // 13:30-14:00 buffered to 13:15-14:15 collides; so does 14:30 buffered
        assert!(!starts.contains(&chicago_utc(monday(), 13, 30)));
        assert!(!starts.contains(&chicago_utc(monday(), 14, 30)));
        assert!(starts.contains(&chicago_utc(monday(), 13, 0)));
        assert!(starts.contains(&chicago_utc(monday(), 15, 0)));
    }

    #[test]
    fn test_duration_must_fit_window() {
        let profile = monday_profile();
        let mut query = monday_query();
        query.duration_minutes = Some(120);

        let clock = ZonedClock::new(chicago_utc(monday(), 14, 30), Chicago);
        let slots = generate_slots(&profile, &[], &clock, &query);

        // last start that fits a 2h meeting before 17:00 is 15:00
        assert!(slots.iter().all(|s| s.start <= chicago_utc(monday(), 15, 0)));
        assert!(slots.iter().any(|s| s.start == chicago_utc(monday(), 15, 0)));
    }

    #[test]
    fn test_start_clamped_to_today() {
        let profile = monday_profile();
        let mut query = monday_query();
        // Ask for last week; the clamp pulls the range forward to today.
        query.start_date = Some(monday() - Duration::days(7));
        query.end_date = Some(monday());

        let slots = generate_slots(&profile, &[], &sunday_evening_clock(), &query);
        assert!(!slots.is_empty());
        for slot in &slots {
            assert!(slot.start >= sunday_evening_clock().now);
        }
    }

    #[test]
    fn test_no_windows_no_slots() {
        let mut profile = monday_profile();
        profile.schedule = WeeklySchedule { windows: vec![] };
        let slots = generate_slots(&profile, &[], &sunday_evening_clock(), &monday_query());
        assert!(slots.is_empty());
    }

    #[test]
    fn test_max_days_ahead_caps_range() {
        let mut profile = monday_profile();
        profile.max_days_ahead = 2;

        let mut query = SlotQuery::default();
        // Ask far beyond the horizon; only days within +2 are considered.
        query.start_date = Some(monday() + Duration::days(30));
        query.end_date = Some(monday() + Duration::days(37));

        let slots = generate_slots(&profile, &[], &sunday_evening_clock(), &query);
        assert!(slots.is_empty());
    }

    #[test]
    fn test_fallback_profile_produces_business_hours() {
        let profile = AvailabilityProfile::generic_fallback("acct", "America/Chicago");
        let slots = generate_slots(&profile, &[], &sunday_evening_clock(), &monday_query());
        assert_eq!(slots.len(), 5);
        assert_eq!(slots[0].start, chicago_utc(monday(), 9, 0));
    }
}
