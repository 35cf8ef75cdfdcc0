use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// One recurring wall-clock window, e.g. `{"day":"mon","start":"09:00","end":"17:00"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub day: String,
    pub start: String,
    pub end: String,
}

/// Recurring weekly schedule. Windows within a day are assumed
/// non-overlapping with start < end; the engine does not validate that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklySchedule {
    pub windows: Vec<ScheduleWindow>,
}

impl WeeklySchedule {
    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let schedule: WeeklySchedule = serde_json::from_str(s)?;
        for window in &schedule.windows {
            parse_weekday(&window.day)
                .ok_or_else(|| anyhow::anyhow!("invalid weekday: {}", window.day))?;
            parse_time(&window.start)?;
            parse_time(&window.end)?;
        }
        Ok(schedule)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"windows":[]}"#.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Configured windows for a weekday as parsed times, in stored order.
    pub fn windows_for(&self, day: Weekday) -> Vec<(NaiveTime, NaiveTime)> {
        self.windows
            .iter()
            .filter(|w| parse_weekday(&w.day) == Some(day))
            .filter_map(|w| Some((parse_time(&w.start).ok()?, parse_time(&w.end).ok()?)))
            .collect()
    }

    /// Whether `[start, end]` lies wholly inside one window on `day`.
    pub fn contains(&self, day: Weekday, start: NaiveTime, end: NaiveTime) -> bool {
        self.windows_for(day)
            .iter()
            .any(|(ws, we)| start >= *ws && end <= *we)
    }

    pub fn to_human_readable(&self) -> String {
        if self.windows.is_empty() {
            return String::new();
        }

        let day_order = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
        let mut sorted = self.windows.clone();
        sorted.sort_by_key(|w| {
            day_order
                .iter()
                .position(|d| *d == w.day.to_lowercase())
                .unwrap_or(7)
        });

        sorted
            .iter()
            .map(|w| format!("{}: {}-{}", capitalize(&w.day), w.start, w.end))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPreference {
    Primary,
    Secondary,
    Both,
}

impl ProviderPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderPreference::Primary => "primary",
            ProviderPreference::Secondary => "secondary",
            ProviderPreference::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "primary" => ProviderPreference::Primary,
            "secondary" => ProviderPreference::Secondary,
            _ => ProviderPreference::Both,
        }
    }

    pub fn allows_primary(&self) -> bool {
        matches!(self, ProviderPreference::Primary | ProviderPreference::Both)
    }

    pub fn allows_secondary(&self) -> bool {
        matches!(self, ProviderPreference::Secondary | ProviderPreference::Both)
    }
}

/// Per-account recurring availability plus slot/buffer/notice settings.
/// Created by account configuration; read-only from the engine's perspective.
#[derive(Debug, Clone)]
pub struct AvailabilityProfile {
    pub account_id: String,
    pub timezone: String,
    pub schedule: WeeklySchedule,
    pub slot_interval_minutes: i64,
    pub default_duration_minutes: i64,
    pub buffer_before_minutes: i64,
    pub buffer_after_minutes: i64,
    pub min_notice_hours: i64,
    pub max_days_ahead: i64,
    pub provider_preference: ProviderPreference,
}

impl AvailabilityProfile {
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    /// Generic business-hours default used when an account has no profile:
    /// Mon-Fri 09:00-17:00 on a 30-minute grid, no buffers, no notice.
    pub fn generic_fallback(account_id: &str, timezone: &str) -> Self {
        let windows = ["mon", "tue", "wed", "thu", "fri"]
            .iter()
            .map(|day| ScheduleWindow {
                day: (*day).to_string(),
                start: "09:00".to_string(),
                end: "17:00".to_string(),
            })
            .collect();

        Self {
            account_id: account_id.to_string(),
            timezone: timezone.to_string(),
            schedule: WeeklySchedule { windows },
            slot_interval_minutes: 30,
            default_duration_minutes: 30,
            buffer_before_minutes: 0,
            buffer_after_minutes: 0,
            min_notice_hours: 0,
            max_days_ahead: 30,
            provider_preference: ProviderPreference::Both,
        }
    }
}

pub fn parse_weekday(s: &str) -> Option<Weekday> {
    match s.to_lowercase().as_str() {
        "mon" | "monday" => Some(Weekday::Mon),
        "tue" | "tuesday" => Some(Weekday::Tue),
        "wed" | "wednesday" => Some(Weekday::Wed),
        "thu" | "thursday" => Some(Weekday::Thu),
        "fri" | "friday" => Some(Weekday::Fri),
        "sat" | "saturday" => Some(Weekday::Sat),
        "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| anyhow::anyhow!("invalid time format: {s}"))
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        None => String::new(),
        Some(f) => f.to_uppercase().to_string() + &c.as_str().to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    #[test]
    fn test_parse_valid_schedule() {
        let json = r#"{"windows":[{"day":"mon","start":"09:00","end":"17:00"},{"day":"tue","start":"09:00","end":"12:00"}]}"#;
        let schedule = WeeklySchedule::from_json(json).unwrap();
        assert_eq!(schedule.windows.len(), 2);
        assert_eq!(schedule.windows_for(Weekday::Mon).len(), 1);
        assert_eq!(schedule.windows_for(Weekday::Wed).len(), 0);
    }

    #[test]
    fn test_parse_invalid_day() {
        let json = r#"{"windows":[{"day":"xyz","start":"09:00","end":"17:00"}]}"#;
        assert!(WeeklySchedule::from_json(json).is_err());
    }

    #[test]
    fn test_parse_invalid_time() {
        let json = r#"{"windows":[{"day":"mon","start":"25:00","end":"17:00"}]}"#;
        assert!(WeeklySchedule::from_json(json).is_err());
    }

    #[test]
    fn test_contains_within_window() {
        let json = r#"{"windows":[{"day":"mon","start":"09:00","end":"17:00"}]}"#;
        let schedule = WeeklySchedule::from_json(json).unwrap();
        assert!(schedule.contains(Weekday::Mon, t("10:00"), t("11:00")));
        assert!(schedule.contains(Weekday::Mon, t("09:00"), t("17:00")));
        assert!(!schedule.contains(Weekday::Mon, t("16:30"), t("17:30")));
        assert!(!schedule.contains(Weekday::Tue, t("10:00"), t("11:00")));
    }

    #[test]
    fn test_full_day_names_accepted() {
        let json = r#"{"windows":[{"day":"Monday","start":"09:00","end":"17:00"}]}"#;
        let schedule = WeeklySchedule::from_json(json).unwrap();
        assert_eq!(schedule.windows_for(Weekday::Mon).len(), 1);
    }

    #[test]
    fn test_to_human_readable_sorts_days() {
        let json = r#"{"windows":[{"day":"fri","start":"10:00","end":"16:00"},{"day":"mon","start":"09:00","end":"17:00"}]}"#;
        let schedule = WeeklySchedule::from_json(json).unwrap();
        assert_eq!(
            schedule.to_human_readable(),
            "Mon: 09:00-17:00, Fri: 10:00-16:00"
        );
    }

    #[test]
    fn test_generic_fallback_has_weekday_hours() {
        let profile = AvailabilityProfile::generic_fallback("acct", "America/Chicago");
        assert_eq!(profile.schedule.windows.len(), 5);
        assert!(profile.schedule.contains(Weekday::Wed, t("09:00"), t("09:30")));
        assert!(!profile.schedule.contains(Weekday::Sat, t("10:00"), t("10:30")));
        assert_eq!(profile.tz(), chrono_tz::America::Chicago);
    }

    #[test]
    fn test_preference_flags() {
        assert!(ProviderPreference::Both.allows_primary());
        assert!(ProviderPreference::Both.allows_secondary());
        assert!(ProviderPreference::Primary.allows_primary());
        assert!(!ProviderPreference::Primary.allows_secondary());
        assert_eq!(ProviderPreference::parse("unknown"), ProviderPreference::Both);
    }
}
