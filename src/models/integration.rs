use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Primary,
    Secondary,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Primary => "primary",
            ProviderKind::Secondary => "secondary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(ProviderKind::Primary),
            "secondary" => Some(ProviderKind::Secondary),
            _ => None,
        }
    }
}

/// OAuth2 connection to one external calendar, one row per account+provider.
/// Only the token fields are mutated here (by refresh); the initial connect
/// happens in an authorization flow outside this engine.
#[derive(Debug, Clone)]
pub struct CalendarIntegration {
    pub account_id: String,
    pub provider: ProviderKind,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub calendar_id: String,
    pub sync_enabled: bool,
}

impl CalendarIntegration {
    /// True when the access token expires inside the lead window and a
    /// proactive refresh should run before any outbound call.
    pub fn needs_refresh(&self, now: DateTime<Utc>, lead: Duration) -> bool {
        self.expires_at - now < lead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integration(expires_at: DateTime<Utc>) -> CalendarIntegration {
        CalendarIntegration {
            account_id: "acct".to_string(),
            provider: ProviderKind::Primary,
            access_token: "tok".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at,
            calendar_id: "cal".to_string(),
            sync_enabled: true,
        }
    }

    #[test]
    fn test_needs_refresh_inside_lead_window() {
        let now = Utc::now();
        let lead = Duration::minutes(10);
        assert!(integration(now + Duration::minutes(5)).needs_refresh(now, lead));
        assert!(integration(now - Duration::minutes(1)).needs_refresh(now, lead));
        assert!(!integration(now + Duration::minutes(30)).needs_refresh(now, lead));
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(ProviderKind::parse("primary"), Some(ProviderKind::Primary));
        assert_eq!(ProviderKind::parse("secondary"), Some(ProviderKind::Secondary));
        assert_eq!(ProviderKind::parse("tertiary"), None);
    }
}
