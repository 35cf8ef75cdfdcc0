use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::integration::ProviderKind;

/// Canonical appointment record. The local row is the source of truth;
/// external provider events are best-effort mirrors of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub account_id: String,
    pub contact_id: Option<String>,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Display label only; all stored instants are UTC.
    pub timezone: String,
    pub status: AppointmentStatus,
    pub primary_event_id: Option<String>,
    pub secondary_event_id: Option<String>,
    pub metadata: AppointmentMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn event_id_for(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::Primary => self.primary_event_id.as_deref(),
            ProviderKind::Secondary => self.secondary_event_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => AppointmentStatus::Confirmed,
            "cancelled" => AppointmentStatus::Cancelled,
            _ => AppointmentStatus::Scheduled,
        }
    }
}

/// Attendee details and per-provider sync outcomes, stored as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendee_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendee_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendee_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// provider name -> whether the last mirror attempt succeeded
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sync: BTreeMap<String, bool>,
}

impl AppointmentMetadata {
    pub fn from_json(s: &str) -> Self {
        serde_json::from_str(s).unwrap_or_default()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
