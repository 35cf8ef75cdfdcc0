use rusqlite::Connection;
use serde_json::Value;

use crate::db::queries;

/// Phone-derived identity used to scope voice-driven requests. Absence means
/// "operate at account scope" and is never an error.
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub phone: String,
    pub contact_id: Option<String>,
    pub contact_name: Option<String>,
}

/// Envelope keys the orchestration layer has been seen to use for the
/// caller's number, in lookup order.
const PHONE_KEYS: &[&str] = &[
    "caller_phone",
    "customer_phone",
    "phone",
    "phone_number",
    "from",
    "from_number",
];

const CALL_OBJECT_KEYS: &[&str] = &["call", "call_metadata", "telephony"];

/// Pull the first phone-like value out of a heterogeneous request envelope:
/// top-level fields first, then inside a nested call-metadata object.
pub fn extract_phone(params: &Value) -> Option<String> {
    for key in PHONE_KEYS {
        if let Some(raw) = params.get(key).and_then(Value::as_str) {
            if let Some(normalized) = normalize_phone(raw) {
                return Some(normalized);
            }
        }
    }

    for object_key in CALL_OBJECT_KEYS {
        if let Some(call) = params.get(object_key) {
            for key in ["from", "from_number", "caller_id", "caller_phone"] {
                if let Some(raw) = call.get(key).and_then(Value::as_str) {
                    if let Some(normalized) = normalize_phone(raw) {
                        return Some(normalized);
                    }
                }
            }
        }
    }

    None
}

/// Normalize to international form, assuming North-American numbering when
/// no country code is present.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        10 => Some(format!("+1{digits}")),
        11 if digits.starts_with('1') => Some(format!("+{digits}")),
        12..=15 => Some(format!("+{digits}")),
        _ => None,
    }
}

/// The normalized number plus its country-code-stripped/added alternates,
/// for matching loosely-stored contact numbers.
pub fn phone_alternates(normalized: &str) -> Vec<String> {
    let mut alternates = vec![normalized.to_string()];
    if let Some(national) = normalized.strip_prefix("+1") {
        alternates.push(national.to_string());
        alternates.push(format!("1{national}"));
    } else if let Some(digits) = normalized.strip_prefix('+') {
        alternates.push(digits.to_string());
    }
    alternates
}

/// Resolve the caller from the request envelope. Extraction failure and
/// lookup misses both degrade, never fail: no phone means no context, a
/// phone with no contact still scopes by number.
pub fn resolve_caller(
    conn: &Connection,
    account_id: &str,
    params: &Value,
) -> Option<CallerContext> {
    let phone = extract_phone(params)?;
    let alternates = phone_alternates(&phone);

    match queries::find_contact_by_phones(conn, account_id, &alternates) {
        Ok(Some(contact)) => Some(CallerContext {
            phone,
            contact_id: Some(contact.id),
            contact_name: contact.name,
        }),
        Ok(None) => Some(CallerContext {
            phone,
            contact_id: None,
            contact_name: None,
        }),
        Err(e) => {
            tracing::warn!(error = %e, "contact lookup failed, continuing without link");
            Some(CallerContext {
                phone,
                contact_id: None,
                contact_name: None,
            })
        }
    }
}
