use serde_json::Value;

use crate::db::queries;
use crate::state::AppState;

/// Key substrings whose values never reach the audit table.
const SECRET_KEYS: &[&str] = &["token", "authorization", "secret", "password", "api_key"];

const PHONE_KEYS: &[&str] = &[
    "phone",
    "phone_number",
    "caller_phone",
    "customer_phone",
    "from",
    "from_number",
    "caller_id",
    "attendee_phone",
];

const EMAIL_KEYS: &[&str] = &["email", "attendee_email", "customer_email"];

/// Recursively redact credentials and mask personal identifiers before a
/// payload is written to the audit trail.
pub fn scrub(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut scrubbed = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                let lower = key.to_lowercase();
                let replacement = if SECRET_KEYS.iter().any(|s| lower.contains(s)) {
                    Value::String("[redacted]".to_string())
                } else if PHONE_KEYS.contains(&lower.as_str()) {
                    mask_str(val, mask_phone)
                } else if EMAIL_KEYS.contains(&lower.as_str()) {
                    mask_str(val, mask_email)
                } else {
                    scrub(val)
                };
                scrubbed.insert(key.clone(), replacement);
            }
            Value::Object(scrubbed)
        }
        Value::Array(items) => Value::Array(items.iter().map(scrub).collect()),
        other => other.clone(),
    }
}

fn mask_str(value: &Value, f: fn(&str) -> String) -> Value {
    match value.as_str() {
        Some(s) => Value::String(f(s)),
        None => scrub(value),
    }
}

/// Keep the last four digits, enough to correlate without identifying.
fn mask_phone(raw: &str) -> String {
    let digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return "***".to_string();
    }
    let tail: String = digits[digits.len() - 4..].iter().collect();
    format!("***{tail}")
}

/// Keep the domain, drop the local part.
fn mask_email(raw: &str) -> String {
    match raw.split_once('@') {
        Some((_, domain)) => format!("***@{domain}"),
        None => "***".to_string(),
    }
}

/// Append one audit row. Auditing is observability, not a precondition;
/// a write failure is logged and swallowed.
pub fn record(
    state: &AppState,
    account_id: &str,
    action: &str,
    params: &Value,
    result: &Value,
    success: bool,
    duration_ms: i64,
) {
    let params_json = scrub(params).to_string();
    let result_json = scrub(result).to_string();

    let db = state.db.lock().unwrap();
    if let Err(e) = queries::insert_audit(
        &db,
        account_id,
        action,
        &params_json,
        &result_json,
        success,
        duration_ms,
    ) {
        tracing::error!(error = %e, action = action, "audit write failed");
    }
}
