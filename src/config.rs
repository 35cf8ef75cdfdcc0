use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub default_account_id: String,
    pub default_timezone: String,
    pub primary_cal_base_url: String,
    pub primary_cal_token_url: String,
    pub primary_cal_client_id: String,
    pub primary_cal_client_secret: String,
    pub crm_cal_base_url: String,
    pub crm_cal_token_url: String,
    pub crm_cal_client_id: String,
    pub crm_cal_client_secret: String,
    pub token_refresh_lead_minutes: i64,
    /// Booking retries inside this window that look like the same request
    /// are absorbed as duplicates instead of creating a second appointment.
    pub duplicate_window_seconds: i64,
    pub match_window_hours: i64,
    pub time_inference_tolerance_minutes: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "bookline.db".to_string()),
            default_account_id: env::var("DEFAULT_ACCOUNT_ID")
                .unwrap_or_else(|_| "default".to_string()),
            default_timezone: env::var("DEFAULT_TIMEZONE")
                .unwrap_or_else(|_| "America/Chicago".to_string()),
            primary_cal_base_url: env::var("PRIMARY_CAL_BASE_URL")
                .unwrap_or_else(|_| "https://calendar.nexcal.io/v3".to_string()),
            primary_cal_token_url: env::var("PRIMARY_CAL_TOKEN_URL")
                .unwrap_or_else(|_| "https://auth.nexcal.io/oauth2/token".to_string()),
            primary_cal_client_id: env::var("PRIMARY_CAL_CLIENT_ID").unwrap_or_default(),
            primary_cal_client_secret: env::var("PRIMARY_CAL_CLIENT_SECRET").unwrap_or_default(),
            crm_cal_base_url: env::var("CRM_CAL_BASE_URL")
                .unwrap_or_else(|_| "https://api.crmcal.com/v1".to_string()),
            crm_cal_token_url: env::var("CRM_CAL_TOKEN_URL")
                .unwrap_or_else(|_| "https://api.crmcal.com/oauth/token".to_string()),
            crm_cal_client_id: env::var("CRM_CAL_CLIENT_ID").unwrap_or_default(),
            crm_cal_client_secret: env::var("CRM_CAL_CLIENT_SECRET").unwrap_or_default(),
            token_refresh_lead_minutes: env_i64("TOKEN_REFRESH_LEAD_MINUTES", 10),
            duplicate_window_seconds: env_i64("DUPLICATE_WINDOW_SECONDS", 120),
            match_window_hours: env_i64("MATCH_WINDOW_HOURS", 2),
            time_inference_tolerance_minutes: env_i64("TIME_INFERENCE_TOLERANCE_MINUTES", 5),
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
