use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::models::ProviderKind;
use crate::services::providers::CalendarProvider;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub primary: Box<dyn CalendarProvider>,
    pub secondary: Box<dyn CalendarProvider>,
}

impl AppState {
    pub fn provider(&self, kind: ProviderKind) -> &dyn CalendarProvider {
        match kind {
            ProviderKind::Primary => self.primary.as_ref(),
            ProviderKind::Secondary => self.secondary.as_ref(),
        }
    }
}
