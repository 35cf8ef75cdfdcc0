use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub account_id: String,
    pub name: Option<String>,
    /// Normalized international form, e.g. "+15551234567".
    pub phone: String,
    pub email: Option<String>,
}
