//! Zep API response types.

use serde::Deserialize;
use serde_json::Value;

/// User record from `GET /api/v2/users/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZepUser {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

impl ZepUser {
    /// Long-term facts, stored under `metadata.facts`.
    pub fn facts(&self) -> Vec<Value> {
        self.metadata
            .get("facts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }
}
