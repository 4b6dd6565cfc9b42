//! GoHighLevel response shapes.
//!
//! The API is inconsistent about where it nests ids, so most of these read
//! loosely from `serde_json::Value`.

use serde::Deserialize;
use serde_json::Value;

use callctx_core::source::CrmAppointment;

/// Pull a string id from `value[outer].id` or `value.id`.
pub(crate) fn nested_id(value: &Value, outer: &str) -> Option<String> {
    value
        .get(outer)
        .and_then(|v| v.get("id"))
        .or_else(|| value.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Free slots come back either flat (`{"slots": [...]}`) or keyed by date
/// (`{"2024-01-15": {"slots": [...]}, ...}`). Date keys are visited in order.
pub(crate) fn free_slots(value: &Value) -> Vec<String> {
    fn strings(slots: &Value) -> impl Iterator<Item = String> + '_ {
        slots
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
    }

    if let Some(slots) = value.get("slots") {
        return strings(slots).collect();
    }

    let Some(days) = value.as_object() else {
        return Vec::new();
    };
    let mut keys: Vec<&String> = days.keys().collect();
    keys.sort();
    keys.into_iter()
        .filter_map(|day| days.get(day).and_then(|d| d.get("slots")))
        .flat_map(strings)
        .collect()
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventsResponse {
    #[serde(default)]
    pub events: Vec<GhlEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GhlEvent {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub appointment_status: Option<String>,
}

impl From<GhlEvent> for CrmAppointment {
    fn from(event: GhlEvent) -> Self {
        CrmAppointment {
            id: event.id,
            title: event.title,
            start_time: event.start_time,
            status: event.appointment_status,
        }
    }
}
