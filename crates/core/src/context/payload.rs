//! The flat field map handed back to the voice agent.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::source::{CrmAppointment, Prompt};

const HUMAN_FORMAT: &str = "%A, %B %d at %I:%M %p";

/// Assembled caller context.
///
/// A JSON object keyed by field name. Request-scoped fields (`call_id`,
/// `customer_phone`, `timestamp`) are merged in per request and never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextPayload(Map<String, Value>);

impl ContextPayload {
    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    /// Add the per-request fields. These overwrite anything cached under the
    /// same names.
    pub fn merge_request(&mut self, call_id: Option<&str>, customer_phone: &str, now: DateTime<Utc>) {
        self.insert("call_id", call_id.map_or(Value::Null, |id| json!(id)));
        self.insert("customer_phone", json!(customer_phone));
        self.insert("timestamp", json!(now.to_rfc3339()));
    }

    /// `customer_known`, `customer_facts` and `customer_summary`.
    ///
    /// `facts` of `None` means no memory service is configured.
    pub fn set_memory(&mut self, facts: Option<&[Value]>) {
        match facts {
            Some(facts) if !facts.is_empty() => {
                self.insert("customer_known", json!("yes"));
                self.insert("customer_facts", Value::Array(facts.to_vec()));
                self.insert("customer_summary", json!(summarize(facts.len())));
            }
            Some(_) => {
                self.insert("customer_known", json!("no"));
                self.insert("customer_summary", json!(NEW_CUSTOMER));
            }
            None => {
                self.insert("customer_known", json!("unknown"));
                self.insert("customer_summary", json!(NEW_CUSTOMER));
            }
        }
    }

    pub fn customer_known(&self) -> bool {
        self.get_str("customer_known") == Some("yes")
    }

    /// `available_slots`, `has_availability` and `slots_count` from raw
    /// ISO-8601 start times. Unparseable times are skipped.
    pub fn set_slots(&mut self, slots: &[String], max_slots: usize) {
        let formatted: Vec<Value> = slots.iter().filter_map(|s| format_slot(s)).take(max_slots).collect();
        self.insert("has_availability", json!(!formatted.is_empty()));
        self.insert("slots_count", json!(formatted.len()));
        self.insert("available_slots", Value::Array(formatted));
    }

    /// `existing_appointments` and friends, keeping only those after `now`.
    pub fn set_appointments(&mut self, appointments: &[CrmAppointment], now: DateTime<Utc>) {
        let upcoming: Vec<Value> = appointments.iter().filter_map(|a| format_appointment(a, now)).collect();
        self.insert("has_existing_appointments", json!(!upcoming.is_empty()));
        self.insert("appointment_count", json!(upcoming.len()));
        self.insert("existing_appointments", Value::Array(upcoming));
    }

    pub fn set_prompt(&mut self, prompt: &Prompt) {
        self.insert("system_prompt", json!(prompt.text));
        self.insert("prompt_version", json!(prompt.version));
    }
}

impl From<Map<String, Value>> for ContextPayload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

const NEW_CUSTOMER: &str = "New customer, no previous interactions";

fn summarize(count: usize) -> String {
    if count == 1 { "Customer has 1 known fact".to_string() } else { format!("Customer has {count} known facts") }
}

fn parse_time(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok()
}

/// Render one slot as `{datetime, formatted, date, time}` in the slot's own
/// offset.
pub fn format_slot(raw: &str) -> Option<Value> {
    let Some(at) = parse_time(raw) else {
        tracing::warn!(slot = raw, "skipping unparseable slot");
        return None;
    };
    Some(json!({
        "datetime": raw,
        "formatted": at.format(HUMAN_FORMAT).to_string(),
        "date": at.format("%Y-%m-%d").to_string(),
        "time": at.format("%I:%M %p").to_string(),
    }))
}

fn format_appointment(appointment: &CrmAppointment, now: DateTime<Utc>) -> Option<Value> {
    let raw = appointment.start_time.as_deref()?;
    let at = parse_time(raw)?;
    if at.with_timezone(&Utc) <= now {
        return None;
    }
    Some(json!({
        "id": appointment.id,
        "title": appointment.title.as_deref().unwrap_or("Appointment"),
        "datetime": raw,
        "formatted": at.format(HUMAN_FORMAT).to_string(),
        "status": appointment.status.as_deref().unwrap_or("unknown"),
    }))
}
