//! Capabilities of the external collaborators the core orchestrates.
//!
//! Concrete HTTP implementations live in `callctx-client`; tests use
//! in-process fakes. Every method returns a typed `Result` and the caller
//! decides the fallback, except [`PromptSource`], which always yields a
//! usable prompt.

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Error;
use crate::identity::IdentityKey;

/// What the memory service knows about a caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub user_id: String,
    #[serde(default)]
    pub facts: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_memory: Option<Value>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub user_metadata: Value,
}

impl MemorySnapshot {
    /// Memory for a caller the service has never seen.
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), ..Default::default() }
    }
}

/// A calendar availability window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotQuery {
    pub calendar_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub timezone: String,
}

impl SlotQuery {
    /// Window of `days` days starting at `today`.
    pub fn upcoming(calendar_id: impl Into<String>, timezone: impl Into<String>, today: NaiveDate, days: u32) -> Self {
        let end_date = today.checked_add_days(Days::new(u64::from(days))).unwrap_or(today);
        Self { calendar_id: calendar_id.into(), start_date: today, end_date, timezone: timezone.into() }
    }
}

/// Free slots, as ISO-8601 start times.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotsResponse {
    #[serde(default)]
    pub slots: Vec<String>,
}

/// An appointment as the CRM reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmAppointment {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Fields pushed to the CRM when a caller is seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactUpdate {
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
}

/// Booking request forwarded to the CRM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub calendar_id: String,
    pub contact_id: String,
    pub slot_time: String,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub assigned_user_id: Option<String>,
}

/// A versioned prompt text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    pub text: String,
    pub version: u32,
}

impl Prompt {
    pub fn fallback(name: &str, text: &str) -> Self {
        Self { name: name.to_string(), text: text.to_string(), version: 0 }
    }
}

/// The prompt an agent was handed, recorded against a call trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptGeneration {
    pub prompt_name: String,
    pub prompt_version: u32,
    pub prompt: String,
}

/// One inbound call as the tracing service sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallTrace {
    /// The call id when the webhook sent one, otherwise derived from the
    /// caller and the start time.
    pub id: String,
    pub name: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
    pub generation: Option<PromptGeneration>,
}

/// Long-term caller memory.
#[async_trait]
pub trait MemorySource: Send + Sync {
    async fn get_memory(&self, identity: &IdentityKey, session: Option<&str>) -> Result<MemorySnapshot, Error>;

    /// Attach a finished call's transcript to the caller's memory.
    async fn store_transcript(&self, identity: &IdentityKey, session: &str, transcript: &str) -> Result<(), Error>;
}

/// Calendar availability.
#[async_trait]
pub trait AvailabilitySource: Send + Sync {
    async fn get_slots(&self, query: &SlotQuery) -> Result<SlotsResponse, Error>;
}

/// Contact and appointment management in the CRM.
#[async_trait]
pub trait CrmSource: Send + Sync {
    /// Create or update the contact for `phone`, returning its CRM id.
    async fn upsert_contact(&self, phone: &str, update: &ContactUpdate) -> Result<String, Error>;

    async fn contact_appointments(&self, contact_id: &str) -> Result<Vec<CrmAppointment>, Error>;

    async fn book_appointment(&self, request: &BookingRequest) -> Result<CrmAppointment, Error>;

    async fn reschedule_appointment(&self, event_id: &str, new_start_time: &str) -> Result<CrmAppointment, Error>;

    async fn cancel_appointment(&self, event_id: &str) -> Result<(), Error>;
}

/// Prompt management. Implementations never fail; they fall back.
#[async_trait]
pub trait PromptSource: Send + Sync {
    async fn get_prompt(&self, name: &str, fallback: &str) -> Prompt;
}

/// Call tracing. Traces are written from background tasks only.
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn record_call(&self, trace: &CallTrace) -> Result<(), Error>;
}

/// Trace sink used when no tracing service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTraces;

#[async_trait]
impl TraceSink for NoopTraces {
    async fn record_call(&self, trace: &CallTrace) -> Result<(), Error> {
        tracing::debug!(
            trace_id = %trace.id,
            prompt = trace.generation.as_ref().map(|g| g.prompt_name.as_str()),
            "tracing disabled, call trace dropped"
        );
        Ok(())
    }
}

/// Prompt source used when no prompt service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticPrompts;

#[async_trait]
impl PromptSource for StaticPrompts {
    async fn get_prompt(&self, name: &str, fallback: &str) -> Prompt {
        Prompt::fallback(name, fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upcoming_window() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let query = SlotQuery::upcoming("cal-1", "America/New_York", today, 7);
        assert_eq!(query.start_date, today);
        assert_eq!(query.end_date, NaiveDate::from_ymd_opt(2024, 1, 22).unwrap());
    }

    #[test]
    fn test_memory_snapshot_tolerates_missing_fields() {
        let snapshot: MemorySnapshot = serde_json::from_str(r#"{"user_id":"1555"}"#).unwrap();
        assert!(snapshot.facts.is_empty());
        assert!(snapshot.session_memory.is_none());
    }

    #[tokio::test]
    async fn test_static_prompts_return_fallback() {
        let prompt = StaticPrompts.get_prompt("greeting-new-customer", "Hi!").await;
        assert_eq!(prompt, Prompt::fallback("greeting-new-customer", "Hi!"));
    }
}
