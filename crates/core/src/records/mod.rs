//! Persistent call, contact, appointment and metrics records.
//!
//! The orchestrator only ever reads contacts on the request path; every
//! write goes through a deferred task.

mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Error;
use crate::identity::IdentityKey;

pub use sqlite::SqliteRecords;

/// A caller as the record store knows them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub phone_number: String,
    pub name: Option<String>,
    pub ghl_contact_id: Option<String>,
    pub last_call_at: Option<String>,
    pub total_calls: i64,
}

/// Contact write. `None` fields leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactUpsert {
    pub phone_number: String,
    pub name: Option<String>,
    pub ghl_contact_id: Option<String>,
    pub last_call_at: Option<DateTime<Utc>>,
    /// Count this write as one more call.
    pub count_call: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLog {
    pub call_id: String,
    pub phone_number: String,
    pub call_started_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallEnded {
    pub call_id: String,
    pub call_ended_at: DateTime<Utc>,
    pub duration_seconds: Option<i64>,
    pub outcome: Option<String>,
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRecord {
    pub ghl_appointment_id: Option<String>,
    pub phone_number: Option<String>,
    pub call_id: Option<String>,
    #[serde(default)]
    pub calendar_id: Option<String>,
    pub scheduled_at: String,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

/// Change to an existing appointment, matched by CRM id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentUpdate {
    pub ghl_appointment_id: String,
    pub status: AppointmentStatus,
    pub scheduled_at: Option<String>,
    pub notes: Option<String>,
}

/// Increments applied to one day's metrics row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsDelta {
    pub total_calls: i64,
    pub appointments_booked: i64,
    pub transfers: i64,
}

impl MetricsDelta {
    pub fn call() -> Self {
        Self { total_calls: 1, ..Default::default() }
    }

    pub fn booking() -> Self {
        Self { appointments_booked: 1, ..Default::default() }
    }

    pub fn transfer() -> Self {
        Self { transfers: 1, ..Default::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub date: NaiveDate,
    pub total_calls: i64,
    pub appointments_booked: i64,
    pub transfers: i64,
    /// Bookings per call, as a percentage rounded to two places.
    pub conversion_rate: f64,
}

/// Persistent store contract.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_contact(&self, identity: &IdentityKey) -> Result<Option<ContactRecord>, Error>;

    async fn upsert_contact(&self, contact: &ContactUpsert) -> Result<(), Error>;

    /// The local contact linked to a CRM contact id, if any.
    async fn contact_by_crm_id(&self, ghl_contact_id: &str) -> Result<Option<ContactRecord>, Error>;

    /// Record a call start. Logging the same `call_id` twice is a no-op.
    async fn log_call(&self, call: &CallLog) -> Result<(), Error>;

    async fn update_call_ended(&self, ended: &CallEnded) -> Result<(), Error>;

    async fn recent_calls(&self, identity: &IdentityKey, limit: u32) -> Result<Vec<CallLog>, Error>;

    async fn create_appointment(&self, appointment: &AppointmentRecord) -> Result<(), Error>;

    async fn find_appointment(&self, ghl_appointment_id: &str) -> Result<Option<AppointmentRecord>, Error>;

    async fn update_appointment_status(&self, update: &AppointmentUpdate) -> Result<(), Error>;

    /// Add `delta` to the metrics row for `date`, creating it if needed.
    async fn update_daily_metrics(&self, date: NaiveDate, delta: &MetricsDelta) -> Result<(), Error>;

    async fn daily_metrics(&self, date: NaiveDate) -> Result<Option<DailyMetrics>, Error>;
}
