//! In-process fakes for the store and every upstream capability.
//!
//! Each fake counts its calls, can be slowed down with a fixed delay (use a
//! paused tokio clock to make that deterministic) and can be switched to
//! fail every call.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Value, json};

use crate::Error;
use crate::identity::IdentityKey;
use crate::records::{
    AppointmentRecord, AppointmentUpdate, CallEnded, CallLog, ContactRecord, ContactUpsert, DailyMetrics,
    MetricsDelta, RecordStore,
};
use crate::source::{
    AvailabilitySource, BookingRequest, CallTrace, ContactUpdate, CrmAppointment, CrmSource, MemorySnapshot,
    MemorySource, Prompt, PromptSource, SlotQuery, SlotsResponse, TraceSink,
};
use crate::store::CacheStore;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Call counter, optional delay and failure switch shared by the fakes.
#[derive(Debug, Default)]
struct Behavior {
    calls: AtomicUsize,
    delay: Option<Duration>,
    failing: AtomicBool,
}

impl Behavior {
    async fn enter(&self, service: &str) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::UpstreamHttp { service: service.to_string(), status: 500 });
        }
        Ok(())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// A cache backend that is always down.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStore;

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, Error> {
        Err(Error::Cache("store unavailable".into()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), Error> {
        Err(Error::Cache("store unavailable".into()))
    }

    async fn delete(&self, _key: &str) -> Result<(), Error> {
        Err(Error::Cache("store unavailable".into()))
    }

    async fn scan_delete(&self, _prefix: &str) -> Result<u64, Error> {
        Err(Error::Cache("store unavailable".into()))
    }

    async fn purge_expired(&self) -> Result<u64, Error> {
        Err(Error::Cache("store unavailable".into()))
    }
}

#[derive(Debug, Default)]
pub struct FakeMemory {
    facts: Vec<Value>,
    behavior: Behavior,
    transcripts: Mutex<Vec<(String, String, String)>>,
}

impl FakeMemory {
    pub fn with_facts(facts: &[&str]) -> Self {
        Self { facts: facts.iter().map(|f| json!(f)).collect(), ..Default::default() }
    }

    pub fn failing() -> Self {
        let fake = Self::default();
        fake.behavior.failing.store(true, Ordering::SeqCst);
        fake
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.behavior.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.behavior.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.behavior.calls()
    }

    /// `(identity, session, transcript)` for every stored transcript.
    pub fn transcripts(&self) -> Vec<(String, String, String)> {
        lock(&self.transcripts).clone()
    }
}

#[async_trait]
impl MemorySource for FakeMemory {
    async fn get_memory(&self, identity: &IdentityKey, _session: Option<&str>) -> Result<MemorySnapshot, Error> {
        self.behavior.enter("zep").await?;
        Ok(MemorySnapshot { facts: self.facts.clone(), ..MemorySnapshot::empty(identity.as_str()) })
    }

    async fn store_transcript(&self, identity: &IdentityKey, session: &str, transcript: &str) -> Result<(), Error> {
        lock(&self.transcripts).push((identity.to_string(), session.to_string(), transcript.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeSlots {
    slots: Vec<String>,
    behavior: Behavior,
    queries: Mutex<Vec<SlotQuery>>,
}

impl FakeSlots {
    pub fn with_slots(slots: &[&str]) -> Self {
        Self { slots: slots.iter().map(|s| s.to_string()).collect(), ..Default::default() }
    }

    pub fn failing() -> Self {
        let fake = Self::default();
        fake.behavior.failing.store(true, Ordering::SeqCst);
        fake
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.behavior.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.behavior.calls()
    }

    pub fn queries(&self) -> Vec<SlotQuery> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl AvailabilitySource for FakeSlots {
    async fn get_slots(&self, query: &SlotQuery) -> Result<SlotsResponse, Error> {
        lock(&self.queries).push(query.clone());
        self.behavior.enter("ghl").await?;
        Ok(SlotsResponse { slots: self.slots.clone() })
    }
}

/// CRM fake. Upserts hand out `contact-{phone}` ids; cancelled events drop
/// out of `contact_appointments`.
#[derive(Debug, Default)]
pub struct FakeCrm {
    appointments: Vec<CrmAppointment>,
    behavior: Behavior,
    upserts: Mutex<Vec<(String, ContactUpdate)>>,
    bookings: Mutex<Vec<BookingRequest>>,
    cancelled: Mutex<Vec<String>>,
}

impl FakeCrm {
    pub fn with_appointments(appointments: Vec<CrmAppointment>) -> Self {
        Self { appointments, ..Default::default() }
    }

    pub fn failing() -> Self {
        let fake = Self::default();
        fake.behavior.failing.store(true, Ordering::SeqCst);
        fake
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.behavior.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.behavior.calls()
    }

    pub fn upserts(&self) -> Vec<(String, ContactUpdate)> {
        lock(&self.upserts).clone()
    }

    pub fn bookings(&self) -> Vec<BookingRequest> {
        lock(&self.bookings).clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        lock(&self.cancelled).clone()
    }
}

#[async_trait]
impl CrmSource for FakeCrm {
    async fn upsert_contact(&self, phone: &str, update: &ContactUpdate) -> Result<String, Error> {
        self.behavior.enter("ghl").await?;
        lock(&self.upserts).push((phone.to_string(), update.clone()));
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        Ok(format!("contact-{digits}"))
    }

    async fn contact_appointments(&self, _contact_id: &str) -> Result<Vec<CrmAppointment>, Error> {
        self.behavior.enter("ghl").await?;
        let cancelled = lock(&self.cancelled);
        Ok(self.appointments.iter().filter(|a| !cancelled.contains(&a.id)).cloned().collect())
    }

    async fn book_appointment(&self, request: &BookingRequest) -> Result<CrmAppointment, Error> {
        self.behavior.enter("ghl").await?;
        let mut bookings = lock(&self.bookings);
        bookings.push(request.clone());
        Ok(CrmAppointment {
            id: format!("evt-{}", bookings.len()),
            title: Some(request.title.clone()),
            start_time: Some(request.slot_time.clone()),
            status: Some("confirmed".into()),
        })
    }

    async fn reschedule_appointment(&self, event_id: &str, new_start_time: &str) -> Result<CrmAppointment, Error> {
        self.behavior.enter("ghl").await?;
        Ok(CrmAppointment {
            id: event_id.to_string(),
            title: None,
            start_time: Some(new_start_time.to_string()),
            status: Some("confirmed".into()),
        })
    }

    async fn cancel_appointment(&self, event_id: &str) -> Result<(), Error> {
        self.behavior.enter("ghl").await?;
        lock(&self.cancelled).push(event_id.to_string());
        Ok(())
    }
}

/// Prompt source that counts lookups and answers with a fixed version.
#[derive(Debug, Default)]
pub struct FakePrompts {
    calls: AtomicUsize,
}

impl FakePrompts {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PromptSource for FakePrompts {
    async fn get_prompt(&self, name: &str, _fallback: &str) -> Prompt {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Prompt { name: name.to_string(), text: format!("prompt for {name}"), version: 3 }
    }
}

/// Trace sink that keeps every trace it is handed.
#[derive(Debug, Default)]
pub struct FakeTraces {
    traces: Mutex<Vec<CallTrace>>,
}

impl FakeTraces {
    pub fn traces(&self) -> Vec<CallTrace> {
        lock(&self.traces).clone()
    }
}

#[async_trait]
impl TraceSink for FakeTraces {
    async fn record_call(&self, trace: &CallTrace) -> Result<(), Error> {
        lock(&self.traces).push(trace.clone());
        Ok(())
    }
}

/// Record store kept in memory, for tests that need delays or failures.
#[derive(Debug, Default)]
pub struct FakeRecords {
    behavior: Behavior,
    contacts: Mutex<HashMap<String, ContactRecord>>,
    calls_logged: Mutex<Vec<CallLog>>,
    ended: Mutex<Vec<CallEnded>>,
    appointments: Mutex<Vec<AppointmentRecord>>,
    updates: Mutex<Vec<AppointmentUpdate>>,
    metrics: Mutex<HashMap<NaiveDate, MetricsDelta>>,
}

impl FakeRecords {
    pub fn with_contact(contact: ContactRecord) -> Self {
        let fake = Self::default();
        lock(&fake.contacts).insert(contact.phone_number.clone(), contact);
        fake
    }

    pub fn failing() -> Self {
        let fake = Self::default();
        fake.behavior.failing.store(true, Ordering::SeqCst);
        fake
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.behavior.delay = Some(delay);
        self
    }

    pub fn with_appointment(self, appointment: AppointmentRecord) -> Self {
        lock(&self.appointments).push(appointment);
        self
    }

    /// Number of `get_contact` lookups.
    pub fn lookups(&self) -> usize {
        self.behavior.calls()
    }

    pub fn contact(&self, phone: &str) -> Option<ContactRecord> {
        lock(&self.contacts).get(phone).cloned()
    }

    pub fn logged_calls(&self) -> Vec<CallLog> {
        lock(&self.calls_logged).clone()
    }

    pub fn ended_calls(&self) -> Vec<CallEnded> {
        lock(&self.ended).clone()
    }

    pub fn appointments(&self) -> Vec<AppointmentRecord> {
        lock(&self.appointments).clone()
    }

    pub fn appointment_updates(&self) -> Vec<AppointmentUpdate> {
        lock(&self.updates).clone()
    }

    pub fn metrics(&self, date: NaiveDate) -> MetricsDelta {
        lock(&self.metrics).get(&date).copied().unwrap_or_default()
    }
}

#[async_trait]
impl RecordStore for FakeRecords {
    async fn get_contact(&self, identity: &IdentityKey) -> Result<Option<ContactRecord>, Error> {
        self.behavior.enter("records").await?;
        Ok(lock(&self.contacts).get(identity.as_str()).cloned())
    }

    async fn upsert_contact(&self, contact: &ContactUpsert) -> Result<(), Error> {
        let mut contacts = lock(&self.contacts);
        let entry = contacts.entry(contact.phone_number.clone()).or_insert_with(|| ContactRecord {
            phone_number: contact.phone_number.clone(),
            name: None,
            ghl_contact_id: None,
            last_call_at: None,
            total_calls: 0,
        });
        if contact.name.is_some() {
            entry.name = contact.name.clone();
        }
        if contact.ghl_contact_id.is_some() {
            entry.ghl_contact_id = contact.ghl_contact_id.clone();
        }
        if let Some(at) = contact.last_call_at {
            entry.last_call_at = Some(at.to_rfc3339());
        }
        entry.total_calls += i64::from(contact.count_call);
        Ok(())
    }

    async fn contact_by_crm_id(&self, ghl_contact_id: &str) -> Result<Option<ContactRecord>, Error> {
        Ok(lock(&self.contacts)
            .values()
            .find(|c| c.ghl_contact_id.as_deref() == Some(ghl_contact_id))
            .cloned())
    }

    async fn log_call(&self, call: &CallLog) -> Result<(), Error> {
        let mut calls = lock(&self.calls_logged);
        if !calls.iter().any(|c| c.call_id == call.call_id) {
            calls.push(call.clone());
        }
        Ok(())
    }

    async fn update_call_ended(&self, ended: &CallEnded) -> Result<(), Error> {
        lock(&self.ended).push(ended.clone());
        Ok(())
    }

    async fn recent_calls(&self, identity: &IdentityKey, limit: u32) -> Result<Vec<CallLog>, Error> {
        let calls = lock(&self.calls_logged);
        Ok(calls
            .iter()
            .rev()
            .filter(|c| c.phone_number == identity.as_str())
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn create_appointment(&self, appointment: &AppointmentRecord) -> Result<(), Error> {
        lock(&self.appointments).push(appointment.clone());
        Ok(())
    }

    async fn find_appointment(&self, ghl_appointment_id: &str) -> Result<Option<AppointmentRecord>, Error> {
        Ok(lock(&self.appointments)
            .iter()
            .rev()
            .find(|a| a.ghl_appointment_id.as_deref() == Some(ghl_appointment_id))
            .cloned())
    }

    async fn update_appointment_status(&self, update: &AppointmentUpdate) -> Result<(), Error> {
        lock(&self.updates).push(update.clone());
        Ok(())
    }

    async fn update_daily_metrics(&self, date: NaiveDate, delta: &MetricsDelta) -> Result<(), Error> {
        let mut metrics = lock(&self.metrics);
        let row = metrics.entry(date).or_default();
        row.total_calls += delta.total_calls;
        row.appointments_booked += delta.appointments_booked;
        row.transfers += delta.transfers;
        Ok(())
    }

    async fn daily_metrics(&self, date: NaiveDate) -> Result<Option<DailyMetrics>, Error> {
        Ok(lock(&self.metrics).get(&date).map(|row| DailyMetrics {
            date,
            total_calls: row.total_calls,
            appointments_booked: row.appointments_booked,
            transfers: row.transfers,
            conversion_rate: if row.total_calls > 0 {
                (row.appointments_booked as f64 * 10_000.0 / row.total_calls as f64).round() / 100.0
            } else {
                0.0
            },
        }))
    }
}
