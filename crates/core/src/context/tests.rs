use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;

use super::*;
use crate::cache::{CachedMemory, CachedSlots, ContextCache};
use crate::clock::ManualClock;
use crate::records::{AppointmentRecord, AppointmentStatus, ContactRecord};
use crate::source::CrmAppointment;
use crate::store::{Cache, CacheStore, MemoryStore};
use crate::tasks::{Deferred, TaskKind};
use crate::testing::{FakeCrm, FakeMemory, FakePrompts, FakeRecords, FakeSlots, FakeTraces};

const PHONE: &str = "+1 (555) 123-4567";

struct Harness {
    memory: Arc<FakeMemory>,
    slots: Arc<FakeSlots>,
    records: Arc<FakeRecords>,
    crm: Option<Arc<FakeCrm>>,
    prompts: Arc<FakePrompts>,
    traces: Arc<FakeTraces>,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new(memory: FakeMemory, slots: FakeSlots, records: FakeRecords) -> Self {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 14, 12, 0, 0).unwrap()));
        Self {
            memory: Arc::new(memory),
            slots: Arc::new(slots),
            records: Arc::new(records),
            crm: None,
            prompts: Arc::new(FakePrompts::default()),
            traces: Arc::new(FakeTraces::default()),
            store: Arc::new(MemoryStore::new(clock.clone())),
            clock,
        }
    }

    fn cold() -> Self {
        Self::new(
            FakeMemory::with_facts(&["likes blue"]),
            FakeSlots::with_slots(&["2024-01-15T14:00:00Z"]),
            FakeRecords::default(),
        )
    }

    fn with_crm(mut self, crm: FakeCrm) -> Self {
        self.crm = Some(Arc::new(crm));
        self
    }

    fn cache(&self) -> Cache {
        Cache::new(self.store.clone())
    }

    fn assembler(&self) -> ContextAssembler {
        let settings = AssemblySettings { calendar_id: Some("cal-1".into()), ..Default::default() };
        let assembler = ContextAssembler::new(ContextCache::new(self.cache()), self.prompts.clone())
            .with_memory(CachedMemory::new(self.memory.clone(), self.cache()))
            .with_slots(CachedSlots::new(self.slots.clone(), self.cache()))
            .with_records(self.records.clone())
            .with_traces(self.traces.clone())
            .with_clock(self.clock.clone())
            .with_settings(settings);
        match &self.crm {
            Some(crm) => assembler.with_crm(crm.clone()),
            None => assembler,
        }
    }

    fn upstream_calls(&self) -> usize {
        self.memory.calls() + self.slots.calls() + self.records.lookups() + self.prompts.calls()
    }
}

fn identity() -> IdentityKey {
    IdentityKey::normalize(PHONE).unwrap()
}

fn request() -> CallRequest {
    CallRequest::new(PHONE).with_call_id("call-1")
}

fn linked_contact() -> ContactRecord {
    ContactRecord {
        phone_number: "15551234567".into(),
        name: Some("Dana".into()),
        ghl_contact_id: Some("contact-15551234567".into()),
        last_call_at: None,
        total_calls: 4,
    }
}

fn recorded_appointment(id: &str, calendar_id: &str) -> AppointmentRecord {
    AppointmentRecord {
        ghl_appointment_id: Some(id.into()),
        phone_number: Some("15551234567".into()),
        call_id: None,
        calendar_id: Some(calendar_id.into()),
        scheduled_at: "2024-01-20T15:30:00Z".into(),
        status: AppointmentStatus::Scheduled,
        notes: None,
    }
}

fn upcoming(id: &str) -> CrmAppointment {
    CrmAppointment {
        id: id.into(),
        title: Some("Consultation".into()),
        start_time: Some("2024-01-20T15:30:00Z".into()),
        status: Some("confirmed".into()),
    }
}

#[tokio::test]
async fn test_cold_cache_assembles_every_field() {
    let harness = Harness::cold();
    let assembler = harness.assembler();
    let mut deferred = Deferred::new();

    let payload = assembler.assemble(&request(), &mut deferred).await.unwrap();

    assert_eq!(payload.get_str("customer_known"), Some("yes"));
    assert_eq!(payload.get("customer_facts"), Some(&json!(["likes blue"])));
    assert!(payload.get_str("customer_summary").unwrap().contains("1 known fact"));
    assert_eq!(
        payload.get("available_slots"),
        Some(&json!([{
            "datetime": "2024-01-15T14:00:00Z",
            "formatted": "Monday, January 15 at 02:00 PM",
            "date": "2024-01-15",
            "time": "02:00 PM",
        }]))
    );
    assert_eq!(payload.get("has_availability"), Some(&json!(true)));
    assert_eq!(payload.get("slots_count"), Some(&json!(1)));
    assert_eq!(payload.get("has_existing_appointments"), Some(&json!(false)));
    assert_eq!(payload.get_str("system_prompt"), Some("prompt for greeting-returning-customer"));
    assert_eq!(payload.get("prompt_version"), Some(&json!(3)));
    assert_eq!(payload.get_str("call_id"), Some("call-1"));
    assert_eq!(payload.get_str("customer_phone"), Some(PHONE));
    assert!(payload.contains("timestamp"));

    assert_eq!(harness.slots.queries()[0].start_date, NaiveDate::from_ymd_opt(2024, 1, 14).unwrap());
    assert_eq!(deferred.count(TaskKind::CacheWrite), 1);
    assert_eq!(deferred.count(TaskKind::Refresh), 0);
}

#[tokio::test]
async fn test_cache_write_is_deferred_and_excludes_request_fields() {
    let harness = Harness::cold();
    let assembler = harness.assembler();
    let mut deferred = Deferred::new();

    assembler.assemble(&request(), &mut deferred).await.unwrap();
    assert!(assembler.contexts().get_context(&identity()).await.is_none());

    assert_eq!(deferred.run_inline().await, 0);
    let cached = assembler.contexts().get_context(&identity()).await.unwrap();
    assert_eq!(cached.get_str("customer_known"), Some("yes"));
    assert!(!cached.contains("call_id"));
    assert!(!cached.contains("timestamp"));
    assert!(!cached.contains("customer_phone"));
}

#[tokio::test]
async fn test_warm_cache_returns_payload_without_upstream_calls() {
    let harness = Harness::cold();
    let assembler = harness.assembler();
    let mut warm = ContextPayload::default();
    warm.insert("customer_known", json!("no"));
    assembler.contexts().set_context(&identity(), &warm, None).await;

    let mut deferred = Deferred::new();
    let payload = assembler.assemble(&request(), &mut deferred).await.unwrap();

    let mut expected = warm.clone();
    expected.merge_request(Some("call-1"), PHONE, harness.clock.now());
    assert_eq!(payload, expected);
    assert_eq!(harness.upstream_calls(), 0);
    assert_eq!(deferred.count(TaskKind::Refresh), 1);
    assert_eq!(deferred.count(TaskKind::CacheWrite), 0);
}

#[tokio::test]
async fn test_refresh_task_bypasses_sub_caches() {
    let harness = Harness::cold();
    let assembler = harness.assembler();

    let mut deferred = Deferred::new();
    assembler.assemble(&request(), &mut deferred).await.unwrap();
    deferred.run_inline().await;
    assert_eq!(harness.memory.calls(), 1);

    let mut deferred = Deferred::new();
    assembler.assemble(&request(), &mut deferred).await.unwrap();
    assert_eq!(harness.memory.calls(), 1);

    deferred.run_inline().await;
    assert_eq!(harness.memory.calls(), 2);
    assert_eq!(harness.slots.calls(), 2);
    assert!(assembler.contexts().get_context(&identity()).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_slow_path_fetches_concurrently() {
    let harness = Harness::new(
        FakeMemory::with_facts(&["likes blue"]).with_delay(Duration::from_millis(100)),
        FakeSlots::with_slots(&["2024-01-15T14:00:00Z"]).with_delay(Duration::from_millis(200)),
        FakeRecords::default().with_delay(Duration::from_millis(300)),
    );
    let assembler = harness.assembler();

    let start = tokio::time::Instant::now();
    assembler.assemble(&request(), &mut Deferred::new()).await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(350), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn test_failing_memory_defaults_only_its_fields() {
    let harness = Harness::new(
        FakeMemory::failing(),
        FakeSlots::with_slots(&["2024-01-15T14:00:00Z"]),
        FakeRecords::default(),
    );
    let payload = harness.assembler().assemble(&request(), &mut Deferred::new()).await.unwrap();

    assert_eq!(payload.get_str("customer_known"), Some("no"));
    assert_eq!(payload.get_str("customer_summary"), Some("New customer, no previous interactions"));
    assert!(!payload.contains("customer_facts"));
    assert_eq!(payload.get("has_availability"), Some(&json!(true)));
    assert_eq!(payload.get_str("system_prompt"), Some("prompt for greeting-new-customer"));
}

#[tokio::test]
async fn test_every_source_failing_still_yields_full_payload() {
    let harness = Harness::new(FakeMemory::failing(), FakeSlots::failing(), FakeRecords::failing())
        .with_crm(FakeCrm::failing());
    let payload = harness.assembler().assemble(&request(), &mut Deferred::new()).await.unwrap();

    for field in [
        "customer_known",
        "customer_summary",
        "available_slots",
        "has_availability",
        "slots_count",
        "existing_appointments",
        "has_existing_appointments",
        "appointment_count",
        "system_prompt",
        "prompt_version",
    ] {
        assert!(payload.contains(field), "missing {field}");
    }
    assert_eq!(payload.get("slots_count"), Some(&json!(0)));
    assert!(!payload.contains("ghl_contact_id"));
}

#[tokio::test]
async fn test_unconfigured_memory_marks_caller_unknown() {
    let harness = Harness::cold();
    let assembler = ContextAssembler::new(ContextCache::new(harness.cache()), harness.prompts.clone());
    let payload = assembler.assemble(&request(), &mut Deferred::new()).await.unwrap();

    assert_eq!(payload.get_str("customer_known"), Some("unknown"));
    assert_eq!(payload.get("has_availability"), Some(&json!(false)));
}

#[tokio::test]
async fn test_phone_without_digits_is_rejected() {
    let harness = Harness::cold();
    let err = harness
        .assembler()
        .assemble(&CallRequest::new("anonymous"), &mut Deferred::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(harness.upstream_calls(), 0);
}

#[tokio::test]
async fn test_known_contact_brings_future_appointments() {
    let records = FakeRecords::with_contact(ContactRecord {
        phone_number: "15551234567".into(),
        name: Some("Dana".into()),
        ghl_contact_id: Some("contact-15551234567".into()),
        last_call_at: None,
        total_calls: 4,
    });
    let crm = FakeCrm::with_appointments(vec![
        CrmAppointment { id: "old".into(), title: None, start_time: Some("2024-01-01T10:00:00Z".into()), status: None },
        CrmAppointment {
            id: "next".into(),
            title: Some("Consultation".into()),
            start_time: Some("2024-01-20T15:30:00Z".into()),
            status: Some("confirmed".into()),
        },
    ]);
    let harness = Harness::new(FakeMemory::with_facts(&[]), FakeSlots::with_slots(&[]), records).with_crm(crm);

    let payload = harness.assembler().assemble(&request(), &mut Deferred::new()).await.unwrap();

    assert_eq!(payload.get_str("ghl_contact_id"), Some("contact-15551234567"));
    assert_eq!(payload.get_str("customer_name"), Some("Dana"));
    assert_eq!(payload.get("total_calls"), Some(&json!(4)));
    assert_eq!(payload.get("appointment_count"), Some(&json!(1)));
    assert_eq!(payload.get("existing_appointments").unwrap()[0]["formatted"], "Saturday, January 20 at 03:30 PM");
}

#[tokio::test]
async fn test_background_tasks_record_call_and_link_crm_contact() {
    let harness = Harness::cold().with_crm(FakeCrm::default());
    let assembler = harness.assembler();

    let mut deferred = Deferred::new();
    assembler.assemble(&request(), &mut deferred).await.unwrap();
    assert_eq!(deferred.count(TaskKind::SystemUpdate), 1);
    assert_eq!(deferred.count(TaskKind::RecordCall), 1);
    assert_eq!(deferred.run_inline().await, 0);

    let contact = harness.records.contact("15551234567").unwrap();
    assert_eq!(contact.ghl_contact_id.as_deref(), Some("contact-15551234567"));
    assert_eq!(contact.total_calls, 1);
    assert_eq!(harness.records.logged_calls()[0].call_id, "call-1");
    assert_eq!(harness.records.metrics(NaiveDate::from_ymd_opt(2024, 1, 14).unwrap()).total_calls, 1);

    let upserts = harness.crm.as_ref().unwrap().upserts();
    assert_eq!(upserts[0].1.source, "Retell AI Inbound");
    assert_eq!(upserts[0].1.custom_fields["last_call_id"], "call-1");
}

async fn seed_slot_windows(harness: &Harness) {
    seed_calendar_windows(harness, "cal-1").await;
}

async fn seed_calendar_windows(harness: &Harness, calendar_id: &str) {
    let slots = CachedSlots::new(harness.slots.clone(), harness.cache());
    for day in [15, 16, 17] {
        let today = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        slots.fetch(&SlotQuery::upcoming(calendar_id, "America/New_York", today, 7), false).await.unwrap();
    }
    let prefix = format!("slots:{calendar_id}:");
    assert_eq!(harness.store.keys_with_prefix(&prefix).await.len(), 3);
}

#[tokio::test]
async fn test_booking_invalidates_calendar_and_caller() {
    let harness = Harness::cold().with_crm(FakeCrm::default());
    let assembler = harness.assembler();
    seed_slot_windows(&harness).await;
    assembler.contexts().set_context(&identity(), &ContextPayload::default(), None).await;

    let mut deferred = Deferred::new();
    let booking = BookRequest {
        slot_time: Some("2024-01-15T14:00:00Z".into()),
        customer_phone: Some(PHONE.into()),
        call_id: Some("call-1".into()),
        ..Default::default()
    };
    let appointment = assembler.book(&booking, &mut deferred).await.unwrap();
    assert_eq!(appointment.id, "evt-1");
    assert_eq!(deferred.count(TaskKind::Invalidate), 2);

    assert_eq!(deferred.run_inline().await, 0);
    assert!(harness.store.keys_with_prefix("slots:cal-1:").await.is_empty());
    assert!(assembler.contexts().get_context(&identity()).await.is_none());

    let crm = harness.crm.as_ref().unwrap();
    assert_eq!(crm.bookings()[0].contact_id, "contact-15551234567");
    assert_eq!(crm.bookings()[0].calendar_id, "cal-1");
    assert_eq!(crm.bookings()[0].title, "Phone Appointment");

    let stored = harness.records.appointments();
    assert_eq!(stored[0].ghl_appointment_id.as_deref(), Some("evt-1"));
    assert_eq!(stored[0].status, AppointmentStatus::Scheduled);
    assert_eq!(harness.records.metrics(NaiveDate::from_ymd_opt(2024, 1, 14).unwrap()).appointments_booked, 1);
}

#[tokio::test]
async fn test_booking_requires_contact_and_slot() {
    let harness = Harness::cold();
    let err = harness
        .assembler()
        .book(&BookRequest { slot_time: Some("2024-01-15T14:00:00Z".into()), ..Default::default() }, &mut Deferred::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = harness
        .assembler()
        .book(
            &BookRequest {
                contact_id: Some("c-1".into()),
                slot_time: Some("2024-01-15T14:00:00Z".into()),
                ..Default::default()
            },
            &mut Deferred::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotConfigured(_)));
}

#[tokio::test]
async fn test_cancel_and_reschedule_record_status() {
    let harness = Harness::cold().with_crm(FakeCrm::default());
    let assembler = harness.assembler();
    seed_slot_windows(&harness).await;

    let mut deferred = Deferred::new();
    assembler.reschedule("evt-9", "2024-01-16T15:00:00Z", &mut deferred).await.unwrap();
    assembler.cancel("evt-8", &mut deferred).await.unwrap();
    assert_eq!(deferred.run_inline().await, 0);

    assert!(harness.store.keys_with_prefix("slots:cal-1:").await.is_empty());
    let updates = harness.records.appointment_updates();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].scheduled_at.as_deref(), Some("2024-01-16T15:00:00Z"));
    assert_eq!(updates[1].status, AppointmentStatus::Cancelled);
    assert_eq!(harness.crm.as_ref().unwrap().cancelled(), vec!["evt-8".to_string()]);

    let err = assembler.cancel("  ", &mut Deferred::new()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_call_ended_stores_transcript_and_invalidates() {
    let harness = Harness::cold();
    let assembler = harness.assembler();
    assembler.assemble(&request(), &mut Deferred::new()).await.unwrap();
    assert!(harness.store.get("memory:15551234567").await.unwrap().is_some());
    assembler.contexts().set_context(&identity(), &ContextPayload::default(), None).await;

    let mut deferred = Deferred::new();
    assembler.call_ended(
        &CallEndedEvent {
            call_id: "call-1".into(),
            customer_phone: Some(PHONE.into()),
            transcript: Some("Agent: hello".into()),
            duration_seconds: Some(95),
            outcome: None,
        },
        &mut deferred,
    );
    assert_eq!(deferred.count(TaskKind::Persist), 2);
    assert_eq!(deferred.count(TaskKind::Invalidate), 1);
    assert_eq!(deferred.run_inline().await, 0);

    assert_eq!(
        harness.memory.transcripts(),
        vec![("15551234567".to_string(), "call-1".to_string(), "Agent: hello".to_string())]
    );
    assert_eq!(harness.records.ended_calls()[0].duration_seconds, Some(95));
    assert!(assembler.contexts().get_context(&identity()).await.is_none());
    assert!(harness.store.get("memory:15551234567").await.unwrap().is_none());
}

#[tokio::test]
async fn test_availability_uses_defaults_and_cache() {
    let harness = Harness::cold();
    let assembler = harness.assembler();

    let first = assembler.availability(&AvailabilityRequest::default()).await.unwrap();
    let second = assembler.availability(&AvailabilityRequest::default()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(harness.slots.calls(), 1);

    let query = &harness.slots.queries()[0];
    assert_eq!(query.calendar_id, "cal-1");
    assert_eq!(query.end_date, NaiveDate::from_ymd_opt(2024, 1, 21).unwrap());

    let backwards = AvailabilityRequest {
        start_date: NaiveDate::from_ymd_opt(2024, 1, 21),
        end_date: NaiveDate::from_ymd_opt(2024, 1, 14),
        ..Default::default()
    };
    assert!(matches!(assembler.availability(&backwards).await, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_cancel_drops_owner_context() {
    let records = FakeRecords::with_contact(linked_contact()).with_appointment(recorded_appointment("evt-8", "cal-1"));
    let harness = Harness::new(FakeMemory::with_facts(&[]), FakeSlots::with_slots(&[]), records)
        .with_crm(FakeCrm::with_appointments(vec![upcoming("evt-8")]));
    let assembler = harness.assembler();

    let mut deferred = Deferred::new();
    assembler.assemble(&request(), &mut deferred).await.unwrap();
    deferred.run_inline().await;
    let cached = assembler.contexts().get_context(&identity()).await.unwrap();
    assert_eq!(cached.get("appointment_count"), Some(&json!(1)));

    let mut deferred = Deferred::new();
    assembler.cancel("evt-8", &mut deferred).await.unwrap();
    assert_eq!(deferred.run_inline().await, 0);
    assert!(assembler.contexts().get_context(&identity()).await.is_none());

    let payload = assembler.assemble(&request(), &mut Deferred::new()).await.unwrap();
    assert_eq!(payload.get("appointment_count"), Some(&json!(0)));
    assert_eq!(payload.get("has_existing_appointments"), Some(&json!(false)));
}

#[tokio::test]
async fn test_reschedule_drops_owner_context_and_its_calendar() {
    let records = FakeRecords::with_contact(linked_contact()).with_appointment(recorded_appointment("evt-9", "cal-2"));
    let harness = Harness::new(FakeMemory::with_facts(&[]), FakeSlots::with_slots(&[]), records)
        .with_crm(FakeCrm::default());
    let assembler = harness.assembler();
    seed_slot_windows(&harness).await;
    seed_calendar_windows(&harness, "cal-2").await;
    assembler.contexts().set_context(&identity(), &ContextPayload::default(), None).await;

    let mut deferred = Deferred::new();
    assembler.reschedule("evt-9", "2024-01-22T10:00:00Z", &mut deferred).await.unwrap();
    assert_eq!(deferred.run_inline().await, 0);

    assert!(assembler.contexts().get_context(&identity()).await.is_none());
    assert!(harness.store.keys_with_prefix("slots:cal-1:").await.is_empty());
    assert!(harness.store.keys_with_prefix("slots:cal-2:").await.is_empty());
}

#[tokio::test]
async fn test_unrecorded_appointment_change_only_drops_default_calendar() {
    let harness = Harness::cold().with_crm(FakeCrm::default());
    let assembler = harness.assembler();
    seed_slot_windows(&harness).await;
    assembler.contexts().set_context(&identity(), &ContextPayload::default(), None).await;

    let mut deferred = Deferred::new();
    assembler.cancel("evt-external", &mut deferred).await.unwrap();
    assert_eq!(deferred.run_inline().await, 0);

    assert!(harness.store.keys_with_prefix("slots:cal-1:").await.is_empty());
    assert!(assembler.contexts().get_context(&identity()).await.is_some());
}

#[tokio::test]
async fn test_booking_by_contact_id_drops_linked_caller() {
    let harness = Harness::new(
        FakeMemory::with_facts(&[]),
        FakeSlots::with_slots(&[]),
        FakeRecords::with_contact(linked_contact()),
    )
    .with_crm(FakeCrm::default());
    let assembler = harness.assembler();
    assembler.contexts().set_context(&identity(), &ContextPayload::default(), None).await;

    let mut deferred = Deferred::new();
    let booking = BookRequest {
        contact_id: Some("contact-15551234567".into()),
        slot_time: Some("2024-01-15T14:00:00Z".into()),
        ..Default::default()
    };
    assembler.book(&booking, &mut deferred).await.unwrap();
    assert_eq!(deferred.count(TaskKind::Invalidate), 2);
    assert_eq!(deferred.run_inline().await, 0);

    assert!(assembler.contexts().get_context(&identity()).await.is_none());
    let stored = harness.records.appointments();
    assert_eq!(stored[0].phone_number.as_deref(), Some("15551234567"));
    assert_eq!(stored[0].calendar_id.as_deref(), Some("cal-1"));
}

#[tokio::test]
async fn test_trace_records_call_and_prompt_generation() {
    let harness = Harness::cold();
    let assembler = harness.assembler();

    let mut deferred = Deferred::new();
    assembler.assemble(&request(), &mut deferred).await.unwrap();
    assert_eq!(deferred.count(TaskKind::Trace), 1);
    assert!(harness.traces.traces().is_empty());
    deferred.run_inline().await;

    let traces = harness.traces.traces();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].id, "call-1");
    assert_eq!(traces[0].name, INBOUND_TRACE);
    assert_eq!(traces[0].user_id, "15551234567");
    assert_eq!(traces[0].session_id.as_deref(), Some("call-1"));
    let generation = traces[0].generation.as_ref().unwrap();
    assert_eq!(generation.prompt_name, RETURNING_CUSTOMER_PROMPT);
    assert_eq!(generation.prompt_version, 3);
    assert_eq!(generation.prompt, "prompt for greeting-returning-customer");

    // served from cache, still traced with the cached prompt
    let mut deferred = Deferred::new();
    assembler.assemble(&request(), &mut deferred).await.unwrap();
    assert_eq!(deferred.count(TaskKind::Trace), 1);
    deferred.run_inline().await;
    assert_eq!(harness.traces.traces()[1].generation.as_ref().unwrap().prompt_version, 3);
}

#[tokio::test]
async fn test_trace_without_call_id_gets_derived_id() {
    let harness = Harness::cold();
    let mut deferred = Deferred::new();
    harness.assembler().assemble(&CallRequest::new(PHONE), &mut deferred).await.unwrap();
    deferred.run_inline().await;

    let trace = &harness.traces.traces()[0];
    assert!(trace.id.starts_with("inbound-call-15551234567-"));
    assert_eq!(trace.session_id, None);
}

#[tokio::test]
async fn test_transferred_call_counts_transfer() {
    let harness = Harness::cold();
    let mut deferred = Deferred::new();
    harness.assembler().call_ended(
        &CallEndedEvent {
            call_id: "call-2".into(),
            customer_phone: Some(PHONE.into()),
            outcome: Some("transferred".into()),
            ..Default::default()
        },
        &mut deferred,
    );
    assert_eq!(deferred.run_inline().await, 0);

    let metrics = harness.records.metrics(NaiveDate::from_ymd_opt(2024, 1, 14).unwrap());
    assert_eq!(metrics.transfers, 1);
    assert_eq!(metrics.total_calls, 0);
}
