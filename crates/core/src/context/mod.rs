//! Context assembly for inbound calls.
//!
//! [`ContextAssembler::assemble`] has two paths:
//!
//! - **fast**: the full context is cached. Merge the request fields, queue a
//!   refresh so the next call sees fresh data, return. No upstream calls.
//! - **slow**: fetch memory, availability and the contact concurrently, fold
//!   whatever succeeded into a payload with per-field defaults, queue the cache
//!   write and the system update, return.
//!
//! Nothing on either path waits for cache population, record writes or the
//! call trace; that work goes to the request's [`Deferred`] queue.

mod actions;
mod payload;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::Error;
use crate::cache::{CachedMemory, CachedSlots, ContextCache};
use crate::clock::{Clock, SystemClock};
use crate::identity::IdentityKey;
use crate::records::{CallLog, ContactRecord, ContactUpsert, MetricsDelta, RecordStore};
use crate::source::{
    CallTrace, ContactUpdate, CrmAppointment, CrmSource, NoopTraces, PromptGeneration, PromptSource, SlotQuery,
    TraceSink,
};
use crate::tasks::{BackgroundTask, Deferred, TaskKind};

pub use actions::{AvailabilityRequest, BookRequest, CallEndedEvent};
pub use payload::{ContextPayload, format_slot};

pub const RETURNING_CUSTOMER_PROMPT: &str = "greeting-returning-customer";
pub const NEW_CUSTOMER_PROMPT: &str = "greeting-new-customer";
pub const FALLBACK_GREETING: &str = "Hi! Thanks for calling. How can I help you today?";
pub const INBOUND_TRACE: &str = "inbound-call";

/// Knobs for assembly that come from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblySettings {
    /// Calendar offered to callers. No calendar means no availability lookup.
    pub calendar_id: Option<String>,
    pub timezone: String,
    /// Days of availability to look ahead.
    pub availability_days: u32,
    pub max_slots: usize,
}

impl Default for AssemblySettings {
    fn default() -> Self {
        Self { calendar_id: None, timezone: "America/New_York".to_string(), availability_days: 7, max_slots: 5 }
    }
}

/// An inbound call as the webhook reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub call_id: Option<String>,
    pub customer_phone: String,
    #[serde(default)]
    pub to_number: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl CallRequest {
    pub fn new(customer_phone: impl Into<String>) -> Self {
        Self { customer_phone: customer_phone.into(), ..Default::default() }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }
}

/// Contact lookup result, already degraded to defaults.
#[derive(Debug, Default)]
struct ContactContext {
    record: Option<ContactRecord>,
    appointments: Vec<CrmAppointment>,
}

/// Orchestrates the caches and upstream sources for one caller.
///
/// Cheap to clone; every collaborator sits behind an `Arc` or is itself a
/// shared handle. Optional collaborators that are not configured degrade to
/// the field's default.
#[derive(Clone)]
pub struct ContextAssembler {
    contexts: ContextCache,
    prompts: Arc<dyn PromptSource>,
    traces: Arc<dyn TraceSink>,
    memory: Option<CachedMemory>,
    slots: Option<CachedSlots>,
    crm: Option<Arc<dyn CrmSource>>,
    records: Option<Arc<dyn RecordStore>>,
    clock: Arc<dyn Clock>,
    settings: AssemblySettings,
}

impl std::fmt::Debug for ContextAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextAssembler")
            .field("memory", &self.memory.is_some())
            .field("slots", &self.slots.is_some())
            .field("crm", &self.crm.is_some())
            .field("records", &self.records.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ContextAssembler {
    pub fn new(contexts: ContextCache, prompts: Arc<dyn PromptSource>) -> Self {
        Self {
            contexts,
            prompts,
            traces: Arc::new(NoopTraces),
            memory: None,
            slots: None,
            crm: None,
            records: None,
            clock: Arc::new(SystemClock),
            settings: AssemblySettings::default(),
        }
    }

    pub fn with_memory(mut self, memory: CachedMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_slots(mut self, slots: CachedSlots) -> Self {
        self.slots = Some(slots);
        self
    }

    pub fn with_crm(mut self, crm: Arc<dyn CrmSource>) -> Self {
        self.crm = Some(crm);
        self
    }

    pub fn with_records(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn with_traces(mut self, traces: Arc<dyn TraceSink>) -> Self {
        self.traces = traces;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: AssemblySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn contexts(&self) -> &ContextCache {
        &self.contexts
    }

    pub fn memory(&self) -> Option<&CachedMemory> {
        self.memory.as_ref()
    }

    pub fn slots(&self) -> Option<&CachedSlots> {
        self.slots.as_ref()
    }

    pub fn settings(&self) -> &AssemblySettings {
        &self.settings
    }

    /// Build the context for an inbound call.
    ///
    /// # Errors
    ///
    /// Only a phone number without digits fails; every upstream fault
    /// degrades to that field's default.
    pub async fn assemble(&self, request: &CallRequest, deferred: &mut Deferred) -> Result<ContextPayload, Error> {
        let identity = IdentityKey::normalize(&request.customer_phone)?;
        let call_id = request.call_id.as_deref();
        let start = Instant::now();

        if let Some(mut cached) = self.contexts.get_context(&identity).await {
            cached.merge_request(call_id, &request.customer_phone, self.clock.now());
            deferred.schedule(self.refresh_task(&identity, call_id));
            self.schedule_record_call(&identity, request, deferred);
            deferred.schedule(self.trace_task(&identity, request, &cached));
            tracing::info!(%identity, latency_ms = start.elapsed().as_millis() as u64, "context served from cache");
            return Ok(cached);
        }

        let payload = self.build(&identity, call_id, false).await;

        let contexts = self.contexts.clone();
        let cached = payload.clone();
        let key = identity.clone();
        deferred.schedule(BackgroundTask::new(
            TaskKind::CacheWrite,
            format!("context:{identity}"),
            async move {
                contexts.set_context(&key, &cached, None).await;
                Ok(())
            },
        ));
        if let Some(task) = self.system_update_task(&identity, request) {
            deferred.schedule(task);
        }
        self.schedule_record_call(&identity, request, deferred);

        let mut payload = payload;
        payload.merge_request(call_id, &request.customer_phone, self.clock.now());
        deferred.schedule(self.trace_task(&identity, request, &payload));
        tracing::info!(%identity, latency_ms = start.elapsed().as_millis() as u64, "context assembled");
        Ok(payload)
    }

    /// Re-derive the context with every sub-cache bypassed and store it.
    pub async fn refresh(&self, identity: &IdentityKey, session: Option<&str>) -> ContextPayload {
        let payload = self.build(identity, session, true).await;
        self.contexts.set_context(identity, &payload, None).await;
        tracing::info!(%identity, "context refreshed");
        payload
    }

    fn refresh_task(&self, identity: &IdentityKey, session: Option<&str>) -> BackgroundTask {
        let this = self.clone();
        let identity = identity.clone();
        let session = session.map(str::to_string);
        BackgroundTask::new(TaskKind::Refresh, format!("refresh:{identity}"), async move {
            this.refresh(&identity, session.as_deref()).await;
            Ok(())
        })
    }

    /// Fan out to every source, then fold the results into a payload.
    ///
    /// The result holds no request fields and is safe to cache.
    async fn build(&self, identity: &IdentityKey, session: Option<&str>, force_refresh: bool) -> ContextPayload {
        let (facts, slots, contact) = tokio::join!(
            self.fetch_facts(identity, session, force_refresh),
            self.fetch_slots(force_refresh),
            self.fetch_contact(identity),
        );

        let mut payload = ContextPayload::default();
        payload.set_memory(facts.as_deref());
        payload.set_slots(slots.as_deref().unwrap_or(&[]), self.settings.max_slots);
        if let Some(record) = &contact.record {
            if let Some(id) = &record.ghl_contact_id {
                payload.insert("ghl_contact_id", json!(id));
            }
            if let Some(name) = &record.name {
                payload.insert("customer_name", json!(name));
            }
            payload.insert("total_calls", json!(record.total_calls));
        }
        payload.set_appointments(&contact.appointments, self.clock.now());

        let prompt = self.prompts.get_prompt(prompt_name(&payload), FALLBACK_GREETING).await;
        payload.set_prompt(&prompt);
        payload
    }

    /// `None` when no memory service is configured; empty on failure.
    async fn fetch_facts(
        &self, identity: &IdentityKey, session: Option<&str>, force_refresh: bool,
    ) -> Option<Vec<Value>> {
        let memory = self.memory.as_ref()?;
        match memory.fetch(identity, session, force_refresh).await {
            Ok(snapshot) => Some(snapshot.facts),
            Err(e) => {
                tracing::error!(%identity, error = %e, "memory fetch failed, treating caller as new");
                Some(Vec::new())
            }
        }
    }

    /// `None` when no calendar is configured; empty on failure.
    async fn fetch_slots(&self, force_refresh: bool) -> Option<Vec<String>> {
        let slots = self.slots.as_ref()?;
        let calendar_id = self.settings.calendar_id.as_deref()?;
        let query = self.slot_query(calendar_id);
        match slots.fetch(&query, force_refresh).await {
            Ok(response) => Some(response.slots),
            Err(e) => {
                tracing::error!(calendar_id, error = %e, "availability fetch failed, offering no slots");
                Some(Vec::new())
            }
        }
    }

    async fn fetch_contact(&self, identity: &IdentityKey) -> ContactContext {
        let Some(records) = &self.records else {
            return ContactContext::default();
        };
        let record = match records.get_contact(identity).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(%identity, error = %e, "contact lookup failed");
                None
            }
        };

        let mut appointments = Vec::new();
        if let (Some(crm), Some(contact_id)) = (&self.crm, record.as_ref().and_then(|r| r.ghl_contact_id.as_deref())) {
            match crm.contact_appointments(contact_id).await {
                Ok(found) => appointments = found,
                Err(e) => tracing::error!(%identity, contact_id, error = %e, "appointment lookup failed"),
            }
        }
        ContactContext { record, appointments }
    }

    pub(crate) fn slot_query(&self, calendar_id: &str) -> SlotQuery {
        let today = self.clock.now().date_naive();
        SlotQuery::upcoming(calendar_id, &self.settings.timezone, today, self.settings.availability_days)
    }

    /// Push the caller to the CRM and remember the CRM id locally.
    fn system_update_task(&self, identity: &IdentityKey, request: &CallRequest) -> Option<BackgroundTask> {
        let crm = self.crm.clone()?;
        let records = self.records.clone();
        let phone = request.customer_phone.clone();
        let identity = identity.clone();
        let now = self.clock.now();

        let mut custom_fields = Map::new();
        custom_fields.insert("last_call_id".into(), json!(request.call_id));
        custom_fields.insert("last_call_time".into(), json!(now.to_rfc3339()));
        custom_fields.extend(request.metadata.clone());
        let update = ContactUpdate {
            source: "Retell AI Inbound".into(),
            tags: vec!["retell-inbound".into(), "voice-ai".into()],
            custom_fields,
        };

        Some(BackgroundTask::new(TaskKind::SystemUpdate, format!("crm:{identity}"), async move {
            let contact_id = crm.upsert_contact(&phone, &update).await?;
            tracing::info!(%identity, %contact_id, "crm contact upserted");
            if let Some(records) = records {
                let link = ContactUpsert {
                    phone_number: identity.as_str().to_string(),
                    ghl_contact_id: Some(contact_id),
                    ..Default::default()
                };
                records.upsert_contact(&link).await?;
            }
            Ok(())
        }))
    }

    fn schedule_record_call(&self, identity: &IdentityKey, request: &CallRequest, deferred: &mut Deferred) {
        let Some(records) = self.records.clone() else {
            return;
        };
        let now = self.clock.now();
        let identity = identity.clone();
        let call = request.call_id.clone().map(|call_id| CallLog {
            call_id,
            phone_number: identity.as_str().to_string(),
            call_started_at: now,
            metadata: json!({ "to_number": request.to_number, "metadata": request.metadata }),
        });

        deferred.schedule(BackgroundTask::new(TaskKind::RecordCall, format!("call:{identity}"), async move {
            if let Some(call) = &call {
                records.log_call(call).await?;
            }
            let seen = ContactUpsert {
                phone_number: identity.as_str().to_string(),
                last_call_at: Some(now),
                count_call: true,
                ..Default::default()
            };
            records.upsert_contact(&seen).await?;
            records.update_daily_metrics(now.date_naive(), &MetricsDelta::call()).await
        }));
    }

    /// Record the call and the prompt it was handed with the tracing service.
    fn trace_task(&self, identity: &IdentityKey, request: &CallRequest, payload: &ContextPayload) -> BackgroundTask {
        let now = self.clock.now();
        let generation = payload.get_str("system_prompt").map(|prompt| PromptGeneration {
            prompt_name: prompt_name(payload).to_string(),
            prompt_version: payload
                .get("prompt_version")
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or_default(),
            prompt: prompt.to_string(),
        });
        let trace = CallTrace {
            id: request
                .call_id
                .clone()
                .unwrap_or_else(|| format!("{INBOUND_TRACE}-{identity}-{}", now.timestamp_millis())),
            name: INBOUND_TRACE.to_string(),
            user_id: identity.as_str().to_string(),
            session_id: request.call_id.clone(),
            timestamp: now,
            metadata: json!({ "from": request.customer_phone, "to": request.to_number }),
            generation,
        };

        let traces = self.traces.clone();
        BackgroundTask::new(TaskKind::Trace, format!("trace:{}", trace.id), async move {
            traces.record_call(&trace).await
        })
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn prompt_name(payload: &ContextPayload) -> &'static str {
    if payload.customer_known() { RETURNING_CUSTOMER_PROMPT } else { NEW_CUSTOMER_PROMPT }
}

#[cfg(test)]
mod tests;
