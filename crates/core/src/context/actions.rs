//! Mutating call-flow actions: call end, booking, reschedule, cancel.
//!
//! Each action does its upstream work inline and queues the cache
//! invalidation and record writes it implies. A mutation drops every cache
//! entry that shows the appointment: the calendar's slot windows and the
//! owning caller's context and memory. When the request does not name the
//! caller, the owner is resolved from the local records in the background.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use std::sync::Arc;

use super::ContextAssembler;
use crate::Error;
use crate::identity::IdentityKey;
use crate::records::{
    AppointmentRecord, AppointmentStatus, AppointmentUpdate, CallEnded, MetricsDelta, RecordStore,
};
use crate::source::{BookingRequest, ContactUpdate, CrmAppointment, SlotQuery, SlotsResponse};
use crate::tasks::{BackgroundTask, Deferred, TaskKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallEndedEvent {
    pub call_id: String,
    pub customer_phone: Option<String>,
    pub transcript: Option<String>,
    pub duration_seconds: Option<i64>,
    pub outcome: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRequest {
    pub contact_id: Option<String>,
    pub calendar_id: Option<String>,
    pub slot_time: Option<String>,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub customer_phone: Option<String>,
    pub assigned_user_id: Option<String>,
    pub call_id: Option<String>,
}

/// Availability lookup. Missing fields fall back to configuration and today.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRequest {
    pub calendar_id: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub timezone: Option<String>,
}

/// Call outcome that counts towards the day's transfers.
pub const TRANSFERRED_OUTCOME: &str = "transferred";

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

impl ContextAssembler {
    /// Queue the work that follows a finished call: transcript to memory,
    /// call record, and dropping the caller's cached context and memory.
    pub fn call_ended(&self, event: &CallEndedEvent, deferred: &mut Deferred) {
        let identity = event
            .customer_phone
            .as_deref()
            .and_then(|phone| IdentityKey::normalize(phone).ok());

        if let (Some(memory), Some(identity), Some(transcript)) =
            (&self.memory, &identity, non_empty(event.transcript.as_deref()))
        {
            let source = memory.source().clone();
            let identity = identity.clone();
            let session = event.call_id.clone();
            let transcript = transcript.to_string();
            deferred.schedule(BackgroundTask::new(TaskKind::Persist, format!("transcript:{session}"), async move {
                source.store_transcript(&identity, &session, &transcript).await?;
                tracing::info!(%identity, %session, "stored transcript");
                Ok(())
            }));
        }

        if let Some(records) = self.records.clone() {
            let ended = CallEnded {
                call_id: event.call_id.clone(),
                call_ended_at: self.now(),
                duration_seconds: event.duration_seconds,
                outcome: event.outcome.clone(),
                transcript: event.transcript.clone(),
            };
            let transferred = event.outcome.as_deref() == Some(TRANSFERRED_OUTCOME);
            let today = ended.call_ended_at.date_naive();
            deferred.schedule(BackgroundTask::new(
                TaskKind::Persist,
                format!("call-ended:{}", ended.call_id),
                async move {
                    records.update_call_ended(&ended).await?;
                    if transferred {
                        records.update_daily_metrics(today, &MetricsDelta::transfer()).await?;
                    }
                    Ok(())
                },
            ));
        }

        if let Some(identity) = identity {
            deferred.schedule(self.invalidate_caller_task(identity));
        }
    }

    /// Book a slot in the CRM.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when the contact, calendar or slot cannot be resolved,
    /// `NotConfigured` without a CRM, and the CRM's own failure otherwise.
    pub async fn book(&self, request: &BookRequest, deferred: &mut Deferred) -> Result<CrmAppointment, Error> {
        let mut contact_id = non_empty(request.contact_id.as_deref()).map(str::to_string);
        if contact_id.is_none()
            && let (Some(phone), Some(crm)) = (non_empty(request.customer_phone.as_deref()), &self.crm)
        {
            let update = ContactUpdate { source: "Retell AI Booking".into(), ..Default::default() };
            contact_id = Some(crm.upsert_contact(phone, &update).await?);
        }

        let calendar_id = non_empty(request.calendar_id.as_deref())
            .or(self.settings.calendar_id.as_deref())
            .map(str::to_string);
        let slot_time = non_empty(request.slot_time.as_deref()).map(str::to_string);
        let (Some(contact_id), Some(calendar_id), Some(slot_time)) = (contact_id, calendar_id, slot_time) else {
            return Err(Error::InvalidInput("Missing required fields: contact_id, calendar_id, slot_time".into()));
        };
        let Some(crm) = &self.crm else {
            return Err(Error::NotConfigured("GHL client not configured".into()));
        };

        let booking = BookingRequest {
            calendar_id: calendar_id.clone(),
            contact_id: contact_id.clone(),
            slot_time: slot_time.clone(),
            title: request.title.clone().unwrap_or_else(|| "Phone Appointment".into()),
            notes: request.notes.clone().unwrap_or_default(),
            assigned_user_id: request.assigned_user_id.clone(),
        };
        let appointment = crm.book_appointment(&booking).await?;
        tracing::info!(appointment_id = %appointment.id, %calendar_id, "appointment booked");

        deferred.schedule(self.invalidate_calendar_task(&calendar_id));
        let identity = request
            .customer_phone
            .as_deref()
            .and_then(|phone| IdentityKey::normalize(phone).ok());
        match (&identity, &self.records) {
            (Some(identity), _) => deferred.schedule(self.invalidate_caller_task(identity.clone())),
            (None, Some(records)) => deferred.schedule(self.invalidate_crm_contact_task(records.clone(), &contact_id)),
            (None, None) => tracing::debug!(%contact_id, "caller unknown, cached context left to expire"),
        }

        if let Some(records) = self.records.clone() {
            let record = AppointmentRecord {
                ghl_appointment_id: Some(appointment.id.clone()),
                phone_number: identity.map(|i| i.as_str().to_string()),
                call_id: request.call_id.clone(),
                calendar_id: Some(calendar_id),
                scheduled_at: slot_time,
                status: AppointmentStatus::Scheduled,
                notes: request.notes.clone(),
            };
            let today = self.now().date_naive();
            deferred.schedule(BackgroundTask::new(
                TaskKind::Persist,
                format!("appointment:{}", appointment.id),
                async move {
                    let mut record = record;
                    if record.phone_number.is_none()
                        && let Some(contact) = records.contact_by_crm_id(&contact_id).await?
                    {
                        record.phone_number = Some(contact.phone_number);
                    }
                    records.create_appointment(&record).await?;
                    records.update_daily_metrics(today, &MetricsDelta::booking()).await
                },
            ));
        }

        Ok(appointment)
    }

    /// Move an appointment to a new start time.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a blank id or time, `NotConfigured` without a CRM.
    pub async fn reschedule(
        &self, event_id: &str, new_start_time: &str, deferred: &mut Deferred,
    ) -> Result<CrmAppointment, Error> {
        let (Some(event_id), Some(new_start_time)) = (non_empty(Some(event_id)), non_empty(Some(new_start_time)))
        else {
            return Err(Error::InvalidInput("Missing required fields: event_id, new_start_time".into()));
        };
        let Some(crm) = &self.crm else {
            return Err(Error::NotConfigured("GHL client not configured".into()));
        };

        let appointment = crm.reschedule_appointment(event_id, new_start_time).await?;
        tracing::info!(event_id, new_start_time, "appointment rescheduled");

        self.schedule_appointment_change(
            AppointmentUpdate {
                ghl_appointment_id: event_id.to_string(),
                status: AppointmentStatus::Scheduled,
                scheduled_at: Some(new_start_time.to_string()),
                notes: None,
            },
            deferred,
        );
        Ok(appointment)
    }

    /// Cancel an appointment.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a blank id, `NotConfigured` without a CRM.
    pub async fn cancel(&self, event_id: &str, deferred: &mut Deferred) -> Result<(), Error> {
        let Some(event_id) = non_empty(Some(event_id)) else {
            return Err(Error::InvalidInput("Missing required field: event_id".into()));
        };
        let Some(crm) = &self.crm else {
            return Err(Error::NotConfigured("GHL client not configured".into()));
        };

        crm.cancel_appointment(event_id).await?;
        tracing::info!(event_id, "appointment cancelled");

        self.schedule_appointment_change(
            AppointmentUpdate {
                ghl_appointment_id: event_id.to_string(),
                status: AppointmentStatus::Cancelled,
                scheduled_at: None,
                notes: None,
            },
            deferred,
        );
        Ok(())
    }

    /// Read-through availability for an arbitrary window.
    ///
    /// # Errors
    ///
    /// `NotConfigured` without a calendar source, `InvalidInput` without a
    /// calendar id, and upstream failures as-is.
    pub async fn availability(&self, request: &AvailabilityRequest) -> Result<SlotsResponse, Error> {
        let Some(slots) = &self.slots else {
            return Err(Error::NotConfigured("GHL client not configured".into()));
        };
        let Some(calendar_id) = non_empty(request.calendar_id.as_deref()).or(self.settings.calendar_id.as_deref())
        else {
            return Err(Error::InvalidInput("Calendar ID not configured".into()));
        };

        let default = self.slot_query(calendar_id);
        let start_date = request.start_date.unwrap_or(default.start_date);
        let query = SlotQuery {
            calendar_id: calendar_id.to_string(),
            start_date,
            end_date: request.end_date.unwrap_or(default.end_date),
            timezone: request.timezone.clone().unwrap_or(default.timezone),
        };
        if query.end_date < query.start_date {
            return Err(Error::InvalidInput("end_date is before start_date".into()));
        }
        slots.fetch(&query, false).await
    }

    fn schedule_appointment_change(&self, update: AppointmentUpdate, deferred: &mut Deferred) {
        if let Some(calendar_id) = self.settings.calendar_id.clone() {
            deferred.schedule(self.invalidate_calendar_task(&calendar_id));
        }
        let Some(records) = self.records.clone() else {
            return;
        };
        deferred.schedule(self.invalidate_appointment_owner_task(records.clone(), &update.ghl_appointment_id));
        deferred.schedule(BackgroundTask::new(
            TaskKind::Persist,
            format!("appointment:{}", update.ghl_appointment_id),
            async move { records.update_appointment_status(&update).await },
        ));
    }

    async fn drop_caller(&self, identity: &IdentityKey) {
        self.contexts.invalidate_context(identity).await;
        if let Some(memory) = &self.memory {
            memory.invalidate(identity).await;
        }
    }

    async fn drop_calendar(&self, calendar_id: &str) {
        if let Some(slots) = &self.slots {
            slots.invalidate(calendar_id).await;
        }
    }

    fn invalidate_calendar_task(&self, calendar_id: &str) -> BackgroundTask {
        let this = self.clone();
        let calendar_id = calendar_id.to_string();
        BackgroundTask::new(TaskKind::Invalidate, format!("slots:{calendar_id}"), async move {
            this.drop_calendar(&calendar_id).await;
            Ok(())
        })
    }

    fn invalidate_caller_task(&self, identity: IdentityKey) -> BackgroundTask {
        let this = self.clone();
        BackgroundTask::new(TaskKind::Invalidate, format!("caller:{identity}"), async move {
            this.drop_caller(&identity).await;
            Ok(())
        })
    }

    /// Drop the cached context of whoever the CRM contact belongs to.
    fn invalidate_crm_contact_task(&self, records: Arc<dyn RecordStore>, contact_id: &str) -> BackgroundTask {
        let this = self.clone();
        let contact_id = contact_id.to_string();
        BackgroundTask::new(TaskKind::Invalidate, format!("contact:{contact_id}"), async move {
            let Some(contact) = records.contact_by_crm_id(&contact_id).await? else {
                tracing::debug!(%contact_id, "crm contact not linked locally, cached context left to expire");
                return Ok(());
            };
            let identity = IdentityKey::normalize(&contact.phone_number)?;
            this.drop_caller(&identity).await;
            Ok(())
        })
    }

    /// Drop the caches showing a recorded appointment: its owner's context
    /// and memory, and its own calendar when that is not the default one.
    fn invalidate_appointment_owner_task(&self, records: Arc<dyn RecordStore>, event_id: &str) -> BackgroundTask {
        let this = self.clone();
        let event_id = event_id.to_string();
        BackgroundTask::new(TaskKind::Invalidate, format!("appointment-owner:{event_id}"), async move {
            let Some(stored) = records.find_appointment(&event_id).await? else {
                tracing::debug!(%event_id, "appointment not recorded locally, cached context left to expire");
                return Ok(());
            };
            if let Some(identity) = stored.phone_number.as_deref().and_then(|p| IdentityKey::normalize(p).ok()) {
                this.drop_caller(&identity).await;
            }
            if let Some(calendar_id) = stored.calendar_id
                && this.settings.calendar_id.as_deref() != Some(calendar_id.as_str())
            {
                this.drop_calendar(&calendar_id).await;
            }
            Ok(())
        })
    }
}
