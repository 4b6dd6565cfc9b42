//! GoHighLevel CRM client.
//!
//! Covers the slice of the LeadConnector API the call flow needs: contact
//! upsert, calendar free slots, and appointment create/move/cancel.
//!
//! ### Specification
//!
//! - **Endpoint**: `https://services.leadconnectorhq.com`
//! - **Authentication**: bearer token plus a `Version: 2021-07-28` header.
//! - **Scope**: every contact and booking call carries the configured
//!   `locationId`.

mod response;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde_json::{Value, json};
use url::Url;

use callctx_core::source::{
    AvailabilitySource, BookingRequest, ContactUpdate, CrmAppointment, CrmSource, SlotQuery, SlotsResponse,
};

use crate::error::UpstreamError;
use crate::http;

const SERVICE: &str = "ghl";

/// Default base URL for the LeadConnector API.
pub const DEFAULT_BASE_URL: &str = "https://services.leadconnectorhq.com";

/// API version header value.
const API_VERSION: &str = "2021-07-28";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// GoHighLevel client configuration.
#[derive(Debug, Clone)]
pub struct GhlConfig {
    pub api_key: String,
    pub location_id: String,
    /// Base URL (default: https://services.leadconnectorhq.com).
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for GhlConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            location_id: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GhlClient {
    http: reqwest::Client,
    base: Url,
    api_key: String,
    location_id: String,
}

impl GhlClient {
    pub fn new(config: GhlConfig) -> Result<Self, UpstreamError> {
        if config.api_key.is_empty() {
            return Err(UpstreamError::MissingCredentials("ghl api key"));
        }
        if config.location_id.is_empty() {
            return Err(UpstreamError::MissingCredentials("ghl location id"));
        }
        let base = http::parse_base_url(&config.base_url)?;
        let http = http::build_client(SERVICE, config.timeout)?;
        Ok(Self { http, base, api_key: config.api_key, location_id: config.location_id })
    }

    pub fn location_id(&self) -> &str {
        &self.location_id
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        self.http
            .request(method, http::endpoint(&self.base, segments))
            .bearer_auth(&self.api_key)
            .header("Version", API_VERSION)
            .header("Accept", "application/json")
    }

    /// Look up an existing contact by phone. Any non-success reads as "none".
    async fn find_contact(&self, phone: &str) -> Result<Option<String>, UpstreamError> {
        let body = json!({ "locationId": self.location_id, "phone": phone });
        let request = self.request(Method::POST, &["contacts", "search", "duplicate"]).json(&body);
        let response = http::send(SERVICE, request).await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let value: Value = http::read_json(SERVICE, response).await?;
        Ok(value.get("contact").and_then(|c| c.get("id")).and_then(Value::as_str).map(str::to_string))
    }
}

#[async_trait]
impl CrmSource for GhlClient {
    async fn upsert_contact(&self, phone: &str, update: &ContactUpdate) -> Result<String, callctx_core::Error> {
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        let existing = self.find_contact(&digits).await?;

        let body = json!({
            "locationId": self.location_id,
            "phone": phone,
            "source": update.source,
            "tags": update.tags,
            "customField": update.custom_fields,
        });

        let request = match &existing {
            Some(id) => self.request(Method::PUT, &["contacts", id.as_str()]),
            None => self.request(Method::POST, &["contacts", ""]),
        };
        let value: Value = http::send_json(SERVICE, request.json(&body)).await?;

        let id = response::nested_id(&value, "contact")
            .or(existing)
            .ok_or_else(|| UpstreamError::parse(SERVICE, "contact response without an id"))?;
        tracing::info!(contact_id = %id, "ghl contact upserted");
        Ok(id)
    }

    async fn contact_appointments(&self, contact_id: &str) -> Result<Vec<CrmAppointment>, callctx_core::Error> {
        let request = self
            .request(Method::GET, &["calendars", "events"])
            .query(&[("locationId", self.location_id.as_str()), ("contactId", contact_id)]);
        let events: response::EventsResponse = http::send_json(SERVICE, request).await?;
        Ok(events.events.into_iter().map(CrmAppointment::from).collect())
    }

    async fn book_appointment(&self, request: &BookingRequest) -> Result<CrmAppointment, callctx_core::Error> {
        let mut body = json!({
            "calendarId": request.calendar_id,
            "locationId": self.location_id,
            "contactId": request.contact_id,
            "startTime": request.slot_time,
            "title": request.title,
            "appointmentStatus": "confirmed",
        });
        if !request.notes.is_empty() {
            body["notes"] = json!(request.notes);
        }
        if let Some(user) = &request.assigned_user_id {
            body["assignedUserId"] = json!(user);
        }

        let builder = self.request(Method::POST, &["calendars", "events", "appointments"]).json(&body);
        let value: Value = http::send_json(SERVICE, builder).await?;
        let id = response::nested_id(&value, "event")
            .ok_or_else(|| UpstreamError::parse(SERVICE, "booking response without an id"))?;

        tracing::info!(event_id = %id, calendar_id = %request.calendar_id, "ghl appointment booked");
        Ok(CrmAppointment {
            id,
            title: Some(request.title.clone()),
            start_time: Some(request.slot_time.clone()),
            status: Some("confirmed".to_string()),
        })
    }

    async fn reschedule_appointment(
        &self, event_id: &str, new_start_time: &str,
    ) -> Result<CrmAppointment, callctx_core::Error> {
        let body = json!({ "startTime": new_start_time });
        let builder = self.request(Method::PUT, &["calendars", "events", event_id]).json(&body);
        let value: Value = http::send_json(SERVICE, builder).await?;

        let status = value.get("appointmentStatus").and_then(Value::as_str).map(str::to_string);
        let title = value.get("title").and_then(Value::as_str).map(str::to_string);
        Ok(CrmAppointment {
            id: event_id.to_string(),
            title,
            start_time: Some(new_start_time.to_string()),
            status,
        })
    }

    async fn cancel_appointment(&self, event_id: &str) -> Result<(), callctx_core::Error> {
        let response = http::send(SERVICE, self.request(Method::DELETE, &["calendars", "events", event_id])).await?;
        http::check(SERVICE, response).await?;
        tracing::info!(event_id, "ghl appointment cancelled");
        Ok(())
    }
}

#[async_trait]
impl AvailabilitySource for GhlClient {
    async fn get_slots(&self, query: &SlotQuery) -> Result<SlotsResponse, callctx_core::Error> {
        let start = query.start_date.to_string();
        let end = query.end_date.to_string();
        let request = self.request(Method::GET, &["calendars", query.calendar_id.as_str(), "free-slots"]).query(&[
            ("startDate", start.as_str()),
            ("endDate", end.as_str()),
            ("timezone", query.timezone.as_str()),
        ]);
        let value: Value = http::send_json(SERVICE, request).await?;
        let slots = response::free_slots(&value);
        tracing::debug!(calendar_id = %query.calendar_id, count = slots.len(), "ghl free slots");
        Ok(SlotsResponse { slots })
    }
}
