//! Appointment tools called by the voice agent mid-call.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use callctx_core::Deferred;
use callctx_core::context::{AvailabilityRequest, BookRequest};
use callctx_core::source::SlotsResponse;

use crate::error::ApiError;
use crate::handler::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RescheduleBody {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub new_start_time: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
    #[serde(default)]
    pub event_id: String,
}

/// POST /appointments/book
pub async fn book(
    State(state): State<AppState>, body: Result<Json<BookRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = body?;
    let mut deferred = Deferred::new();
    let appointment = state.assembler.book(&request, &mut deferred).await?;
    state.submit(deferred);
    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked successfully",
    })))
}

/// POST /appointments/reschedule
pub async fn reschedule(
    State(state): State<AppState>, body: Result<Json<RescheduleBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let mut deferred = Deferred::new();
    let appointment = state
        .assembler
        .reschedule(&body.event_id, &body.new_start_time, &mut deferred)
        .await?;
    state.submit(deferred);
    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment rescheduled successfully",
    })))
}

/// POST /appointments/cancel
pub async fn cancel(
    State(state): State<AppState>, body: Result<Json<CancelBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let mut deferred = Deferred::new();
    state.assembler.cancel(&body.event_id, &mut deferred).await?;
    state.submit(deferred);
    Ok(Json(json!({
        "success": true,
        "event_id": body.event_id,
        "message": "Appointment cancelled successfully",
    })))
}

/// GET /appointments/availability?calendar_id&start_date&end_date&timezone
pub async fn availability(
    State(state): State<AppState>, query: Result<Query<AvailabilityRequest>, QueryRejection>,
) -> Result<Json<SlotsResponse>, ApiError> {
    let Query(request) = query?;
    Ok(Json(state.assembler.availability(&request).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::handler::test_support::TestApp;

    #[tokio::test]
    async fn test_book_appointment() {
        let app = TestApp::new();
        let (status, body) = app
            .post(
                "/appointments/book",
                json!({
                    "contact_id": "contact-1",
                    "slot_time": "2024-01-16T10:00:00Z",
                    "customer_phone": "+15551234567"
                }),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["appointment"]["id"], "evt-1");

        app.settle().await;
        let bookings = app.crm.bookings();
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].calendar_id, "cal-1");
        assert_eq!(bookings[0].title, "Phone Appointment");
        assert_eq!(app.records.appointments().len(), 1);
    }

    #[tokio::test]
    async fn test_book_without_slot_is_rejected() {
        let app = TestApp::new();
        let (status, body) = app.post("/appointments/book", json!({ "contact_id": "contact-1" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("slot_time"));
        assert!(app.crm.bookings().is_empty());
    }

    #[tokio::test]
    async fn test_reschedule_and_cancel() {
        let app = TestApp::new();
        let (status, body) = app
            .post("/appointments/reschedule", json!({ "event_id": "evt-9", "new_start_time": "2024-01-17T10:00:00Z" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["appointment"]["id"], "evt-9");

        let (status, body) = app.post("/appointments/cancel", json!({ "event_id": "evt-9" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["event_id"], "evt-9");

        app.settle().await;
        assert_eq!(app.crm.cancelled(), vec!["evt-9".to_string()]);
        assert_eq!(app.records.appointment_updates().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_without_id_is_rejected() {
        let app = TestApp::new();
        let (status, _) = app.post("/appointments/cancel", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_availability_reads_through_cache() {
        let app = TestApp::new();
        let uri = "/appointments/availability?start_date=2024-01-15&end_date=2024-01-20";
        let (status, body) = app.get(uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["slots"], json!(["2024-01-15T14:00:00Z"]));

        app.get(uri).await;
        assert_eq!(app.slots.calls(), 1);
    }

    #[tokio::test]
    async fn test_availability_rejects_bad_date() {
        let app = TestApp::new();
        let (status, _) = app.get("/appointments/availability?start_date=tomorrow").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
