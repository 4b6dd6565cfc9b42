//! Retell voice-agent webhooks.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use callctx_core::context::CallEndedEvent;
use callctx_core::{CallRequest, Deferred};

use crate::error::ApiError;
use crate::handler::AppState;

/// Inbound call webhook body. Retell sends the caller as `from_number`;
/// older agents used `customer_number`.
#[derive(Debug, Default, Deserialize)]
pub struct InboundWebhook {
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub from_number: Option<String>,
    #[serde(default)]
    pub customer_number: Option<String>,
    #[serde(default)]
    pub to_number: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallEndedWebhook {
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub from_number: Option<String>,
    #[serde(default)]
    pub customer_number: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub disconnection_reason: Option<String>,
}

fn caller(from_number: Option<String>, customer_number: Option<String>) -> Option<String> {
    from_number
        .filter(|n| !n.trim().is_empty())
        .or(customer_number.filter(|n| !n.trim().is_empty()))
}

/// POST /retell/inbound - assemble the caller's context as dynamic variables.
pub async fn inbound(
    State(state): State<AppState>, body: Result<Json<InboundWebhook>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let Some(customer_phone) = caller(body.from_number, body.customer_number) else {
        return Err(ApiError::BadRequest("Missing from_number or customer_number".into()));
    };
    tracing::info!(call_id = ?body.call_id, "inbound call");

    let request = CallRequest {
        call_id: body.call_id,
        customer_phone,
        to_number: body.to_number,
        metadata: body.metadata.unwrap_or_default(),
    };
    let mut deferred = Deferred::new();
    let payload = state.assembler.assemble(&request, &mut deferred).await?;

    let response = json!({ "dynamic_variables": payload });
    state.submit(deferred);
    Ok(Json(response))
}

/// POST /retell/call-ended - queue transcript storage and the call record.
pub async fn call_ended(
    State(state): State<AppState>, body: Result<Json<CallEndedWebhook>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let Some(call_id) = body.call_id.filter(|id| !id.trim().is_empty()) else {
        return Err(ApiError::BadRequest("Missing required field: call_id".into()));
    };
    tracing::info!(%call_id, "call ended");

    let event = CallEndedEvent {
        call_id,
        customer_phone: caller(body.from_number, body.customer_number),
        transcript: body.transcript,
        duration_seconds: body.duration_seconds,
        outcome: body.disconnection_reason,
    };
    let mut deferred = Deferred::new();
    state.assembler.call_ended(&event, &mut deferred);
    state.submit(deferred);

    Ok(Json(json!({ "status": "success", "message": "Call ended processed" })))
}
