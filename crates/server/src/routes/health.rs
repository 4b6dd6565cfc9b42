//! Liveness endpoints.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde_json::{Value, json};

use crate::handler::AppState;

const SERVICE_NAME: &str = "callctx";

/// GET / - status plus which integrations are wired.
pub async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "integrations": state.integrations,
    }))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "zep_configured": state.integrations.zep,
        "ghl_configured": state.integrations.ghl,
        "langfuse_configured": state.integrations.langfuse,
    }))
}
