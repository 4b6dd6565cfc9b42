//! Router and shared state.
//!
//! Each request gets its own [`Deferred`](callctx_core::Deferred) queue.
//! Handlers build the response first, then hand the queue to the
//! [`TaskRunner`] so background work never delays the reply.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use callctx_client::{Integrations, Services};
use callctx_core::{ContextAssembler, Deferred, TaskRunner};

use crate::routes::{appointments, health, retell};

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub assembler: ContextAssembler,
    pub runner: Arc<TaskRunner>,
    pub integrations: Integrations,
}

impl AppState {
    pub fn new(assembler: ContextAssembler, runner: Arc<TaskRunner>, integrations: Integrations) -> Self {
        Self { assembler, runner, integrations }
    }

    pub fn from_services(services: &Services, runner: Arc<TaskRunner>) -> Self {
        Self::new(services.assembler.clone(), runner, services.integrations())
    }

    /// Queue a request's background work.
    pub fn submit(&self, deferred: Deferred) {
        if deferred.is_empty() {
            return;
        }
        let accepted = self.runner.submit(deferred);
        tracing::debug!(accepted, "queued background tasks");
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/retell/inbound", post(retell::inbound))
        .route("/retell/call-ended", post(retell::call_ended))
        .route("/appointments/book", post(appointments::book))
        .route("/appointments/reschedule", post(appointments::reschedule))
        .route("/appointments/cancel", post(appointments::cancel))
        .route("/appointments/availability", get(appointments::availability))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
