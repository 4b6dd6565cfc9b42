//! Zep memory service client.
//!
//! ### Endpoints
//!
//! - `GET  /api/v2/users/{user_id}`: user record; long-term facts live under
//!   `metadata.facts`. A 404 means the caller has never been seen.
//! - `GET  /api/v2/sessions/{session_id}/memory`: optional per-call memory.
//! - `POST /api/v2/sessions` and `POST /api/v2/sessions/{id}/messages`: store
//!   a finished call's transcript.
//!
//! Authentication is a bearer token.

mod response;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::{Value, json};
use url::Url;

use callctx_core::IdentityKey;
use callctx_core::source::{MemorySnapshot, MemorySource};

use crate::error::UpstreamError;
use crate::http;

use response::ZepUser;

const SERVICE: &str = "zep";

/// Default base URL for the Zep API.
pub const DEFAULT_BASE_URL: &str = "https://api.getzep.com";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Zep client configuration.
#[derive(Debug, Clone)]
pub struct ZepConfig {
    pub api_key: String,
    /// Base URL (default: https://api.getzep.com).
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ZepConfig {
    fn default() -> Self {
        Self { api_key: String::new(), base_url: DEFAULT_BASE_URL.to_string(), timeout: DEFAULT_TIMEOUT }
    }
}

#[derive(Debug, Clone)]
pub struct ZepClient {
    http: reqwest::Client,
    base: Url,
    api_key: String,
}

impl ZepClient {
    /// Create a new Zep client with the given configuration.
    pub fn new(config: ZepConfig) -> Result<Self, UpstreamError> {
        if config.api_key.is_empty() {
            return Err(UpstreamError::MissingCredentials("zep api key"));
        }
        let base = http::parse_base_url(&config.base_url)?;
        let http = http::build_client(SERVICE, config.timeout)?;
        Ok(Self { http, base, api_key: config.api_key })
    }

    fn get(&self, segments: &[&str]) -> reqwest::RequestBuilder {
        self.http.get(http::endpoint(&self.base, segments)).bearer_auth(&self.api_key)
    }

    fn post(&self, segments: &[&str]) -> reqwest::RequestBuilder {
        self.http.post(http::endpoint(&self.base, segments)).bearer_auth(&self.api_key)
    }

    /// Fetch a user, `None` if Zep does not know them.
    pub async fn user(&self, user_id: &str) -> Result<Option<ZepUser>, UpstreamError> {
        let response = http::send(SERVICE, self.get(&["api", "v2", "users", user_id])).await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::info!(user_id, "user not found in zep, returning empty memory");
            return Ok(None);
        }
        let response = http::check(SERVICE, response).await?;
        Ok(Some(http::read_json(SERVICE, response).await?))
    }

    /// Per-session memory. Best effort: any failure reads as no memory.
    pub async fn session_memory(&self, session_id: &str) -> Option<Value> {
        let request = self.get(&["api", "v2", "sessions", session_id, "memory"]);
        let response = match http::send(SERVICE, request).await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::debug!(session_id, status = response.status().as_u16(), "no session memory");
                return None;
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "session memory fetch failed");
                return None;
            }
        };
        http::read_json(SERVICE, response).await.ok()
    }

    async fn ensure_session(&self, user_id: &str, session_id: &str) -> Result<(), UpstreamError> {
        let body = json!({
            "session_id": session_id,
            "user_id": user_id,
            "metadata": { "call_type": "inbound", "timestamp": Utc::now().to_rfc3339() },
        });
        let response = http::send(SERVICE, self.post(&["api", "v2", "sessions"]).json(&body)).await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        http::check(SERVICE, response).await.map(|_| ())
    }
}

#[async_trait]
impl MemorySource for ZepClient {
    async fn get_memory(
        &self, identity: &IdentityKey, session: Option<&str>,
    ) -> Result<MemorySnapshot, callctx_core::Error> {
        let Some(user) = self.user(identity.as_str()).await? else {
            return Ok(MemorySnapshot::empty(identity.as_str()));
        };

        let session_memory = match session {
            Some(session_id) => self.session_memory(session_id).await,
            None => None,
        };

        tracing::info!(%identity, facts = user.facts().len(), "zep memory retrieved");
        Ok(MemorySnapshot {
            user_id: identity.as_str().to_string(),
            facts: user.facts(),
            session_memory,
            user_metadata: user.metadata,
        })
    }

    async fn store_transcript(
        &self, identity: &IdentityKey, session: &str, transcript: &str,
    ) -> Result<(), callctx_core::Error> {
        self.ensure_session(identity.as_str(), session).await?;

        let body = json!({
            "messages": [{
                "role": "assistant",
                "content": transcript,
                "metadata": { "source": "retell_transcript" },
            }]
        });
        let response = http::send(SERVICE, self.post(&["api", "v2", "sessions", session, "messages"]).json(&body)).await?;
        http::check(SERVICE, response).await?;
        Ok(())
    }
}
