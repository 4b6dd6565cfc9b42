//! Langfuse prompt management and tracing client.
//!
//! Both halves use basic auth (public key as user, secret key as password).
//!
//! - **Prompts**: fetched by name from `GET /api/public/v2/prompts/{name}`.
//!   Lookups never fail: any error logs a warning and yields the caller's
//!   fallback text at version 0.
//! - **Traces**: one `trace-create` event per inbound call, plus a
//!   `generation-create` event for the prompt it was handed, sent as a
//!   single batch to `POST /api/public/ingestion`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use callctx_core::source::{CallTrace, Prompt, PromptSource, TraceSink};

use crate::error::UpstreamError;
use crate::http;

const SERVICE: &str = "langfuse";

/// Default base URL for Langfuse cloud.
pub const DEFAULT_BASE_URL: &str = "https://cloud.langfuse.com";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct LangfuseConfig {
    pub public_key: String,
    pub secret_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for LangfuseConfig {
    fn default() -> Self {
        Self {
            public_key: String::new(),
            secret_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PromptResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: u32,
    prompt: Value,
}

impl PromptResponse {
    /// Text prompts are a string; chat prompts are a list of messages whose
    /// contents are joined by newlines.
    fn text(&self) -> Option<String> {
        match &self.prompt {
            Value::String(text) => Some(text.clone()),
            Value::Array(messages) => {
                let parts: Vec<&str> = messages
                    .iter()
                    .filter_map(|m| m.get("content").and_then(Value::as_str))
                    .collect();
                (!parts.is_empty()).then(|| parts.join("\n"))
            }
            _ => None,
        }
    }
}

/// Ingestion answers 207 with per-event outcomes.
#[derive(Debug, Default, Deserialize)]
struct IngestionResponse {
    #[serde(default)]
    errors: Vec<IngestionError>,
}

#[derive(Debug, Deserialize)]
struct IngestionError {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: u16,
    #[serde(default)]
    message: Option<String>,
}

/// Ingestion batch for one call trace.
fn ingestion_batch(trace: &CallTrace) -> Value {
    let timestamp = trace.timestamp.to_rfc3339();
    let mut batch = vec![json!({
        "id": format!("{}-trace", trace.id),
        "type": "trace-create",
        "timestamp": timestamp,
        "body": {
            "id": trace.id,
            "name": trace.name,
            "userId": trace.user_id,
            "sessionId": trace.session_id,
            "metadata": trace.metadata,
            "timestamp": timestamp,
        },
    })];

    if let Some(generation) = &trace.generation {
        batch.push(json!({
            "id": format!("{}-generation", trace.id),
            "type": "generation-create",
            "timestamp": timestamp,
            "body": {
                "id": format!("{}-prompt", trace.id),
                "traceId": trace.id,
                "name": format!("prompt-{}", generation.prompt_name),
                "startTime": timestamp,
                "input": generation.prompt,
                "promptName": generation.prompt_name,
                "promptVersion": generation.prompt_version,
                "metadata": {
                    "prompt_name": generation.prompt_name,
                    "prompt_version": generation.prompt_version,
                },
            },
        }));
    }

    json!({ "batch": batch })
}

#[derive(Debug, Clone)]
pub struct LangfuseClient {
    http: reqwest::Client,
    base: Url,
    public_key: String,
    secret_key: String,
}

impl LangfuseClient {
    pub fn new(config: LangfuseConfig) -> Result<Self, UpstreamError> {
        if config.public_key.is_empty() || config.secret_key.is_empty() {
            return Err(UpstreamError::MissingCredentials("langfuse key pair"));
        }
        let base = http::parse_base_url(&config.base_url)?;
        let http = http::build_client(SERVICE, config.timeout)?;
        Ok(Self { http, base, public_key: config.public_key, secret_key: config.secret_key })
    }

    /// Fetch the current production version of a prompt.
    pub async fn fetch(&self, name: &str) -> Result<Prompt, UpstreamError> {
        let request = self
            .http
            .get(http::endpoint(&self.base, &["api", "public", "v2", "prompts", name]))
            .basic_auth(&self.public_key, Some(&self.secret_key));
        let response: PromptResponse = http::send_json(SERVICE, request).await?;
        let text = response
            .text()
            .ok_or_else(|| UpstreamError::parse(SERVICE, "prompt body is neither text nor chat"))?;
        Ok(Prompt { name: response.name.unwrap_or_else(|| name.to_string()), text, version: response.version })
    }

    /// Send one call trace, and its prompt generation if any.
    pub async fn ingest(&self, trace: &CallTrace) -> Result<(), UpstreamError> {
        let request = self
            .http
            .post(http::endpoint(&self.base, &["api", "public", "ingestion"]))
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .json(&ingestion_batch(trace));
        let response: IngestionResponse = http::send_json(SERVICE, request).await?;

        if let Some(first) = response.errors.first() {
            tracing::error!(
                trace_id = %trace.id,
                event_id = %first.id,
                status = first.status,
                message = first.message.as_deref(),
                rejected = response.errors.len(),
                "langfuse rejected trace events"
            );
            return Err(UpstreamError::Http { service: SERVICE, status: first.status });
        }
        tracing::debug!(trace_id = %trace.id, "trace sent to langfuse");
        Ok(())
    }
}

#[async_trait]
impl TraceSink for LangfuseClient {
    async fn record_call(&self, trace: &CallTrace) -> Result<(), callctx_core::Error> {
        Ok(self.ingest(trace).await?)
    }
}

#[async_trait]
impl PromptSource for LangfuseClient {
    async fn get_prompt(&self, name: &str, fallback: &str) -> Prompt {
        match self.fetch(name).await {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::warn!(name, error = %e, "prompt fetch failed, using fallback");
                Prompt::fallback(name, fallback)
            }
        }
    }
}
