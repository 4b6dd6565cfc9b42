//! Read-through cache over the prompt service.
//!
//! Only prompts the service actually returned are cached. A fallback
//! (version 0) is served but not stored, so a recovered service is picked up
//! on the next lookup.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::keys::prompt_key;
use crate::source::{Prompt, PromptSource};
use crate::store::Cache;

pub const DEFAULT_PROMPT_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct CachedPrompts {
    source: Arc<dyn PromptSource>,
    cache: Cache,
    ttl: Duration,
}

impl CachedPrompts {
    pub fn new(source: Arc<dyn PromptSource>, cache: Cache) -> Self {
        Self { source, cache, ttl: DEFAULT_PROMPT_TTL }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub async fn invalidate(&self, name: &str) {
        if self.cache.delete(&prompt_key(name)).await {
            tracing::info!(name, "prompt cache invalidated");
        }
    }
}

#[async_trait]
impl PromptSource for CachedPrompts {
    async fn get_prompt(&self, name: &str, fallback: &str) -> Prompt {
        let key = prompt_key(name);
        if let Some(cached) = self.cache.get_json::<Prompt>(&key).await {
            tracing::debug!(name, version = cached.version, "prompt cache hit");
            return cached;
        }

        let prompt = self.source.get_prompt(name, fallback).await;
        if prompt.version > 0 {
            self.cache.set_json(&key, &prompt, self.ttl).await;
        }
        prompt
    }
}
