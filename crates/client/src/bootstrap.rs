//! Service wiring from configuration.
//!
//! [`Services::from_config`] opens the database (running migrations),
//! chooses the cache backend, and constructs an upstream client only for
//! the integrations whose credentials are present. Missing integrations are
//! not errors; the assembler degrades the matching payload fields, and
//! prompts and traces fall back to their static and no-op versions.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use callctx_core::cache::{CachedMemory, CachedPrompts, CachedSlots, ContextCache};
use callctx_core::records::{RecordStore, SqliteRecords};
use callctx_core::source::{NoopTraces, PromptSource, StaticPrompts, TraceSink};
use callctx_core::store::{Cache, CacheStore, MemoryStore, SqliteStore};
use callctx_core::{AppConfig, CacheBackend, ContextAssembler, Database, Error};

use crate::ghl::{GhlClient, GhlConfig};
use crate::langfuse::{LangfuseClient, LangfuseConfig};
use crate::zep::{ZepClient, ZepConfig};

/// Which upstream integrations are live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Integrations {
    pub zep: bool,
    pub ghl: bool,
    pub langfuse: bool,
}

/// Everything a binary needs, built once at startup.
#[derive(Debug, Clone)]
pub struct Services {
    pub config: Arc<AppConfig>,
    pub db: Database,
    pub cache: Cache,
    pub records: SqliteRecords,
    pub assembler: ContextAssembler,
    integrations: Integrations,
}

impl Services {
    pub async fn from_config(config: AppConfig) -> Result<Self, Error> {
        let db = Database::open(&config.db_path).await?;
        Self::with_database(config, db)
    }

    /// Wire services over an already opened database.
    pub fn with_database(config: AppConfig, db: Database) -> Result<Self, Error> {
        let store: Arc<dyn CacheStore> = match config.cache_backend {
            CacheBackend::Sqlite => Arc::new(SqliteStore::new(db.clone())),
            CacheBackend::Memory => Arc::new(MemoryStore::default()),
        };
        let cache = Cache::new(store);
        let records = SqliteRecords::new(db.clone());

        let langfuse_keys = (
            config.langfuse_public_key.as_ref().filter(|k| !k.is_empty()),
            config.langfuse_secret_key.as_ref().filter(|k| !k.is_empty()),
        );
        let (prompts, traces): (Arc<dyn PromptSource>, Arc<dyn TraceSink>) = match langfuse_keys {
            (Some(public_key), Some(secret_key)) => {
                let langfuse = Arc::new(
                    LangfuseClient::new(LangfuseConfig {
                        public_key: public_key.clone(),
                        secret_key: secret_key.clone(),
                        base_url: config.langfuse_base_url.clone(),
                        timeout: config.timeout(),
                    })
                    .map_err(Error::from)?,
                );
                let prompts = CachedPrompts::new(langfuse.clone(), cache.clone()).with_ttl(config.prompt_ttl());
                (Arc::new(prompts) as Arc<dyn PromptSource>, langfuse as Arc<dyn TraceSink>)
            }
            _ => (Arc::new(StaticPrompts) as Arc<dyn PromptSource>, Arc::new(NoopTraces) as Arc<dyn TraceSink>),
        };

        let contexts = ContextCache::new(cache.clone()).with_ttl(config.context_ttl());
        let mut assembler = ContextAssembler::new(contexts, prompts)
            .with_traces(traces)
            .with_records(Arc::new(records.clone()) as Arc<dyn RecordStore>)
            .with_settings(config.assembly_settings());

        if let Some(api_key) = config.zep_api_key.as_ref().filter(|k| !k.is_empty()) {
            let zep = ZepClient::new(ZepConfig {
                api_key: api_key.clone(),
                base_url: config.zep_api_url.clone(),
                timeout: config.timeout(),
            })
            .map_err(Error::from)?;
            let memory = CachedMemory::new(Arc::new(zep), cache.clone()).with_ttl(config.memory_ttl());
            assembler = assembler.with_memory(memory);
        }

        if let Ok((api_key, location_id)) = config.require_ghl() {
            let ghl = Arc::new(
                GhlClient::new(GhlConfig {
                    api_key: api_key.to_string(),
                    location_id: location_id.to_string(),
                    base_url: config.ghl_api_url.clone(),
                    timeout: config.timeout(),
                })
                .map_err(Error::from)?,
            );
            assembler = assembler
                .with_slots(CachedSlots::new(ghl.clone(), cache.clone()).with_ttl(config.slots_ttl()))
                .with_crm(ghl);
        }

        let integrations = Integrations {
            zep: config.zep_configured(),
            ghl: config.ghl_configured(),
            langfuse: config.langfuse_configured(),
        };
        tracing::info!(
            zep = integrations.zep,
            ghl = integrations.ghl,
            langfuse = integrations.langfuse,
            backend = ?config.cache_backend,
            "services ready"
        );

        Ok(Self { config: Arc::new(config), db, cache, records, assembler, integrations })
    }

    pub fn integrations(&self) -> Integrations {
        self.integrations
    }

    /// Drop expired cache entries from whichever backend is in use.
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        self.cache.purge_expired().await
    }

    /// Sweep expired cache entries every `purge_interval`, starting now.
    /// Abort the handle to stop the sweep.
    pub fn spawn_purge_loop(&self) -> JoinHandle<()> {
        let cache = self.cache.clone();
        let period = self.config.purge_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = cache.purge_expired().await {
                    tracing::warn!(error = %e, "cache purge failed");
                }
            }
        })
    }
}
