//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (CALLCTX_*)
//! 2. TOML config file (if CALLCTX_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::context::AssemblySettings;

mod validation;

pub use validation::ConfigError;

/// Where cache entries live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// `cache_entries` table in the SQLite database. Survives restarts.
    #[default]
    Sqlite,
    /// In-process map. Lost on restart.
    Memory,
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (CALLCTX_*)
/// 2. TOML config file (if CALLCTX_CONFIG_FILE set)
/// 3. Built-in defaults
///
/// Every upstream is optional. An unconfigured upstream degrades the fields
/// it feeds to their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Zep memory service API key. Set via CALLCTX_ZEP_API_KEY.
    #[serde(default)]
    pub zep_api_key: Option<String>,

    #[serde(default = "default_zep_api_url")]
    pub zep_api_url: String,

    /// GoHighLevel private integration token. Set via CALLCTX_GHL_API_KEY.
    #[serde(default)]
    pub ghl_api_key: Option<String>,

    #[serde(default)]
    pub ghl_location_id: Option<String>,

    /// Calendar offered to callers. Without it no availability is looked up.
    #[serde(default)]
    pub ghl_calendar_id: Option<String>,

    /// IANA timezone passed to the calendar API.
    #[serde(default = "default_timezone")]
    pub ghl_timezone: String,

    #[serde(default = "default_ghl_api_url")]
    pub ghl_api_url: String,

    #[serde(default)]
    pub langfuse_public_key: Option<String>,

    #[serde(default)]
    pub langfuse_secret_key: Option<String>,

    #[serde(default = "default_langfuse_base_url")]
    pub langfuse_base_url: String,

    /// Path to the SQLite database holding records and (by default) the cache.
    ///
    /// Set via CALLCTX_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub cache_backend: CacheBackend,

    #[serde(default = "default_memory_ttl_secs")]
    pub memory_ttl_secs: u64,

    #[serde(default = "default_slots_ttl_secs")]
    pub slots_ttl_secs: u64,

    #[serde(default = "default_context_ttl_secs")]
    pub context_ttl_secs: u64,

    /// How long a fetched prompt is reused before asking Langfuse again.
    #[serde(default = "default_prompt_ttl_secs")]
    pub prompt_ttl_secs: u64,

    /// Period of the server's sweep over expired cache entries.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,

    /// Upstream HTTP request timeout in milliseconds.
    ///
    /// Set via CALLCTX_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Days of availability offered to a caller.
    #[serde(default = "default_availability_days")]
    pub availability_days: u32,

    /// Slots included in an assembled context.
    #[serde(default = "default_max_slots")]
    pub max_slots: usize,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_zep_api_url() -> String {
    "https://api.getzep.com".into()
}

fn default_ghl_api_url() -> String {
    "https://services.leadconnectorhq.com".into()
}

fn default_langfuse_base_url() -> String {
    "https://cloud.langfuse.com".into()
}

fn default_timezone() -> String {
    "America/New_York".into()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./callctx.sqlite")
}

fn default_memory_ttl_secs() -> u64 {
    300
}

fn default_slots_ttl_secs() -> u64 {
    180
}

fn default_context_ttl_secs() -> u64 {
    300
}

fn default_prompt_ttl_secs() -> u64 {
    300
}

fn default_purge_interval_secs() -> u64 {
    300
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_availability_days() -> u32 {
    7
}

fn default_max_slots() -> usize {
    5
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            zep_api_key: None,
            zep_api_url: default_zep_api_url(),
            ghl_api_key: None,
            ghl_location_id: None,
            ghl_calendar_id: None,
            ghl_timezone: default_timezone(),
            ghl_api_url: default_ghl_api_url(),
            langfuse_public_key: None,
            langfuse_secret_key: None,
            langfuse_base_url: default_langfuse_base_url(),
            db_path: default_db_path(),
            cache_backend: CacheBackend::default(),
            memory_ttl_secs: default_memory_ttl_secs(),
            slots_ttl_secs: default_slots_ttl_secs(),
            context_ttl_secs: default_context_ttl_secs(),
            prompt_ttl_secs: default_prompt_ttl_secs(),
            purge_interval_secs: default_purge_interval_secs(),
            timeout_ms: default_timeout_ms(),
            availability_days: default_availability_days(),
            max_slots: default_max_slots(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn memory_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_ttl_secs)
    }

    pub fn slots_ttl(&self) -> Duration {
        Duration::from_secs(self.slots_ttl_secs)
    }

    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_secs)
    }

    pub fn prompt_ttl(&self) -> Duration {
        Duration::from_secs(self.prompt_ttl_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn zep_configured(&self) -> bool {
        self.zep_api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// GHL needs both the token and the location.
    pub fn ghl_configured(&self) -> bool {
        self.ghl_api_key.as_deref().is_some_and(|k| !k.is_empty())
            && self.ghl_location_id.as_deref().is_some_and(|l| !l.is_empty())
    }

    pub fn langfuse_configured(&self) -> bool {
        self.langfuse_public_key.as_deref().is_some_and(|k| !k.is_empty())
            && self.langfuse_secret_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    pub fn assembly_settings(&self) -> AssemblySettings {
        AssemblySettings {
            calendar_id: self.ghl_calendar_id.clone().filter(|c| !c.is_empty()),
            timezone: self.ghl_timezone.clone(),
            availability_days: self.availability_days,
            max_slots: self.max_slots,
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `CALLCTX_`
    /// 2. TOML file from `CALLCTX_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("CALLCTX_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("CALLCTX_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        Self::from_figment(figment)
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// GHL credentials, for operations that cannot degrade without them.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the token or location is not set.
    pub fn require_ghl(&self) -> Result<(&str, &str), ConfigError> {
        let key = self.ghl_api_key.as_deref().filter(|k| !k.is_empty()).ok_or_else(|| ConfigError::Missing {
            field: "ghl_api_key".into(),
            hint: "Set CALLCTX_GHL_API_KEY environment variable".into(),
        })?;
        let location = self.ghl_location_id.as_deref().filter(|l| !l.is_empty()).ok_or_else(|| {
            ConfigError::Missing {
                field: "ghl_location_id".into(),
                hint: "Set CALLCTX_GHL_LOCATION_ID environment variable".into(),
            }
        })?;
        Ok((key, location))
    }
}
