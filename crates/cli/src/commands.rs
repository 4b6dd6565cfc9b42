use anyhow::Result;
use chrono::NaiveDate;
use clap::Subcommand;
use serde_json::{Value, json};

use callctx_client::Services;
use callctx_core::records::RecordStore;
use callctx_core::{CallRequest, Deferred, IdentityKey};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Assemble the context an inbound call from PHONE would receive
    Context {
        phone: String,
        /// Bypass every cache and store the rebuilt context
        #[arg(long)]
        force: bool,
    },
    /// Drop cached entries
    Invalidate {
        #[command(subcommand)]
        target: InvalidateTarget,
    },
    /// Delete expired entries from the cache backend
    PurgeExpired,
    /// List the most recent calls logged for PHONE, newest first
    History {
        phone: String,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Show call and booking counts for a day (YYYY-MM-DD)
    Metrics { date: NaiveDate },
}

#[derive(Debug, Subcommand)]
pub enum InvalidateTarget {
    /// Full assembled context for a caller
    Context { phone: String },
    /// Cached memory for a caller
    Memory { phone: String },
    /// Every cached availability window for a calendar
    Slots { calendar_id: String },
}

impl Command {
    pub async fn execute(self, services: &Services) -> Result<Value> {
        let assembler = &services.assembler;
        match self {
            Command::Context { phone, force: true } => {
                let identity = IdentityKey::normalize(&phone)?;
                let payload = assembler.refresh(&identity, None).await;
                Ok(json!(payload))
            }
            Command::Context { phone, force: false } => {
                let mut deferred = Deferred::new();
                let payload = assembler.assemble(&CallRequest::new(phone), &mut deferred).await?;
                let failed = deferred.run_inline().await;
                if failed > 0 {
                    tracing::warn!(failed, "background tasks failed");
                }
                Ok(json!(payload))
            }
            Command::Invalidate { target: InvalidateTarget::Context { phone } } => {
                let identity = IdentityKey::normalize(&phone)?;
                assembler.contexts().invalidate_context(&identity).await;
                Ok(json!({ "invalidated": format!("context:{identity}") }))
            }
            Command::Invalidate { target: InvalidateTarget::Memory { phone } } => {
                let identity = IdentityKey::normalize(&phone)?;
                let Some(memory) = assembler.memory() else {
                    anyhow::bail!("memory service is not configured");
                };
                memory.invalidate(&identity).await;
                Ok(json!({ "invalidated": format!("memory:{identity}") }))
            }
            Command::Invalidate { target: InvalidateTarget::Slots { calendar_id } } => {
                let Some(slots) = assembler.slots() else {
                    anyhow::bail!("calendar service is not configured");
                };
                let removed = slots.invalidate(&calendar_id).await;
                Ok(json!({ "calendar_id": calendar_id, "removed": removed }))
            }
            Command::PurgeExpired => {
                let removed = services.purge_expired().await?;
                Ok(json!({ "removed": removed }))
            }
            Command::History { phone, limit } => {
                let identity = IdentityKey::normalize(&phone)?;
                let calls = services.records.recent_calls(&identity, limit).await?;
                Ok(json!({ "phone": identity.as_str(), "calls": calls }))
            }
            Command::Metrics { date } => {
                let metrics = services.records.daily_metrics(date).await?;
                Ok(json!({ "date": date, "metrics": metrics }))
            }
        }
    }
}
