//! Upstream clients and service wiring for callctx.
//!
//! This crate provides HTTP implementations of the core source traits
//! (Zep memory, GoHighLevel calendar and CRM, Langfuse prompts and traces) and the
//! [`bootstrap::Services`] container shared by the server and CLI.

pub mod bootstrap;
pub mod error;
pub mod ghl;
mod http;
pub mod langfuse;
pub mod zep;

pub use bootstrap::{Integrations, Services};
pub use callctx_core::source::{NoopTraces, StaticPrompts};
pub use error::UpstreamError;
pub use ghl::{GhlClient, GhlConfig};
pub use langfuse::{LangfuseClient, LangfuseConfig};
pub use zep::{ZepClient, ZepConfig};
