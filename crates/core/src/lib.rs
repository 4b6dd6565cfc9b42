//! Core types and shared functionality for callctx.
//!
//! This crate provides:
//! - Cache stores (in-process and SQLite) with per-key TTL
//! - Read-through caches over caller memory and calendar availability
//! - Context assembly for inbound calls, with deferred background work
//! - Persistent call, contact, appointment and metrics records
//! - Unified error types and configuration

pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod identity;
pub mod records;
pub mod source;
pub mod store;
pub mod tasks;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{AppConfig, CacheBackend, ConfigError};
pub use context::{CallRequest, ContextAssembler, ContextPayload};
pub use db::Database;
pub use error::Error;
pub use identity::IdentityKey;
pub use tasks::{BackgroundTask, Deferred, TaskKind, TaskRunner};
