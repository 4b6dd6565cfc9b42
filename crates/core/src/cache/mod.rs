//! Caching layers over the upstream collaborators.
//!
//! - [`CachedMemory`] and [`CachedSlots`] are read-through wrappers: hit the
//!   store first, fall back to the upstream and populate on a miss.
//! - [`CachedPrompts`] keeps fetched prompts so assembly does not pay a
//!   prompt-service round trip per call.
//! - [`ContextCache`] memoizes the whole assembled payload per caller.
//!
//! All of them share one [`Cache`](crate::store::Cache) and its fault policy.

pub mod context;
pub mod keys;
pub mod memory;
pub mod prompts;
pub mod slots;

pub use context::{ContextCache, DEFAULT_CONTEXT_TTL};
pub use memory::{CachedMemory, DEFAULT_MEMORY_TTL};
pub use prompts::{CachedPrompts, DEFAULT_PROMPT_TTL};
pub use slots::{CachedSlots, DEFAULT_SLOTS_TTL};
