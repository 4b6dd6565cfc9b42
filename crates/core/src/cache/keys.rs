//! Cache key composition.
//!
//! Keys are `namespace:field:field...` so a whole family can be dropped with
//! a prefix scan.

use crate::identity::IdentityKey;
use crate::source::SlotQuery;

pub const MEMORY_NAMESPACE: &str = "memory";
pub const SLOTS_NAMESPACE: &str = "slots";
pub const CONTEXT_NAMESPACE: &str = "context";
pub const PROMPT_NAMESPACE: &str = "prompt";

pub fn memory_key(identity: &IdentityKey) -> String {
    format!("{MEMORY_NAMESPACE}:{identity}")
}

/// Key for one availability window of one calendar.
pub fn slots_key(query: &SlotQuery) -> String {
    format!(
        "{}{}:{}:{}",
        slots_prefix(&query.calendar_id),
        query.start_date,
        query.end_date,
        query.timezone
    )
}

/// Prefix shared by every cached window of `calendar_id`.
pub fn slots_prefix(calendar_id: &str) -> String {
    format!("{SLOTS_NAMESPACE}:{calendar_id}:")
}

pub fn context_key(identity: &IdentityKey) -> String {
    format!("{CONTEXT_NAMESPACE}:{identity}")
}

pub fn prompt_key(name: &str) -> String {
    format!("{PROMPT_NAMESPACE}:{name}")
}
