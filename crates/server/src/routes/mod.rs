//! HTTP route handlers.

pub mod appointments;
pub mod health;
pub mod retell;
