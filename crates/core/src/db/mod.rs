//! SQLite storage shared by the cache store and the record store.

pub mod connection;
pub mod migrations;

pub use connection::Database;
