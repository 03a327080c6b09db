//! Database module: local persistence of the auth session between launches.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows and conversions
//! - `schema.rs`: SQL DDL for initializing the database (SQLite-first)
//! - `sqlite.rs`: `SessionStorage`, the pool-backed store

pub mod models;
pub mod schema;
pub mod sqlite;

pub use models::DbSession;
pub use schema::SQLITE_INIT;
pub use sqlite::{SessionStorage, SqlitePool};
