//! SQL DDL for the session store.

/// One row per storage key; the client normally uses a single key.
/// Timestamps are stored as RFC3339 text.
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS auth_sessions (
    storage_key TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    email TEXT NULL,
    access_token TEXT NOT NULL,
    refresh_token TEXT NULL,
    expires_at TEXT NULL,
    updated_at TEXT NOT NULL
);
"#;
