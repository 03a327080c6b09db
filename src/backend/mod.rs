//! Seams to the hosted identity/database service.
//!
//! - `IdentityService`: password auth, session lookup, auth-change pushes
//! - `RowStore`: generic select/insert/upsert/update over named tables
//! - `memory`: in-process implementation of both, used by tests and offline runs

pub mod memory;
pub mod query;

pub use memory::MemoryBackend;
pub use query::{Direction, RowQuery};

use crate::error::AutoPulseError;
use crate::types::{AuthEvent, AuthResponse, Session};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Create an account. The session is absent when the provider requires
    /// email confirmation first.
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResponse, AutoPulseError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, AutoPulseError>;

    /// Revoke the current session. Local session state is dropped even when
    /// the remote call fails.
    async fn sign_out(&self) -> Result<(), AutoPulseError>;

    /// Current valid session, if any.
    async fn get_session(&self) -> Result<Option<Session>, AutoPulseError>;

    /// Generation stamp of the latest session transition.
    fn generation(&self) -> u64;

    fn subscribe(&self) -> AuthSubscription;
}

#[async_trait]
pub trait RowStore: Send + Sync {
    async fn select(&self, query: &RowQuery) -> Result<Vec<Value>, AutoPulseError>;

    async fn insert(&self, table: &str, row: Value) -> Result<(), AutoPulseError>;

    /// Insert or merge on `on_conflict`.
    async fn upsert(&self, table: &str, row: Value, on_conflict: &str)
    -> Result<(), AutoPulseError>;

    /// Patch every row matching the query's equality filters.
    async fn update(&self, query: &RowQuery, patch: Value) -> Result<(), AutoPulseError>;
}

/// Live subscription to auth-change pushes. Dropping it unsubscribes.
pub struct AuthSubscription {
    rx: broadcast::Receiver<AuthEvent>,
}

impl AuthSubscription {
    pub fn new(rx: broadcast::Receiver<AuthEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the service is gone. Lagged receivers skip
    /// ahead; generation stamps make the gap harmless.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "auth subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
