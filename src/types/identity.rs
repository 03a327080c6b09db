use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The authenticated principal as seen by the rest of the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
}

/// Backend-issued credential bound to one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: Identity,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::zero())
    }

    /// True when the token expires before `now + margin`. Sessions without
    /// an expiry never expire locally.
    pub fn expires_within(&self, margin: Duration) -> bool {
        match self.expires_at {
            Some(at) => Utc::now() + margin >= at,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthChangeKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// A session transition pushed by the identity service.
///
/// `generation` increases by one for every transition the service performs,
/// so consumers can tell a late duplicate from a newer change.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthEvent {
    pub generation: u64,
    pub kind: AuthChangeKind,
    pub session: Option<Session>,
}

/// Result of a password sign-up or sign-in.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthResponse {
    pub user: Identity,
    pub session: Option<Session>,
    pub generation: u64,
}
