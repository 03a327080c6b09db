use crate::types::{Identity, Session};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbSession {
    pub storage_key: String,
    pub user_id: String,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DbSession {
    pub fn from_session(storage_key: &str, s: Session) -> Self {
        Self {
            storage_key: storage_key.to_string(),
            user_id: s.user.id,
            email: s.user.email,
            access_token: s.access_token,
            refresh_token: s.refresh_token,
            expires_at: s.expires_at,
            updated_at: Utc::now(),
        }
    }
}

impl From<DbSession> for Session {
    fn from(d: DbSession) -> Self {
        Session {
            access_token: d.access_token,
            refresh_token: d.refresh_token,
            expires_at: d.expires_at,
            user: Identity {
                id: d.user_id,
                email: d.email,
            },
        }
    }
}
