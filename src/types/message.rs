use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Customer-service chat message (`messages` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportMessage {
    pub id: String,
    pub sender: String,
    #[serde(default)]
    pub recipient: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
