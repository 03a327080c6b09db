use crate::backend::{Direction, RowQuery, RowStore};
use crate::error::{AutoPulseError, ValidationError};
use crate::types::profile::ADMIN_ROLE;
use crate::types::{SupportMessage, TelemetryRow, UserProfile, Vehicle};

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

pub const VEHICLES: &str = "vehicles";
pub const USERS: &str = "users";
pub const TELEMETRY: &str = "telemetry_data";
pub const MESSAGES: &str = "messages";

/// Typed row operations over a `RowStore`.
#[derive(Clone)]
pub struct DataOps {
    store: Arc<dyn RowStore>,
}

impl DataOps {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }

    /// Vehicles owned by `user_id`, newest first.
    pub async fn fetch_vehicles(&self, user_id: &str) -> Result<Vec<Vehicle>, AutoPulseError> {
        let query = RowQuery::from(VEHICLES)
            .eq("user_id", user_id)
            .order("created_at", Direction::Descending);
        self.select_as(&query).await
    }

    pub async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), AutoPulseError> {
        self.store
            .upsert(USERS, serde_json::to_value(profile)?, "id")
            .await
    }

    pub async fn fetch_username(&self, user_id: &str) -> Result<Option<String>, AutoPulseError> {
        let query = RowQuery::from(USERS)
            .select("username")
            .eq("id", user_id)
            .limit(1);
        let rows = self.store.select(&query).await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("username"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Store the trimmed name; a blank name clears it.
    pub async fn update_username(&self, user_id: &str, name: &str) -> Result<(), AutoPulseError> {
        let name = name.trim();
        let username = if name.is_empty() {
            Value::Null
        } else {
            Value::String(name.to_string())
        };
        self.store
            .update(&RowQuery::from(USERS).eq("id", user_id), json!({ "username": username }))
            .await
    }

    /// Newest telemetry row across all vehicles.
    pub async fn latest_telemetry(&self) -> Result<Option<TelemetryRow>, AutoPulseError> {
        let query = RowQuery::from(TELEMETRY)
            .order("timestamp", Direction::Descending)
            .limit(1);
        Ok(self.select_as(&query).await?.into_iter().next())
    }

    pub async fn recent_telemetry(
        &self,
        vehicle_id: &str,
        limit: usize,
    ) -> Result<Vec<TelemetryRow>, AutoPulseError> {
        let query = RowQuery::from(TELEMETRY)
            .eq("vehicle_id", vehicle_id)
            .order("timestamp", Direction::Descending)
            .limit(limit);
        self.select_as(&query).await
    }

    pub async fn find_admin_id(&self) -> Result<Option<String>, AutoPulseError> {
        let query = RowQuery::from(USERS)
            .select("id")
            .eq("role", ADMIN_ROLE)
            .limit(1);
        let rows = self.store.select(&query).await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Conversation between the user and the admin, oldest first. Without an
    /// admin only the user's own messages are returned.
    pub async fn list_conversation(
        &self,
        user_id: &str,
        admin_id: Option<&str>,
    ) -> Result<Vec<SupportMessage>, AutoPulseError> {
        let mut query = RowQuery::from(MESSAGES).order("created_at", Direction::Ascending);
        query = match admin_id {
            Some(admin) => query
                .or_all(vec![("sender", user_id), ("recipient", admin)])
                .or_all(vec![("sender", admin), ("recipient", user_id)]),
            None => query.or_all(vec![("sender", user_id)]),
        };
        self.select_as(&query).await
    }

    pub async fn send_message(
        &self,
        sender: &str,
        recipient: Option<&str>,
        content: &str,
    ) -> Result<(), AutoPulseError> {
        if content.trim().is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        let row = json!({
            "sender": sender,
            "recipient": recipient,
            "content": content,
        });
        self.store
            .insert(MESSAGES, row)
            .await
            .map_err(|e| match e {
                AutoPulseError::Store(msg) if is_missing_recipient(&msg) => {
                    AutoPulseError::NoAdminAvailable
                }
                other => other,
            })
    }

    async fn select_as<T: DeserializeOwned>(
        &self,
        query: &RowQuery,
    ) -> Result<Vec<T>, AutoPulseError> {
        let rows = self.store.select(query).await?;
        debug!(table = %query.table, count = rows.len(), "rows fetched");
        rows.into_iter()
            .map(|r| serde_json::from_value(r).map_err(AutoPulseError::from))
            .collect()
    }
}

fn is_missing_recipient(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("null") && lower.contains("recipient")
}
