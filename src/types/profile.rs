use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ROLE: &str = "user";
pub const ADMIN_ROLE: &str = "admin";

/// Row of the public `users` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub username: Option<String>,
    pub role: String,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Profile created alongside a new account: username is the local part
    /// of the email and the role is the default one.
    pub fn for_new_account(id: impl Into<String>, email: &str) -> Self {
        let email = email.trim();
        let username = email.split('@').next().unwrap_or_default().to_string();
        Self {
            id: id.into(),
            email: email.to_string(),
            username: Some(username),
            role: DEFAULT_ROLE.to_string(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_profile_derives_username() {
        let p = UserProfile::for_new_account("u1", "  driver.one@example.com ");
        assert_eq!(p.email, "driver.one@example.com");
        assert_eq!(p.username.as_deref(), Some("driver.one"));
        assert_eq!(p.role, "user");
    }

    #[test]
    fn email_without_at_sign_is_its_own_username() {
        let p = UserProfile::for_new_account("u1", "pitcrew");
        assert_eq!(p.username.as_deref(), Some("pitcrew"));
    }
}
