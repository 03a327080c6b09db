use crate::error::ValidationError;
use std::fmt;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Credentials that passed local checks. `email` is trimmed; the password is
/// kept exactly as typed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub fn validate_credentials(identifier: &str, password: &str) -> Result<Credentials, ValidationError> {
    let email = identifier.trim();
    if email.is_empty() {
        return Err(ValidationError::MissingEmail);
    }
    if password.trim().is_empty() {
        return Err(ValidationError::MissingPassword);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort {
            min: MIN_PASSWORD_LEN,
        });
    }
    Ok(Credentials {
        email: email.to_string(),
        password: password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_identifier_is_rejected_first() {
        assert_eq!(
            validate_credentials("   ", ""),
            Err(ValidationError::MissingEmail)
        );
    }

    #[test]
    fn whitespace_password_counts_as_missing() {
        assert_eq!(
            validate_credentials("a@example.com", "       "),
            Err(ValidationError::MissingPassword)
        );
    }

    #[test]
    fn short_passwords_are_rejected() {
        for pw in ["a", "abc", "abcde", "äöüß1"] {
            assert_eq!(
                validate_credentials("a@example.com", pw),
                Err(ValidationError::PasswordTooShort { min: 6 }),
                "{pw}"
            );
        }
    }

    #[test]
    fn identifier_is_trimmed_and_password_kept() {
        let c = validate_credentials("  a@example.com ", " pass word ").unwrap();
        assert_eq!(c.email, "a@example.com");
        assert_eq!(c.password, " pass word ");
    }

    #[test]
    fn error_messages_match_the_login_form() {
        assert_eq!(ValidationError::MissingEmail.to_string(), "Email is required");
        assert_eq!(
            ValidationError::PasswordTooShort { min: 6 }.to_string(),
            "Password must be at least 6 characters"
        );
    }
}
