use thiserror::Error as ThisError;

/// Local credential/input checks that fail before any network call.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ValidationError {
    #[error("Email is required")]
    MissingEmail,

    #[error("Password is required")]
    MissingPassword,

    #[error("Password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    #[error("Message content is required")]
    EmptyMessage,
}

#[derive(Debug, ThisError)]
pub enum AutoPulseError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Identity service rejection, message kept verbatim.
    #[error("{0}")]
    Auth(String),

    /// Row store rejection, message kept verbatim.
    #[error("{0}")]
    Store(String),

    #[error("No admin is currently available to receive messages")]
    NoAdminAvailable,

    #[error("No vehicle selected")]
    NoVehicleSelected,

    #[error("No telemetry data found for vehicle {0}")]
    NoTelemetry(String),

    #[error("A connection check is already in progress")]
    ProbeInFlight,

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Ractor error: {0}")]
    RactorError(String),

    #[error("Unexpected error: {0}")]
    UnexpectedError(String),
}

impl AutoPulseError {
    /// True for errors raised locally before anything was sent.
    pub fn is_validation(&self) -> bool {
        matches!(self, AutoPulseError::Validation(_))
    }
}
