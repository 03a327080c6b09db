pub mod identity;
pub mod message;
pub mod profile;
pub mod telemetry;
pub mod timestamp;
pub mod vehicle;

pub use identity::{AuthChangeKind, AuthEvent, AuthResponse, Identity, Session};
pub use message::SupportMessage;
pub use profile::UserProfile;
pub use telemetry::TelemetryRow;
pub use vehicle::Vehicle;
