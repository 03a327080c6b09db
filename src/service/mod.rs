pub mod data_ops;
pub mod health;
pub mod session_actor;
pub mod session_state;
pub mod validation;

pub use data_ops::DataOps;
pub use health::{HealthReport, HealthStatus};
pub use session_actor::{SessionManager, SignUpOutcome};
pub use session_state::{AuthStatus, SessionSnapshot};
pub use validation::{Credentials, validate_credentials};
