pub mod api;
pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod service;
pub mod supabase;
pub mod types;

pub use config::Config;
pub use error::AutoPulseError;
pub use service::{SessionManager, SessionSnapshot};
pub use supabase::SupabaseClient;
