use crate::error::AutoPulseError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CONFIG_FILE: &str = "autopulse.toml";
pub const ENV_PREFIX: &str = "AUTOPULSE_";

/// Runtime configuration: defaults, then `autopulse.toml`, then
/// `AUTOPULSE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub database_url: String,
    pub persist_session: bool,
    pub session_key: String,
    /// Base URL of the Raspberry Pi telemetry API.
    pub telemetry_api_url: String,
    pub probe_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub proxy: Option<String>,
    pub loglevel: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            database_url: "sqlite:autopulse.sqlite".to_string(),
            persist_session: true,
            session_key: "autopulse-auth-token".to_string(),
            telemetry_api_url: "http://192.168.1.100:3000".to_string(),
            probe_timeout_secs: 10,
            request_timeout_secs: 15,
            proxy: None,
            loglevel: "info".to_string(),
        }
    }
}

impl Config {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn load() -> Result<Self, AutoPulseError> {
        Ok(Self::figment().extract()?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    /// Settings that are missing but needed to reach the backend.
    pub fn missing_backend_settings(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.supabase_url.trim().is_empty() {
            missing.push("supabase_url");
        }
        if self.supabase_anon_key.trim().is_empty() {
            missing.push("supabase_anon_key");
        }
        missing
    }
}
