use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row of `telemetry_data` as written by the OBD collector.
///
/// Every reading is optional; sensors that are not wired up yet simply
/// leave the column null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryRow {
    pub vehicle_id: Option<String>,
    #[serde(deserialize_with = "super::timestamp::deserialize_optional")]
    pub timestamp: Option<DateTime<Utc>>,
    pub rpm: Option<f64>,
    pub coolant_temp: Option<f64>,
    pub battery: Option<f64>,
    pub map_kpa: Option<f64>,
    pub engine_load_pct: Option<f64>,
    pub fuel_pressure_kpa: Option<f64>,
    pub stft_b1_pct: Option<f64>,
    pub intake_air_temp: Option<f64>,
    pub throttle_position: Option<f64>,
    pub ignition_advance: Option<f64>,
    pub fault_codes: Option<Vec<String>>,
}

impl TelemetryRow {
    pub fn has_fault_codes(&self) -> bool {
        self.fault_codes.as_ref().is_some_and(|c| !c.is_empty())
    }
}
