use crate::error::AutoPulseError;
use crate::service::data_ops::DataOps;
use crate::types::{TelemetryRow, Vehicle};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// Rows considered by one analysis.
pub const ANALYSIS_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthStatus {
    pub fn from_score(score: u32) -> Self {
        match score {
            85.. => HealthStatus::Excellent,
            70..=84 => HealthStatus::Good,
            55..=69 => HealthStatus::Fair,
            40..=54 => HealthStatus::Poor,
            _ => HealthStatus::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub engine_health: u32,
    pub fuel_system_health: u32,
    pub emission_health: u32,
    pub overall_health: u32,
    pub status: HealthStatus,
    pub recommendations: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

/// Threshold heuristic over recent rows. Missing readings count as 0.
/// Returns `None` for an empty slice.
pub fn analyze(rows: &[TelemetryRow]) -> Option<HealthReport> {
    if rows.is_empty() {
        return None;
    }
    let avg = |f: fn(&TelemetryRow) -> f64| rows.iter().map(f).sum::<f64>() / rows.len() as f64;

    let coolant = avg(|r| r.coolant_temp.unwrap_or(0.0));
    let battery = avg(|r| r.battery.unwrap_or(0.0));
    let engine_load = avg(|r| r.engine_load_pct.unwrap_or(0.0));
    let fuel_pressure = avg(|r| r.fuel_pressure_kpa.unwrap_or(0.0));
    let stft = avg(|r| r.stft_b1_pct.unwrap_or(0.0).abs());
    let has_fault_codes = rows.iter().any(TelemetryRow::has_fault_codes);

    let mut engine: i32 = 100;
    if !(80.0..=95.0).contains(&coolant) {
        engine -= 15;
    }
    if !(11.0..=15.0).contains(&battery) {
        engine -= 10;
    }
    if engine_load > 90.0 {
        engine -= 10;
    }

    let mut fuel: i32 = 100;
    if !(200.0..=400.0).contains(&fuel_pressure) {
        fuel -= 20;
    }
    if stft > 10.0 {
        fuel -= 15;
    }

    let mut emission: i32 = 100;
    if has_fault_codes {
        emission -= 25;
    }
    if engine_load > 80.0 {
        emission -= 10;
    }

    let engine = engine.max(0) as u32;
    let fuel = fuel.max(0) as u32;
    let emission = emission.max(0) as u32;
    let overall = (f64::from(engine + fuel + emission) / 3.0).round() as u32;

    let checks = [
        (coolant > 95.0, "Engine coolant temperature is high. Check cooling system."),
        (battery < 12.0, "Battery voltage is low. Consider battery inspection."),
        (engine_load > 85.0, "High engine load detected. Avoid aggressive driving."),
        (fuel_pressure < 200.0, "Low fuel pressure detected. Inspect fuel system."),
        (stft > 8.0, "Fuel trim adjustment needed. Check for air leaks or fuel delivery issues."),
        (has_fault_codes, "Diagnostic trouble codes detected. Professional inspection recommended."),
        (overall < 70, "Overall vehicle health is below optimal. Schedule maintenance soon."),
    ];
    let recommendations = checks
        .iter()
        .filter(|(hit, _)| *hit)
        .map(|(_, text)| text.to_string())
        .collect();

    Some(HealthReport {
        engine_health: engine,
        fuel_system_health: fuel,
        emission_health: emission,
        overall_health: overall,
        status: HealthStatus::from_score(overall),
        recommendations,
        last_updated: Utc::now(),
    })
}

/// Fetch the latest rows of `vehicle` and analyze them.
pub async fn analyze_vehicle(
    ops: &DataOps,
    vehicle: Option<&Vehicle>,
) -> Result<HealthReport, AutoPulseError> {
    let vehicle = vehicle.ok_or(AutoPulseError::NoVehicleSelected)?;
    let rows = ops.recent_telemetry(&vehicle.id, ANALYSIS_WINDOW).await?;
    let report = analyze(&rows).ok_or_else(|| AutoPulseError::NoTelemetry(vehicle.id.clone()))?;
    info!(
        vehicle_id = %vehicle.id,
        rows = rows.len(),
        overall = report.overall_health,
        "health analysis complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> TelemetryRow {
        TelemetryRow {
            coolant_temp: Some(90.0),
            battery: Some(13.5),
            engine_load_pct: Some(40.0),
            fuel_pressure_kpa: Some(300.0),
            stft_b1_pct: Some(2.0),
            ..Default::default()
        }
    }

    #[test]
    fn healthy_rows_score_full_marks() {
        let report = analyze(&[healthy(), healthy()]).unwrap();
        assert_eq!(report.overall_health, 100);
        assert_eq!(report.status, HealthStatus::Excellent);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn empty_rows_give_no_report() {
        assert!(analyze(&[]).is_none());
    }

    #[test]
    fn missing_readings_count_as_zero() {
        // coolant, battery and fuel pressure all average to 0
        let report = analyze(&[TelemetryRow::default()]).unwrap();
        assert_eq!(report.engine_health, 75);
        assert_eq!(report.fuel_system_health, 80);
        assert_eq!(report.emission_health, 100);
        assert_eq!(report.overall_health, 85);
        assert_eq!(report.status, HealthStatus::Excellent);
        assert_eq!(
            report.recommendations,
            vec![
                "Battery voltage is low. Consider battery inspection.".to_string(),
                "Low fuel pressure detected. Inspect fuel system.".to_string(),
            ]
        );
    }

    #[test]
    fn fault_codes_and_load_hit_emissions() {
        let mut row = healthy();
        row.engine_load_pct = Some(95.0);
        row.fault_codes = Some(vec!["P0420".to_string()]);
        let report = analyze(&[row]).unwrap();
        assert_eq!(report.engine_health, 90);
        assert_eq!(report.emission_health, 65);
        // (90 + 100 + 65) / 3 = 85
        assert_eq!(report.overall_health, 85);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.starts_with("Diagnostic trouble codes")));
    }

    #[test]
    fn stft_uses_absolute_values() {
        let mut a = healthy();
        a.stft_b1_pct = Some(-12.0);
        let mut b = healthy();
        b.stft_b1_pct = Some(12.0);
        let report = analyze(&[a, b]).unwrap();
        assert_eq!(report.fuel_system_health, 85);
    }

    #[test]
    fn status_thresholds() {
        assert_eq!(HealthStatus::from_score(85), HealthStatus::Excellent);
        assert_eq!(HealthStatus::from_score(84), HealthStatus::Good);
        assert_eq!(HealthStatus::from_score(55), HealthStatus::Fair);
        assert_eq!(HealthStatus::from_score(40), HealthStatus::Poor);
        assert_eq!(HealthStatus::from_score(39), HealthStatus::Critical);
    }
}
