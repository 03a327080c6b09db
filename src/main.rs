use autopulse::api::{ProbeOutcome, ProducerProbe};
use autopulse::db::SessionStorage;
use autopulse::service::{SessionManager, health};
use autopulse::{Config, SupabaseClient};

use mimalloc::MiMalloc;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        supabase_url = %cfg.supabase_url,
        database_url = %cfg.database_url,
        telemetry_api_url = %cfg.telemetry_api_url,
        proxy = %cfg.proxy.as_deref().unwrap_or("<none>"),
        loglevel = %cfg.loglevel
    );
    let missing = cfg.missing_backend_settings();
    if !missing.is_empty() {
        warn!(?missing, "backend settings missing");
    }

    let storage = if cfg.persist_session {
        match SessionStorage::connect(&cfg.database_url).await {
            Ok(storage) => Some(storage),
            Err(e) => {
                warn!(error = %e, "session storage unavailable; session will not persist");
                None
            }
        }
    } else {
        None
    };

    let client = Arc::new(SupabaseClient::connect(&cfg, storage).await?);
    let manager = SessionManager::spawn(client.clone(), client.clone()).await?;

    let restored = manager.wait_until_resolved().await?;
    info!(status = ?restored.status(), "session resolved");

    if !restored.is_authenticated() {
        let email = std::env::var("AUTOPULSE_EMAIL").ok();
        let password = std::env::var("AUTOPULSE_PASSWORD").ok();
        if let (Some(email), Some(password)) = (email, password) {
            if let Err(e) = manager.sign_in(&email, &password).await {
                error!("sign-in failed: {e}");
            }
        }
    }

    manager.refresh_vehicles().await?;
    let snapshot = manager.snapshot();
    info!(
        user = ?snapshot.user.as_ref().map(|u| u.id.as_str()),
        vehicles = snapshot.vehicles.len(),
        current = ?snapshot.current_vehicle.as_ref().map(|v| v.name.as_str()),
        "session ready"
    );

    if snapshot.is_authenticated() {
        let ops = autopulse::service::DataOps::new(client.clone());
        match health::analyze_vehicle(&ops, snapshot.current_vehicle.as_ref()).await {
            Ok(report) => info!(
                overall = report.overall_health,
                engine = report.engine_health,
                fuel_system = report.fuel_system_health,
                emissions = report.emission_health,
                status = ?report.status,
                recommendations = ?report.recommendations,
                "vehicle health"
            ),
            Err(e) => warn!("health report unavailable: {e}"),
        }
    }

    let probe = ProducerProbe::from_config(&cfg)?;
    let outcome = tokio::select! {
        outcome = probe.check() => outcome?,
        _ = tokio::signal::ctrl_c() => {
            probe.cancel();
            ProbeOutcome::Cancelled
        }
    };
    info!(?outcome, "telemetry producer check finished");

    let mut changes = WatchStream::from_changes(manager.subscribe());
    loop {
        tokio::select! {
            next = changes.next() => match next {
                Some(s) => info!(
                    status = ?s.status(),
                    user = ?s.user.as_ref().map(|u| u.id.as_str()),
                    vehicles = s.vehicles.len(),
                    "session changed"
                ),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}
