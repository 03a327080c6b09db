use crate::config::Config;
use crate::error::AutoPulseError;
use crate::types::timestamp::parse_timestamp;

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};
use url::Url;

const SERVER_ERROR: &str = "Server responded with an error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Idle,
    Checking,
    Connected,
    Error,
    Cancelled,
}

/// Terminal result of one check.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Connected { last_sync: Option<DateTime<Utc>> },
    Failed(String),
    Cancelled,
}

impl ProbeOutcome {
    pub fn status(&self) -> ProbeStatus {
        match self {
            ProbeOutcome::Connected { .. } => ProbeStatus::Connected,
            ProbeOutcome::Failed(_) => ProbeStatus::Error,
            ProbeOutcome::Cancelled => ProbeStatus::Cancelled,
        }
    }
}

struct InFlight {
    attempt: u64,
    cancel: Option<oneshot::Sender<()>>,
}

/// Cancellable reachability check of the telemetry producer.
pub struct ProducerProbe {
    http: reqwest::Client,
    base_url: Url,
    latest_url: Url,
    attempts: AtomicU64,
    inflight: Mutex<Option<InFlight>>,
    status: watch::Sender<ProbeStatus>,
}

impl ProducerProbe {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AutoPulseError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("autopulse/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        let trimmed = base_url.trim_end_matches('/');
        let base = Url::parse(trimmed)?;
        let latest_url = Url::parse(&format!("{trimmed}/data/latest"))?;
        let (status, _) = watch::channel(ProbeStatus::Idle);
        Ok(Self {
            http,
            base_url: base,
            latest_url,
            attempts: AtomicU64::new(0),
            inflight: Mutex::new(None),
            status,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, AutoPulseError> {
        Self::new(&cfg.telemetry_api_url, cfg.probe_timeout())
    }

    pub fn status(&self) -> ProbeStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ProbeStatus> {
        self.status.subscribe()
    }

    /// Run one check. Rejected with `ProbeInFlight` while another check has
    /// not reached its outcome yet.
    pub async fn check(&self) -> Result<ProbeOutcome, AutoPulseError> {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut slot = self.slot();
            if slot.is_some() {
                return Err(AutoPulseError::ProbeInFlight);
            }
            *slot = Some(InFlight {
                attempt,
                cancel: Some(cancel_tx),
            });
        }
        let _guard = InFlightGuard {
            probe: self,
            attempt,
        };
        self.status.send_replace(ProbeStatus::Checking);
        debug!(attempt, url = %self.base_url, "producer check started");

        let outcome = tokio::select! {
            _ = cancel_rx => ProbeOutcome::Cancelled,
            result = self.run() => match result {
                Ok(last_sync) => ProbeOutcome::Connected { last_sync },
                Err(reason) => ProbeOutcome::Failed(reason),
            },
        };

        match &outcome {
            ProbeOutcome::Connected { last_sync } => {
                info!(attempt, last_sync = ?last_sync, "producer reachable")
            }
            ProbeOutcome::Failed(reason) => warn!(attempt, "producer check failed: {reason}"),
            ProbeOutcome::Cancelled => info!(attempt, "producer check cancelled"),
        }
        self.status.send_replace(outcome.status());
        Ok(outcome)
    }

    /// Abort the in-flight check. Returns false when nothing was running.
    pub fn cancel(&self) -> bool {
        let sender = self.slot().as_mut().and_then(|f| f.cancel.take());
        match sender {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    async fn run(&self) -> Result<Option<DateTime<Utc>>, String> {
        let resp = self
            .http
            .get(self.base_url.clone())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(SERVER_ERROR.to_string());
        }

        let resp = self
            .http
            .get(self.latest_url.clone())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(SERVER_ERROR.to_string());
        }
        let body: Value = resp.json().await.map_err(|e| e.to_string())?;
        Ok(body
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_timestamp))
    }

    fn slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Frees the in-flight slot when a check finishes or its future is dropped.
struct InFlightGuard<'a> {
    probe: &'a ProducerProbe,
    attempt: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.probe.slot();
        if slot.as_ref().is_some_and(|f| f.attempt == self.attempt) {
            *slot = None;
        }
    }
}
