use super::endpoints::{SignUpPayload, SupabaseEndpoints};
use crate::backend::{AuthSubscription, IdentityService, RowQuery, RowStore};
use crate::config::Config;
use crate::db::SessionStorage;
use crate::error::AutoPulseError;
use crate::types::{AuthChangeKind, AuthEvent, AuthResponse, Session};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};

/// Refresh the access token when it expires within this window.
const REFRESH_MARGIN_SECS: i64 = 60;

/// HTTP client for one Supabase project: GoTrue auth plus PostgREST rows.
///
/// Holds the current session, refreshes it on demand, persists it through
/// `SessionStorage` and broadcasts every transition with a generation stamp.
pub struct SupabaseClient {
    http: reqwest::Client,
    endpoints: SupabaseEndpoints,
    session: RwLock<Option<Session>>,
    /// Serializes session transitions. A refresh holds it across the grant.
    transition: Mutex<()>,
    generation: AtomicU64,
    events: broadcast::Sender<AuthEvent>,
    storage: Option<SessionStorage>,
    storage_key: String,
}

impl SupabaseClient {
    pub fn new(cfg: &Config, storage: Option<SessionStorage>) -> Result<Self, AutoPulseError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("autopulse/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(cfg.request_timeout());
        if let Some(proxy_url) = cfg.proxy.as_deref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }
        let http = builder.build()?;
        let endpoints = SupabaseEndpoints::new(&cfg.supabase_url, &cfg.supabase_anon_key)?;
        let (events, _) = broadcast::channel(64);

        Ok(Self {
            http,
            endpoints,
            session: RwLock::new(None),
            transition: Mutex::new(()),
            generation: AtomicU64::new(0),
            events,
            storage,
            storage_key: cfg.session_key.clone(),
        })
    }

    /// Build the client and load any session persisted by an earlier run.
    pub async fn connect(
        cfg: &Config,
        storage: Option<SessionStorage>,
    ) -> Result<Self, AutoPulseError> {
        let client = Self::new(cfg, storage)?;
        client.load_persisted().await;
        Ok(client)
    }

    async fn load_persisted(&self) {
        let Some(storage) = self.storage.as_ref() else {
            return;
        };
        match storage.load(&self.storage_key).await {
            Ok(Some(session)) => {
                info!(user_id = %session.user.id, "loaded persisted session");
                *self.session.write().await = Some(session);
            }
            Ok(None) => debug!("no persisted session"),
            Err(e) => warn!(error = %e, "failed to load persisted session"),
        }
    }

    /// Replace the session, persist it, and broadcast the transition.
    async fn set_session(&self, session: Option<Session>, kind: AuthChangeKind) -> u64 {
        *self.session.write().await = session.clone();

        if let Some(storage) = self.storage.as_ref() {
            let res = match session.as_ref() {
                Some(s) => storage.save(&self.storage_key, s).await,
                None => storage.delete(&self.storage_key).await,
            };
            if let Err(e) = res {
                warn!(error = %e, "failed to persist session");
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.events.send(AuthEvent {
            generation,
            kind,
            session,
        });
        generation
    }

    /// Current session, refreshed first if it is about to expire.
    async fn fresh_session(&self) -> Option<Session> {
        let margin = chrono::Duration::seconds(REFRESH_MARGIN_SECS);
        {
            let current = self.session.read().await;
            match current.as_ref() {
                None => return None,
                Some(s) if !s.expires_within(margin) => return Some(s.clone()),
                Some(_) => {}
            }
        }

        let _guard = self.transition.lock().await;
        // another caller may have refreshed while we waited
        let current = self.session.read().await.clone()?;
        if !current.expires_within(margin) {
            return Some(current);
        }

        let Some(refresh_token) = current.refresh_token.as_deref() else {
            if current.is_expired() {
                info!(user_id = %current.user.id, "session expired without refresh token");
                self.set_session(None, AuthChangeKind::SignedOut).await;
                return None;
            }
            return Some(current);
        };

        match self.endpoints.refresh_grant(&self.http, refresh_token).await {
            Ok(refreshed) => {
                self.set_session(Some(refreshed.clone()), AuthChangeKind::TokenRefreshed)
                    .await;
                Some(refreshed)
            }
            Err(e) => {
                warn!(user_id = %current.user.id, error = %e, "token refresh failed; dropping session");
                self.set_session(None, AuthChangeKind::SignedOut).await;
                None
            }
        }
    }

    /// Bearer for row requests: the user's token, else the anon key.
    async fn bearer(&self) -> String {
        match self.fresh_session().await {
            Some(s) => s.access_token,
            None => self.endpoints.anon_key().to_string(),
        }
    }
}

#[async_trait]
impl IdentityService for SupabaseClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResponse, AutoPulseError> {
        match self.endpoints.sign_up(&self.http, email, password).await? {
            SignUpPayload::Session(session) => {
                let user = session.user.clone();
                let _guard = self.transition.lock().await;
                let generation = self
                    .set_session(Some(session.clone()), AuthChangeKind::SignedIn)
                    .await;
                Ok(AuthResponse {
                    user,
                    session: Some(session),
                    generation,
                })
            }
            SignUpPayload::PendingConfirmation(user) => Ok(AuthResponse {
                user,
                session: None,
                generation: self.generation(),
            }),
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, AutoPulseError> {
        let session = self
            .endpoints
            .password_grant(&self.http, email, password)
            .await?;
        info!(user_id = %session.user.id, "signed in");
        let user = session.user.clone();
        let _guard = self.transition.lock().await;
        let generation = self
            .set_session(Some(session.clone()), AuthChangeKind::SignedIn)
            .await;
        Ok(AuthResponse {
            user,
            session: Some(session),
            generation,
        })
    }

    async fn sign_out(&self) -> Result<(), AutoPulseError> {
        // waits out an in-flight refresh so its result cannot outlive the sign-out
        let _guard = self.transition.lock().await;
        let token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone());
        let remote = match token {
            Some(token) => self.endpoints.logout(&self.http, &token).await,
            None => Ok(()),
        };
        self.set_session(None, AuthChangeKind::SignedOut).await;
        remote
    }

    async fn get_session(&self) -> Result<Option<Session>, AutoPulseError> {
        Ok(self.fresh_session().await)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> AuthSubscription {
        AuthSubscription::new(self.events.subscribe())
    }
}

#[async_trait]
impl RowStore for SupabaseClient {
    async fn select(&self, query: &RowQuery) -> Result<Vec<Value>, AutoPulseError> {
        let bearer = self.bearer().await;
        self.endpoints.select(&self.http, &bearer, query).await
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), AutoPulseError> {
        let bearer = self.bearer().await;
        self.endpoints.insert(&self.http, &bearer, table, &row).await
    }

    async fn upsert(
        &self,
        table: &str,
        row: Value,
        on_conflict: &str,
    ) -> Result<(), AutoPulseError> {
        let bearer = self.bearer().await;
        self.endpoints
            .upsert(&self.http, &bearer, table, &row, on_conflict)
            .await
    }

    async fn update(&self, query: &RowQuery, patch: Value) -> Result<(), AutoPulseError> {
        let bearer = self.bearer().await;
        self.endpoints
            .update(&self.http, &bearer, query, &patch)
            .await
    }
}
