use super::{AuthSubscription, IdentityService, RowQuery, RowStore};
use crate::error::AutoPulseError;
use crate::types::{AuthChangeKind, AuthEvent, AuthResponse, Identity, Session};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::lock::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryAccount {
    identity: Identity,
    password: String,
    confirmed: bool,
}

struct MemoryInner {
    accounts: Mutex<HashMap<String, MemoryAccount>>,
    session: Mutex<Option<Session>>,
    tables: Mutex<HashMap<String, Vec<Value>>>,
    events: broadcast::Sender<AuthEvent>,
    generation: AtomicU64,
    next_id: AtomicU64,
    calls: AtomicUsize,
    require_confirmation: AtomicBool,
    allow_unconfirmed_sign_in: AtomicBool,
    fail_writes: AtomicBool,
    fail_selects: AtomicBool,
    fail_sign_out: AtomicBool,
}

/// In-process identity service and row store.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(MemoryInner {
                accounts: Mutex::new(HashMap::new()),
                session: Mutex::new(None),
                tables: Mutex::new(HashMap::new()),
                events,
                generation: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
                calls: AtomicUsize::new(0),
                require_confirmation: AtomicBool::new(false),
                allow_unconfirmed_sign_in: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
                fail_selects: AtomicBool::new(false),
                fail_sign_out: AtomicBool::new(false),
            }),
        }
    }

    /// Number of trait calls that would have hit the network.
    pub fn network_calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn set_require_confirmation(&self, on: bool) {
        self.inner.require_confirmation.store(on, Ordering::SeqCst);
    }

    /// Let unconfirmed accounts sign in, like a project where sign-up
    /// returns no session but password login is not gated on confirmation.
    pub fn set_allow_unconfirmed_sign_in(&self, on: bool) {
        self.inner.allow_unconfirmed_sign_in.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, on: bool) {
        self.inner.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_selects(&self, on: bool) {
        self.inner.fail_selects.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_sign_out(&self, on: bool) {
        self.inner.fail_sign_out.store(on, Ordering::SeqCst);
    }

    /// Register a confirmed account without touching the session.
    pub async fn register(&self, email: &str, password: &str) -> Identity {
        let identity = self.new_identity(email);
        self.inner.accounts.lock().await.insert(
            email.to_string(),
            MemoryAccount {
                identity: identity.clone(),
                password: password.to_string(),
                confirmed: true,
            },
        );
        identity
    }

    /// Install a session as if it had been persisted by an earlier run.
    /// No event is emitted.
    pub async fn restore_session(&self, identity: Identity) -> Session {
        let session = Self::issue_session(identity);
        *self.inner.session.lock().await = Some(session.clone());
        session
    }

    /// Simulate a provider-side transition (expiry, sign-in elsewhere).
    pub async fn push_session_change(&self, session: Option<Session>) -> u64 {
        let kind = if session.is_some() {
            AuthChangeKind::SignedIn
        } else {
            AuthChangeKind::SignedOut
        };
        *self.inner.session.lock().await = session.clone();
        self.emit(kind, session)
    }

    pub async fn seed_rows(&self, table: &str, rows: Vec<Value>) {
        self.inner
            .tables
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub async fn rows(&self, table: &str) -> Vec<Value> {
        self.inner
            .tables
            .lock()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn new_identity(&self, email: &str) -> Identity {
        let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        Identity {
            id: format!("user-{n}"),
            email: Some(email.to_string()),
        }
    }

    fn issue_session(identity: Identity) -> Session {
        Session {
            access_token: format!("access-{}", identity.id),
            refresh_token: Some(format!("refresh-{}", identity.id)),
            expires_at: Some(Utc::now() + Duration::hours(1)),
            user: identity,
        }
    }

    fn emit(&self, kind: AuthChangeKind, session: Option<Session>) -> u64 {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        // no receivers is fine
        let _ = self.inner.events.send(AuthEvent {
            generation,
            kind,
            session,
        });
        generation
    }

    fn count_call(&self) {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn check_writes(&self) -> Result<(), AutoPulseError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(AutoPulseError::Store(
                "permission denied for table".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityService for MemoryBackend {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResponse, AutoPulseError> {
        self.count_call();
        let mut accounts = self.inner.accounts.lock().await;
        if accounts.contains_key(email) {
            return Err(AutoPulseError::Auth("User already registered".to_string()));
        }
        let identity = self.new_identity(email);
        let confirmed = !self.inner.require_confirmation.load(Ordering::SeqCst);
        accounts.insert(
            email.to_string(),
            MemoryAccount {
                identity: identity.clone(),
                password: password.to_string(),
                confirmed,
            },
        );
        drop(accounts);

        if !confirmed {
            debug!(user_id = %identity.id, "sign-up pending email confirmation");
            return Ok(AuthResponse {
                user: identity,
                session: None,
                generation: self.generation(),
            });
        }

        let session = Self::issue_session(identity.clone());
        *self.inner.session.lock().await = Some(session.clone());
        let generation = self.emit(AuthChangeKind::SignedIn, Some(session.clone()));
        Ok(AuthResponse {
            user: identity,
            session: Some(session),
            generation,
        })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, AutoPulseError> {
        self.count_call();
        let account = self.inner.accounts.lock().await.get(email).cloned();
        let account = match account {
            Some(a) if a.password == password => a,
            _ => return Err(AutoPulseError::Auth("Invalid login credentials".to_string())),
        };
        if !account.confirmed && !self.inner.allow_unconfirmed_sign_in.load(Ordering::SeqCst) {
            return Err(AutoPulseError::Auth("Email not confirmed".to_string()));
        }

        let session = Self::issue_session(account.identity.clone());
        *self.inner.session.lock().await = Some(session.clone());
        let generation = self.emit(AuthChangeKind::SignedIn, Some(session.clone()));
        Ok(AuthResponse {
            user: account.identity,
            session: Some(session),
            generation,
        })
    }

    async fn sign_out(&self) -> Result<(), AutoPulseError> {
        self.count_call();
        *self.inner.session.lock().await = None;
        self.emit(AuthChangeKind::SignedOut, None);
        if self.inner.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AutoPulseError::Auth("Network request failed".to_string()));
        }
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>, AutoPulseError> {
        self.count_call();
        Ok(self.inner.session.lock().await.clone())
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> AuthSubscription {
        AuthSubscription::new(self.inner.events.subscribe())
    }
}

#[async_trait]
impl RowStore for MemoryBackend {
    async fn select(&self, query: &RowQuery) -> Result<Vec<Value>, AutoPulseError> {
        self.count_call();
        if self.inner.fail_selects.load(Ordering::SeqCst) {
            return Err(AutoPulseError::Store(format!(
                "relation \"{}\" is unavailable",
                query.table
            )));
        }
        let tables = self.inner.tables.lock().await;
        let rows = tables.get(&query.table).map(Vec::as_slice).unwrap_or(&[]);
        Ok(query.apply(rows))
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), AutoPulseError> {
        self.count_call();
        self.check_writes()?;
        self.inner
            .tables
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .push(row);
        Ok(())
    }

    async fn upsert(
        &self,
        table: &str,
        row: Value,
        on_conflict: &str,
    ) -> Result<(), AutoPulseError> {
        self.count_call();
        self.check_writes()?;
        let mut tables = self.inner.tables.lock().await;
        let rows = tables.entry(table.to_string()).or_default();
        let key = row.get(on_conflict).cloned();
        match rows
            .iter_mut()
            .find(|r| key.is_some() && r.get(on_conflict) == key.as_ref())
        {
            Some(existing) => merge(existing, row),
            None => rows.push(row),
        }
        Ok(())
    }

    async fn update(&self, query: &RowQuery, patch: Value) -> Result<(), AutoPulseError> {
        self.count_call();
        self.check_writes()?;
        let mut tables = self.inner.tables.lock().await;
        if let Some(rows) = tables.get_mut(&query.table) {
            for row in rows.iter_mut().filter(|r| query.matches(r)) {
                merge(row, patch.clone());
            }
        }
        Ok(())
    }
}

fn merge(target: &mut Value, patch: Value) {
    match (target.as_object_mut(), patch) {
        (Some(obj), Value::Object(fields)) => {
            for (k, v) in fields {
                obj.insert(k, v);
            }
        }
        (_, other) => *target = other,
    }
}
