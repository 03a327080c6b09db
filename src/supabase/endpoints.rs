use crate::backend::RowQuery;
use crate::error::AutoPulseError;
use crate::types::{Identity, Session};

use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

/// Stateless GoTrue / PostgREST endpoints of one project.
pub(super) struct SupabaseEndpoints {
    auth_url: Url,
    rest_url: Url,
    anon_key: String,
}

#[derive(Serialize)]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Clone, Copy)]
enum Surface {
    Auth,
    Rest,
}

impl SupabaseEndpoints {
    pub(super) fn new(project_url: &str, anon_key: &str) -> Result<Self, AutoPulseError> {
        let mut base = Url::parse(project_url.trim())?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            auth_url: base.join("auth/v1/")?,
            rest_url: base.join("rest/v1/")?,
            anon_key: anon_key.to_string(),
        })
    }

    pub(super) fn anon_key(&self) -> &str {
        &self.anon_key
    }

    pub(super) async fn sign_up(
        &self,
        http: &reqwest::Client,
        email: &str,
        password: &str,
    ) -> Result<SignUpPayload, AutoPulseError> {
        let url = self.auth_url.join("signup")?;
        let resp = self
            .with_key(http.post(url), &self.anon_key)
            .json(&PasswordRequest { email, password })
            .send()
            .await?;
        let value: Value = check(resp, Surface::Auth).await?.json().await?;
        info!("sign-up accepted by identity service");
        parse_sign_up(value)
    }

    pub(super) async fn password_grant(
        &self,
        http: &reqwest::Client,
        email: &str,
        password: &str,
    ) -> Result<Session, AutoPulseError> {
        let mut url = self.auth_url.join("token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let resp = self
            .with_key(http.post(url), &self.anon_key)
            .json(&PasswordRequest { email, password })
            .send()
            .await?;
        let payload: SessionPayload = check(resp, Surface::Auth).await?.json().await?;
        payload.into_session()
    }

    pub(super) async fn refresh_grant(
        &self,
        http: &reqwest::Client,
        refresh_token: &str,
    ) -> Result<Session, AutoPulseError> {
        let mut url = self.auth_url.join("token")?;
        url.query_pairs_mut()
            .append_pair("grant_type", "refresh_token");
        let resp = self
            .with_key(http.post(url), &self.anon_key)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        let payload: SessionPayload = check(resp, Surface::Auth).await?.json().await?;
        debug!("access token refreshed");
        payload.into_session()
    }

    pub(super) async fn logout(
        &self,
        http: &reqwest::Client,
        access_token: &str,
    ) -> Result<(), AutoPulseError> {
        let url = self.auth_url.join("logout")?;
        let resp = self.with_key(http.post(url), access_token).send().await?;
        check(resp, Surface::Auth).await?;
        Ok(())
    }

    pub(super) async fn select(
        &self,
        http: &reqwest::Client,
        bearer: &str,
        query: &RowQuery,
    ) -> Result<Vec<Value>, AutoPulseError> {
        let url = self.table_url(&query.table)?;
        let resp = self
            .with_key(http.get(url), bearer)
            .query(&query.to_postgrest_params())
            .header("Accept", "application/json")
            .send()
            .await?;
        let rows: Vec<Value> = check(resp, Surface::Rest).await?.json().await?;
        Ok(rows)
    }

    pub(super) async fn insert(
        &self,
        http: &reqwest::Client,
        bearer: &str,
        table: &str,
        row: &Value,
    ) -> Result<(), AutoPulseError> {
        let url = self.table_url(table)?;
        let resp = self
            .with_key(http.post(url), bearer)
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await?;
        check(resp, Surface::Rest).await?;
        Ok(())
    }

    pub(super) async fn upsert(
        &self,
        http: &reqwest::Client,
        bearer: &str,
        table: &str,
        row: &Value,
        on_conflict: &str,
    ) -> Result<(), AutoPulseError> {
        let url = self.table_url(table)?;
        let resp = self
            .with_key(http.post(url), bearer)
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row)
            .send()
            .await?;
        check(resp, Surface::Rest).await?;
        Ok(())
    }

    pub(super) async fn update(
        &self,
        http: &reqwest::Client,
        bearer: &str,
        query: &RowQuery,
        patch: &Value,
    ) -> Result<(), AutoPulseError> {
        let url = self.table_url(&query.table)?;
        let filters: Vec<(String, String)> = query
            .filters
            .iter()
            .map(|(c, v)| (c.clone(), format!("eq.{v}")))
            .collect();
        let resp = self
            .with_key(http.patch(url), bearer)
            .query(&filters)
            .header("Prefer", "return=minimal")
            .json(patch)
            .send()
            .await?;
        check(resp, Surface::Rest).await?;
        Ok(())
    }

    fn table_url(&self, table: &str) -> Result<Url, AutoPulseError> {
        Ok(self.rest_url.join(table)?)
    }

    fn with_key(&self, builder: RequestBuilder, bearer: &str) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }
}

/// Map a non-success response to the service's own message.
async fn check(resp: Response, surface: Surface) -> Result<Response, AutoPulseError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = error_message(status, &body);
    Err(match surface {
        Surface::Auth => AutoPulseError::Auth(message),
        Surface::Rest => AutoPulseError::Store(message),
    })
}

/// GoTrue uses `msg` / `error_description`, PostgREST uses `message`.
pub(super) fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["msg", "error_description", "message", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_string))
        })
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("Request failed with status {status}"))
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct UserPayload {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl From<UserPayload> for Identity {
    fn from(u: UserPayload) -> Self {
        Identity {
            id: u.id,
            email: u.email.filter(|e| !e.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct SessionPayload {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub user: Option<UserPayload>,
}

impl SessionPayload {
    pub(super) fn into_session(self) -> Result<Session, AutoPulseError> {
        let claims = decode_jwt_claims(&self.access_token);

        let user = match self.user {
            Some(u) => Identity::from(u),
            None => identity_from_claims(claims.as_ref()).ok_or_else(|| {
                AutoPulseError::UnexpectedError("session payload has no user".to_string())
            })?,
        };

        let expires_at = self
            .expires_at
            .and_then(unix_seconds)
            .or_else(|| self.expires_in.map(|s| Utc::now() + Duration::seconds(s)))
            .or_else(|| {
                claims
                    .as_ref()
                    .and_then(|c| c.get("exp"))
                    .and_then(Value::as_i64)
                    .and_then(unix_seconds)
            });

        Ok(Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_at,
            user,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum SignUpPayload {
    Session(Session),
    PendingConfirmation(Identity),
}

/// Sign-up answers with a full session when auto-confirm is on, otherwise
/// with the bare user (or `{ user }`).
pub(super) fn parse_sign_up(value: Value) -> Result<SignUpPayload, AutoPulseError> {
    if value.get("access_token").is_some() {
        let payload: SessionPayload = serde_json::from_value(value)?;
        return Ok(SignUpPayload::Session(payload.into_session()?));
    }
    let user_value = match value.get("user") {
        Some(u) if u.is_object() => u.clone(),
        _ => value,
    };
    let user: UserPayload = serde_json::from_value(user_value)?;
    Ok(SignUpPayload::PendingConfirmation(user.into()))
}

fn unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

fn decode_jwt_claims(token: &str) -> Option<Value> {
    let payload_b64 = token.split('.').nth(1)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}

fn identity_from_claims(claims: Option<&Value>) -> Option<Identity> {
    let claims = claims?;
    let id = claims.get("sub").and_then(Value::as_str)?.to_string();
    let email = claims
        .get("email")
        .and_then(Value::as_str)
        .filter(|e| !e.is_empty())
        .map(str::to_string);
    Some(Identity { id, email })
}
