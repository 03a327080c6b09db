use autopulse::backend::{IdentityService, RowQuery, RowStore};
use autopulse::db::SessionStorage;
use autopulse::service::{DataOps, SessionManager};
use autopulse::types::AuthChangeKind;
use autopulse::{AutoPulseError, Config, SupabaseClient};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::net::TcpListener;

const EMAIL: &str = "driver@example.com";
const PASSWORD: &str = "secret1";
/// Sign-up for this address answers with a bare user, as when the project
/// requires email confirmation.
const PENDING_EMAIL: &str = "pending@example.com";

struct FakeProject {
    /// `expires_in` handed out by the password grant.
    expires_in: i64,
    logout_status: StatusCode,
    refresh_delay: Duration,
    refreshes: AtomicUsize,
    logouts: AtomicUsize,
}

impl FakeProject {
    fn new(expires_in: i64, logout_status: StatusCode) -> Self {
        Self {
            expires_in,
            logout_status,
            refresh_delay: Duration::ZERO,
            refreshes: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
        }
    }
}

type Shared = Arc<FakeProject>;

fn session_json(access: &str, refresh: &str, expires_in: i64) -> Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "expires_in": expires_in,
        "user": { "id": "u1", "email": EMAIL },
    })
}

async fn token(
    State(project): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    match params.get("grant_type").map(String::as_str) {
        Some("password") if body["email"] == EMAIL && body["password"] == PASSWORD => (
            StatusCode::OK,
            Json(session_json("access-1", "refresh-1", project.expires_in)),
        ),
        Some("password") => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials",
            })),
        ),
        Some("refresh_token") if body["refresh_token"] == "refresh-1" => {
            project.refreshes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(project.refresh_delay).await;
            (
                StatusCode::OK,
                Json(session_json("access-2", "refresh-2", 3600)),
            )
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "msg": "Invalid Refresh Token" })),
        ),
    }
}

async fn signup(State(project): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["email"] == PENDING_EMAIL {
        return (
            StatusCode::OK,
            Json(json!({ "id": "u2", "email": PENDING_EMAIL })),
        );
    }
    (
        StatusCode::OK,
        Json(session_json("access-1", "refresh-1", project.expires_in)),
    )
}

async fn logout(State(project): State<Shared>) -> StatusCode {
    project.logouts.fetch_add(1, Ordering::SeqCst);
    project.logout_status
}

async fn vehicles(
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if bearer != "Bearer access-1" || headers.get("apikey").is_none() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "JWT expired" })),
        );
    }
    if params.get("user_id").map(String::as_str) != Some("eq.u1")
        || params.get("order").map(String::as_str) != Some("created_at.desc")
    {
        return (StatusCode::OK, Json(json!([])));
    }
    (
        StatusCode::OK,
        Json(json!([
            { "id": "v2", "user_id": "u1", "name": "New", "created_at": "2024-06-01T00:00:00Z" },
            { "id": "v1", "user_id": "u1", "name": "Old", "created_at": "2024-01-01T00:00:00Z" },
        ])),
    )
}

async fn messages() -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "code": "23502",
            "message": "null value in column \"recipient\" of relation \"messages\" violates not-null constraint",
        })),
    )
}

async fn start(expires_in: i64, logout_status: StatusCode) -> (Config, Shared) {
    serve(FakeProject::new(expires_in, logout_status)).await
}

async fn serve(project: FakeProject) -> (Config, Shared) {
    let project = Arc::new(project);
    let app = Router::new()
        .route("/auth/v1/signup", post(signup))
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/logout", post(logout))
        .route("/rest/v1/vehicles", get(vehicles))
        .route("/rest/v1/messages", post(messages))
        .with_state(project.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind fake project");
    let addr = listener.local_addr().expect("no local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake project crashed");
    });

    let cfg = Config {
        supabase_url: format!("http://{addr}"),
        supabase_anon_key: "anon-key".to_string(),
        ..Config::default()
    };
    (cfg, project)
}

fn temp_db(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!(
        "autopulse-{tag}-{}-{}.sqlite",
        std::process::id(),
        nanos
    ));
    path
}

#[tokio::test]
async fn rejected_sign_in_surfaces_the_service_message() {
    let (cfg, _) = start(3600, StatusCode::NO_CONTENT).await;
    let client = SupabaseClient::connect(&cfg, None)
        .await
        .expect("client init failed");

    let err = client
        .sign_in_with_password(EMAIL, "wrong-password")
        .await
        .unwrap_err();
    assert!(matches!(err, AutoPulseError::Auth(_)));
    assert_eq!(err.to_string(), "Invalid login credentials");
    assert_eq!(client.get_session().await.expect("lookup failed"), None);
}

#[tokio::test]
async fn sign_in_is_stamped_pushed_and_persisted() {
    let (cfg, _) = start(3600, StatusCode::NO_CONTENT).await;
    let path = temp_db("persist");
    let database_url = format!("sqlite:{}", path.display());

    {
        let storage = SessionStorage::connect(&database_url)
            .await
            .expect("storage init failed");
        let client = SupabaseClient::connect(&cfg, Some(storage))
            .await
            .expect("client init failed");
        let mut events = client.subscribe();

        let resp = client
            .sign_in_with_password(EMAIL, PASSWORD)
            .await
            .expect("sign-in failed");
        assert_eq!(resp.user.id, "u1");

        let event = events.recv().await.expect("no auth event");
        assert_eq!(event.kind, AuthChangeKind::SignedIn);
        assert_eq!(event.generation, resp.generation);
        assert_eq!(client.generation(), resp.generation);
    }

    let storage = SessionStorage::connect(&database_url)
        .await
        .expect("storage reopen failed");
    let client = SupabaseClient::connect(&cfg, Some(storage))
        .await
        .expect("client init failed");
    let restored = client
        .get_session()
        .await
        .expect("lookup failed")
        .expect("session was not persisted");
    assert_eq!(restored.access_token, "access-1");
    assert_eq!(restored.user.email.as_deref(), Some(EMAIL));

    let _ = fs::remove_file(&path);
}

#[tokio::test]
async fn session_close_to_expiry_is_refreshed_on_lookup() {
    let (cfg, project) = start(30, StatusCode::NO_CONTENT).await;
    let client = SupabaseClient::connect(&cfg, None)
        .await
        .expect("client init failed");
    client
        .sign_in_with_password(EMAIL, PASSWORD)
        .await
        .expect("sign-in failed");
    let mut events = client.subscribe();

    let session = client
        .get_session()
        .await
        .expect("lookup failed")
        .expect("session dropped");
    assert_eq!(session.access_token, "access-2");
    assert_eq!(project.refreshes.load(Ordering::SeqCst), 1);
    let event = events.recv().await.expect("no auth event");
    assert_eq!(event.kind, AuthChangeKind::TokenRefreshed);

    // the refreshed token is good for an hour
    client.get_session().await.expect("lookup failed");
    assert_eq!(project.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sign_out_during_a_slow_refresh_stays_signed_out() {
    let (cfg, project) = serve(FakeProject {
        refresh_delay: Duration::from_millis(300),
        ..FakeProject::new(30, StatusCode::NO_CONTENT)
    })
    .await;
    let client = Arc::new(
        SupabaseClient::connect(&cfg, None)
            .await
            .expect("client init failed"),
    );
    let manager = SessionManager::spawn(client.clone(), client.clone())
        .await
        .expect("failed to spawn session manager");
    manager
        .wait_until_resolved()
        .await
        .expect("restoration never resolved");
    manager.sign_in(EMAIL, PASSWORD).await.expect("sign-in failed");

    // the token expires within the refresh margin, so any row read refreshes it
    let reader = tokio::spawn({
        let client = client.clone();
        async move { client.select(&RowQuery::from("vehicles")).await }
    });
    tokio::time::timeout(Duration::from_secs(2), async {
        while project.refreshes.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("refresh never started");

    manager.sign_out().await.expect("sign-out failed");
    assert!(!manager.is_authenticated());

    let _ = reader.await.expect("row read panicked");
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(client.get_session().await.expect("lookup failed"), None);
    assert!(!manager.is_authenticated());
    assert!(manager.vehicles().is_empty());
    assert_eq!(project.logouts.load(Ordering::SeqCst), 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn sign_up_handles_session_and_bare_user_responses() {
    let (cfg, _) = start(3600, StatusCode::NO_CONTENT).await;
    let client = SupabaseClient::connect(&cfg, None)
        .await
        .expect("client init failed");
    let mut events = client.subscribe();

    let pending = client
        .sign_up(PENDING_EMAIL, PASSWORD)
        .await
        .expect("sign-up failed");
    assert_eq!(pending.user.id, "u2");
    assert!(pending.session.is_none());
    assert_eq!(pending.generation, 0);
    assert_eq!(client.get_session().await.expect("lookup failed"), None);

    let immediate = client.sign_up(EMAIL, PASSWORD).await.expect("sign-up failed");
    let session = immediate.session.expect("no session returned");
    assert_eq!(session.access_token, "access-1");
    assert_eq!(immediate.user.id, "u1");

    let event = events.recv().await.expect("no auth event");
    assert_eq!(event.kind, AuthChangeKind::SignedIn);
    assert_eq!(event.generation, immediate.generation);
    assert_eq!(
        client.get_session().await.expect("lookup failed").map(|s| s.user.id).as_deref(),
        Some("u1")
    );
}

#[tokio::test]
async fn manager_sign_up_needs_confirmation_when_no_session_comes_back() {
    let (cfg, _) = start(3600, StatusCode::NO_CONTENT).await;
    let client = Arc::new(
        SupabaseClient::connect(&cfg, None)
            .await
            .expect("client init failed"),
    );
    let manager = SessionManager::spawn(client.clone(), client)
        .await
        .expect("failed to spawn session manager");
    manager
        .wait_until_resolved()
        .await
        .expect("restoration never resolved");

    let outcome = manager
        .sign_up(PENDING_EMAIL, PASSWORD)
        .await
        .expect("sign-up failed");
    assert!(outcome.requires_email_confirmation);
    assert!(!manager.is_authenticated());
    manager.shutdown().await;
}

#[tokio::test]
async fn sign_out_drops_the_session_even_when_logout_fails() {
    let (cfg, project) = start(3600, StatusCode::INTERNAL_SERVER_ERROR).await;
    let client = SupabaseClient::connect(&cfg, None)
        .await
        .expect("client init failed");
    client
        .sign_in_with_password(EMAIL, PASSWORD)
        .await
        .expect("sign-in failed");

    let err = client.sign_out().await.unwrap_err();
    assert_eq!(err.to_string(), "Request failed with status 500 Internal Server Error");
    assert_eq!(project.logouts.load(Ordering::SeqCst), 1);
    assert_eq!(client.get_session().await.expect("lookup failed"), None);
}

#[tokio::test]
async fn row_queries_carry_the_user_token_and_filters() {
    let (cfg, _) = start(3600, StatusCode::NO_CONTENT).await;
    let client = SupabaseClient::connect(&cfg, None)
        .await
        .expect("client init failed");

    // anonymous requests use the anon key as bearer
    let err = client
        .select(&RowQuery::from("vehicles").eq("user_id", "u1"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "JWT expired");

    client
        .sign_in_with_password(EMAIL, PASSWORD)
        .await
        .expect("sign-in failed");
    let ops = DataOps::new(Arc::new(client));
    let vehicles = ops.fetch_vehicles("u1").await.expect("fetch failed");
    let ids: Vec<&str> = vehicles.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids, vec!["v2", "v1"]);
}

#[tokio::test]
async fn not_null_recipient_rejection_means_no_admin() {
    let (cfg, _) = start(3600, StatusCode::NO_CONTENT).await;
    let client = SupabaseClient::connect(&cfg, None)
        .await
        .expect("client init failed");
    let ops = DataOps::new(Arc::new(client));

    let err = ops.send_message("u1", None, "engine light is on").await.unwrap_err();
    assert!(matches!(err, AutoPulseError::NoAdminAvailable));
}

#[tokio::test]
async fn session_manager_runs_against_the_http_client() {
    let (cfg, _) = start(3600, StatusCode::NO_CONTENT).await;
    let client = Arc::new(
        SupabaseClient::connect(&cfg, None)
            .await
            .expect("client init failed"),
    );
    let manager = SessionManager::spawn(client.clone(), client)
        .await
        .expect("failed to spawn session manager");
    manager
        .wait_until_resolved()
        .await
        .expect("restoration never resolved");

    manager.sign_in(EMAIL, PASSWORD).await.expect("sign-in failed");
    let mut rx = manager.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.vehicles.len() == 2))
        .await
        .expect("timed out waiting for vehicles")
        .expect("session actor stopped")
        .clone();
    assert_eq!(snapshot.current_vehicle.map(|v| v.id).as_deref(), Some("v2"));

    manager.sign_out().await.expect("sign-out failed");
    assert!(!manager.is_authenticated());
    assert!(manager.vehicles().is_empty());
    manager.shutdown().await;
}
