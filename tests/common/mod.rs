//! In-process stand-in for the town hall backend. Issues signed JWT access
//! tokens and opaque refresh tokens, and records what the client sent.
#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Form, Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use townhall_client::{
    ApiClient, Config, LoginRedirect, Portal, SessionStorage, SessionStore, UserProfile, UserRole,
};

pub const ADMIN_EMAIL: &str = "admin@primarie.ro";
pub const ADMIN_PASSWORD: &str = "admin123";

const SECRET: &[u8] = b"mock-backend-secret";
const ACCESS_TTL_SECONDS: i64 = 1800;
const STALLED_REFRESH: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    jti: String,
    exp: i64,
    iat: i64,
    #[serde(rename = "type")]
    token_type: String,
}

#[derive(Default)]
pub struct BackendState {
    refresh_tokens: Mutex<HashSet<String>>,
    pub refresh_calls: AtomicUsize,
    pub reject_refresh: AtomicBool,
    pub rotate_refresh_tokens: AtomicBool,
    /// Refresh answers only after `STALLED_REFRESH`, past any test client's timeout.
    pub stall_refresh: AtomicBool,
    /// (path, Authorization header) for every protected request, in order.
    pub seen: Mutex<Vec<(String, Option<String>)>>,
}

impl BackendState {
    pub fn issue_access_token(&self, expires_at: DateTime<Utc>) -> String {
        let claims = AccessClaims {
            sub: "1".into(),
            jti: Uuid::new_v4().to_string(),
            exp: expires_at.timestamp(),
            iat: Utc::now().timestamp(),
            token_type: "access".into(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    pub fn issue_refresh_token(&self) -> String {
        let token = Uuid::new_v4().to_string();
        self.refresh_tokens.lock().unwrap().insert(token.clone());
        token
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.seen.lock().unwrap().iter().filter(|(p, _)| p == path).count()
    }

    pub fn auth_headers(&self, path: &str) -> Vec<Option<String>> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, h)| h.clone())
            .collect()
    }

    fn record(&self, path: &str, headers: &HeaderMap) -> Option<String> {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.seen.lock().unwrap().push((path.to_string(), auth.clone()));
        auth.and_then(|a| a.strip_prefix("Bearer ").map(str::to_string))
    }

    /// Returns the bearer token if it is a valid, unexpired access token.
    fn authorize(&self, path: &str, headers: &HeaderMap) -> Result<String, Response> {
        let token = self.record(path, headers).ok_or_else(|| unauthorized("Not authenticated"))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        decode::<AccessClaims>(&token, &DecodingKey::from_secret(SECRET), &validation)
            .map(|_| token)
            .map_err(|_| unauthorized("Could not validate credentials"))
    }
}

pub fn admin_profile() -> UserProfile {
    UserProfile {
        id: 1,
        email: ADMIN_EMAIL.into(),
        full_name: "Administrator Primarie".into(),
        role: UserRole::Admin,
        permissions: vec!["complaints.manage".into(), "reports.view".into()],
        is_superuser: false,
    }
}

fn unauthorized(detail: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "detail": detail }))).into_response()
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct RefreshBody {
    refresh_token: String,
}

type Shared = State<Arc<BackendState>>;

async fn login(State(state): Shared, Form(form): Form<LoginForm>) -> Response {
    if form.username != ADMIN_EMAIL || form.password != ADMIN_PASSWORD {
        return unauthorized("Incorrect email or password");
    }

    let access_token = state.issue_access_token(Utc::now() + Duration::seconds(ACCESS_TTL_SECONDS));
    let refresh_token = state.issue_refresh_token();
    Json(json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "token_type": "bearer",
        "expires_in": ACCESS_TTL_SECONDS,
        "refresh_expires_in": 7 * 86400,
        "user": admin_profile(),
    }))
    .into_response()
}

async fn refresh(State(state): Shared, Json(body): Json<RefreshBody>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    if state.stall_refresh.load(Ordering::SeqCst) {
        tokio::time::sleep(STALLED_REFRESH).await;
    }

    let known = state.refresh_tokens.lock().unwrap().contains(&body.refresh_token);
    if !known || state.reject_refresh.load(Ordering::SeqCst) {
        return unauthorized("Invalid refresh token");
    }

    let access_token = state.issue_access_token(Utc::now() + Duration::seconds(ACCESS_TTL_SECONDS));
    let mut payload = json!({
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": ACCESS_TTL_SECONDS,
    });
    if state.rotate_refresh_tokens.load(Ordering::SeqCst) {
        payload["refresh_token"] = json!(state.issue_refresh_token());
    }
    Json(payload).into_response()
}

async fn logout(State(state): Shared, Json(body): Json<RefreshBody>) -> Response {
    state.refresh_tokens.lock().unwrap().remove(&body.refresh_token);
    Json(json!({ "message": "Logged out" })).into_response()
}

async fn me(State(state): Shared, headers: HeaderMap) -> Response {
    match state.authorize("/auth/me", &headers) {
        Ok(_) => {
            let mut profile = admin_profile();
            profile.full_name = "Administrator Principal".into();
            Json(profile).into_response()
        }
        Err(rejection) => rejection,
    }
}

async fn admin_stats(State(state): Shared, headers: HeaderMap) -> Response {
    match state.authorize("/admin/stats", &headers) {
        Ok(token) => Json(json!({
            "open_complaints": 12,
            "appointments_today": 4,
            "served_with": token,
        }))
        .into_response(),
        Err(rejection) => rejection,
    }
}

async fn admin_audit(State(state): Shared, headers: HeaderMap) -> Response {
    if let Err(rejection) = state.authorize("/admin/audit", &headers) {
        return rejection;
    }
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "detail": "Not enough permissions" })),
    )
        .into_response()
}

async fn create_complaint(State(state): Shared, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Err(rejection) = state.authorize("/complaints", &headers) {
        return rejection;
    }
    let title = body.get("title").and_then(Value::as_str).unwrap_or_default();
    if title.is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "detail": [{ "loc": ["body", "title"], "msg": "title is required" }] })),
        )
            .into_response();
    }
    (StatusCode::CREATED, Json(json!({ "id": 31, "title": title, "status": "registered" })))
        .into_response()
}

async fn delete_complaint(State(state): Shared, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Err(rejection) = state.authorize(&format!("/complaints/{id}"), &headers) {
        return rejection;
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn always_unauthorized(State(state): Shared, headers: HeaderMap) -> Response {
    state.record("/locked", &headers);
    unauthorized("Account locked")
}

async fn broken() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": "Payment gateway unavailable" })),
    )
        .into_response()
}

pub struct MockBackend {
    pub base_url: String,
    pub state: Arc<BackendState>,
}

pub async fn spawn_backend() -> MockBackend {
    let state = Arc::new(BackendState::default());

    let api = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/admin/stats", get(admin_stats))
        .route("/admin/audit", get(admin_audit))
        .route("/complaints", post(create_complaint))
        .route("/complaints/{id}", delete(delete_complaint))
        .route("/locked", get(always_unauthorized))
        .route("/payments/gateway", get(broken))
        .with_state(state.clone());
    let app = Router::new().nest("/api/v1", api);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockBackend {
        base_url: format!("http://{addr}/api/v1"),
        state,
    }
}

/// Counts forced-logout redirects and remembers the last portal.
#[derive(Default)]
pub struct RecordingRedirect {
    count: AtomicUsize,
    last: Mutex<Option<Portal>>,
}

impl RecordingRedirect {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn last_portal(&self) -> Option<Portal> {
        *self.last.lock().unwrap()
    }
}

impl LoginRedirect for RecordingRedirect {
    fn redirect_to_login(&self, portal: Portal) {
        self.count.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(portal);
    }
}

pub fn client_with_storage(
    backend: &MockBackend,
    storage: impl SessionStorage + 'static,
) -> (ApiClient, Arc<RecordingRedirect>) {
    client_with_config(Config::default().with_base_url(&backend.base_url), storage)
}

pub fn client_with_config(
    config: Config,
    storage: impl SessionStorage + 'static,
) -> (ApiClient, Arc<RecordingRedirect>) {
    let redirect = Arc::new(RecordingRedirect::default());
    let session = Arc::new(SessionStore::open(storage).unwrap());
    let api = ApiClient::new(&config, session, redirect.clone()).unwrap();
    (api, redirect)
}

pub fn client(backend: &MockBackend) -> (ApiClient, Arc<RecordingRedirect>) {
    client_with_storage(backend, townhall_client::MemoryStorage::new())
}
