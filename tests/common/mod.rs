//! In-process mock of the job-board auth API.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use jobboard_session::client::RefreshState;
use jobboard_session::config::RefreshConfig;
use jobboard_session::scheduler::{BackgroundRefresher, Scheduler, TimerHandle, TokioScheduler};
use jobboard_session::storage::{DurableStore, EphemeralStore, TokenStorage};
use jobboard_session::{AuthStore, LogoutSignal, SessionClient};

pub const PASSWORD: &str = "correct-horse";
pub const EMAIL: &str = "dev@example.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    Rotate,
    KeepRefreshToken,
    Reject,
    Malformed,
}

/// Server-side view of the session plus per-endpoint call counters.
pub struct Backend {
    pub access_token: Mutex<String>,
    pub refresh_token: Mutex<String>,
    pub refresh_mode: Mutex<RefreshMode>,
    pub refresh_delay: Mutex<Duration>,
    pub forbid_vacancies: AtomicBool,
    pub fail_logout: AtomicBool,
    pub revoked: Mutex<Vec<String>>,
    issued: AtomicUsize,

    pub login_calls: AtomicUsize,
    pub register_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub me_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub vacancies_calls: AtomicUsize,
    pub unauthorized_calls: AtomicUsize,
}

impl Backend {
    fn new() -> Self {
        Self {
            access_token: Mutex::new("access-0".to_string()),
            refresh_token: Mutex::new("refresh-0".to_string()),
            refresh_mode: Mutex::new(RefreshMode::Rotate),
            refresh_delay: Mutex::new(Duration::ZERO),
            forbid_vacancies: AtomicBool::new(false),
            fail_logout: AtomicBool::new(false),
            revoked: Mutex::new(Vec::new()),
            issued: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            me_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            vacancies_calls: AtomicUsize::new(0),
            unauthorized_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_refresh_mode(&self, mode: RefreshMode) {
        *self.refresh_mode.lock().unwrap() = mode;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn valid_access(&self) -> String {
        self.access_token.lock().unwrap().clone()
    }

    pub fn valid_refresh(&self) -> String {
        self.refresh_token.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        [
            &self.login_calls,
            &self.register_calls,
            &self.refresh_calls,
            &self.me_calls,
            &self.logout_calls,
            &self.vacancies_calls,
            &self.unauthorized_calls,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }

    fn issue(&self) -> (String, String) {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let access = format!("access-{n}");
        let refresh = format!("refresh-{n}");
        *self.access_token.lock().unwrap() = access.clone();
        *self.refresh_token.lock().unwrap() = refresh.clone();
        (access, refresh)
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        bearer(headers).is_some_and(|token| token == self.valid_access())
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": "Could not validate credentials"})),
    )
        .into_response()
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

#[derive(Deserialize)]
struct RegisterBody {
    username: String,
    email: String,
}

async fn login(State(backend): State<Arc<Backend>>, Form(form): Form<LoginForm>) -> Response {
    backend.login_calls.fetch_add(1, Ordering::SeqCst);
    if form.username != EMAIL || form.password != PASSWORD {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Incorrect email or password"})),
        )
            .into_response();
    }
    let (access, refresh) = backend.issue();
    Json(json!({"access_token": access, "refresh_token": refresh, "token_type": "bearer"}))
        .into_response()
}

async fn register(
    State(backend): State<Arc<Backend>>,
    Json(body): Json<RegisterBody>,
) -> Response {
    backend.register_calls.fetch_add(1, Ordering::SeqCst);
    if body.email == EMAIL {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Email already registered"})),
        )
            .into_response();
    }
    Json(json!({"id": 2, "email": body.email, "is_active": true, "username": body.username}))
        .into_response()
}

async fn refresh(State(backend): State<Arc<Backend>>, Json(body): Json<RefreshBody>) -> Response {
    backend.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = *backend.refresh_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mode = *backend.refresh_mode.lock().unwrap();
    if mode == RefreshMode::Reject || body.refresh_token != backend.valid_refresh() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Invalid or expired refresh token"})),
        )
            .into_response();
    }

    match mode {
        RefreshMode::Malformed => Json(json!({"token_type": "bearer"})).into_response(),
        RefreshMode::KeepRefreshToken => {
            let current_refresh = backend.valid_refresh();
            let (access, _) = backend.issue();
            *backend.refresh_token.lock().unwrap() = current_refresh;
            Json(json!({"access_token": access})).into_response()
        }
        _ => {
            let (access, refresh) = backend.issue();
            Json(json!({"access_token": access, "refresh_token": refresh, "token_type": "bearer"}))
                .into_response()
        }
    }
}

async fn me(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    backend.me_calls.fetch_add(1, Ordering::SeqCst);
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    Json(json!({
        "id": 1,
        "email": EMAIL,
        "is_active": true,
        "role": "user",
        "grade": "Middle",
        "skills": ["rust", "postgresql"],
    }))
    .into_response()
}

async fn logout(State(backend): State<Arc<Backend>>, Json(body): Json<RefreshBody>) -> Response {
    backend.logout_calls.fetch_add(1, Ordering::SeqCst);
    if backend.fail_logout.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    backend.revoked.lock().unwrap().push(body.refresh_token);
    Json(json!({"message": "Successfully logged out"})).into_response()
}

async fn vacancies(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    backend.vacancies_calls.fetch_add(1, Ordering::SeqCst);
    if backend.forbid_vacancies.load(Ordering::SeqCst) {
        return (StatusCode::FORBIDDEN, Json(json!({"detail": "Access denied"}))).into_response();
    }
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    Json(json!([{"id": 10, "title": "Rust Engineer"}])).into_response()
}

async fn always_unauthorized(State(backend): State<Arc<Backend>>) -> Response {
    backend.unauthorized_calls.fetch_add(1, Ordering::SeqCst);
    unauthorized()
}

/// Start the mock API on an ephemeral port and return its base URL.
pub async fn spawn_backend() -> (Arc<Backend>, String) {
    let backend = Arc::new(Backend::new());
    let app = Router::new()
        .route("/api/auth/token", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/me", get(me))
        .route("/api/auth/logout", post(logout))
        .route("/api/vacancies", get(vacancies))
        .route("/api/always-unauthorized", get(always_unauthorized))
        .with_state(Arc::clone(&backend));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (backend, format!("http://{addr}/api"))
}

struct PendingTimer {
    delay: Duration,
    task: BoxFuture<'static, ()>,
    token: CancellationToken,
}

/// Timers fire only when the test calls [`ManualScheduler::fire_next`].
#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<Vec<PendingTimer>>,
}

impl ManualScheduler {
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .filter(|timer| !timer.token.is_cancelled())
            .map(|timer| timer.delay)
            .collect()
    }

    /// Run the oldest live timer to completion; `false` if none is pending.
    pub async fn fire_next(&self) -> bool {
        let next = {
            let mut pending = self.pending.lock().unwrap();
            pending.retain(|timer| !timer.token.is_cancelled());
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0))
            }
        };
        match next {
            Some(timer) => {
                timer.task.await;
                true
            }
            None => false,
        }
    }
}

impl Scheduler for ManualScheduler {
    fn after(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle {
        let token = CancellationToken::new();
        self.pending.lock().unwrap().push(PendingTimer {
            delay,
            task,
            token: token.clone(),
        });
        TimerHandle::new(token)
    }
}

/// A fully wired client stack talking to a fresh mock backend.
pub struct TestEnv {
    pub backend: Arc<Backend>,
    pub client: SessionClient,
    pub store: AuthStore,
    pub tokens: TokenStorage,
    pub durable: Arc<DurableStore>,
    pub ephemeral: Arc<EphemeralStore>,
    pub forced_logouts: Arc<AtomicUsize>,
    _temp: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_scheduler(Arc::new(TokioScheduler)).await
    }

    /// Same stack, with background refresh timers under the test's control.
    pub async fn with_manual_timers() -> (Self, Arc<ManualScheduler>) {
        let scheduler = Arc::new(ManualScheduler::default());
        let env = Self::with_scheduler(scheduler.clone()).await;
        (env, scheduler)
    }

    pub async fn with_scheduler(scheduler: Arc<dyn Scheduler>) -> Self {
        let (backend, base_url) = spawn_backend().await;

        let temp = TempDir::new().unwrap();
        let durable = Arc::new(DurableStore::open(temp.path()).unwrap());
        let ephemeral = Arc::new(EphemeralStore::new());
        let tokens = TokenStorage::new(durable.clone(), ephemeral.clone());

        // Proxy disabled so sandboxed environments reach the local listener
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let client = SessionClient::from_parts(
            &base_url,
            http,
            tokens.clone(),
            LogoutSignal::new(),
            RefreshState::default(),
        );
        let refresher = BackgroundRefresher::new(
            scheduler,
            Arc::new(client.clone()),
            &RefreshConfig::default(),
        );
        let store = AuthStore::new(client.clone(), refresher);

        let forced_logouts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&forced_logouts);
        store.on_forced_logout(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        Self {
            backend,
            client,
            store,
            tokens,
            durable,
            ephemeral,
            forced_logouts,
            _temp: temp,
        }
    }

    /// Make the server stop accepting the access token the client holds.
    pub fn expire_access_token(&self) {
        *self.backend.access_token.lock().unwrap() = "rotated-server-side".to_string();
    }

    pub fn forced_logout_count(&self) -> usize {
        self.forced_logouts.load(Ordering::SeqCst)
    }
}
