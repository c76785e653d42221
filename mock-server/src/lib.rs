use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "sid";
pub const CSRF_HEADER: &str = "x-csrf-token";

#[derive(Clone, Debug)]
pub struct Config {
    /// username -> password
    pub users: HashMap<String, String>,
    /// Answer `/csrf` with `{ token }` instead of `{ csrfToken }`.
    pub legacy_token_field: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            users: HashMap::from([("demo".to_string(), "demo-pass".to_string())]),
            legacy_token_field: false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Session {
    pub csrf: Option<String>,
    pub user: Option<String>,
}

pub struct AppState {
    config: Config,
    sessions: RwLock<HashMap<String, Session>>,
}

pub type Db = Arc<AppState>;

#[derive(Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ToProcessBody {
    pub tx: i64,
    #[serde(default)]
    pub params: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub msg: String,
}

pub fn app() -> Router {
    app_with(Config::default())
}

pub fn app_with(config: Config) -> Router {
    let db: Db = Arc::new(AppState {
        config,
        sessions: RwLock::new(HashMap::new()),
    });
    Router::new()
        .route("/csrf", get(issue_csrf))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/toProcess", post(to_process))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with(listener, Config::default()).await
}

pub async fn run_with(listener: TcpListener, config: Config) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(config)).await
}

fn error(status: StatusCode, code: &str, msg: &str) -> Response {
    let body = ErrorBody {
        code: code.to_string(),
        msg: msg.to_string(),
    };
    (status, Json(body)).into_response()
}

/// Value of the session cookie, if the request carries one.
pub fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

/// The session id when the request's CSRF header matches the token issued
/// to its session, a 403 otherwise.
fn check_csrf(sessions: &HashMap<String, Session>, headers: &HeaderMap) -> Result<String, Response> {
    let sent = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());
    let sid = session_id(headers).filter(|sid| {
        sessions
            .get(sid)
            .and_then(|s| s.csrf.as_deref())
            .is_some_and(|expected| Some(expected) == sent)
    });
    sid.ok_or_else(|| {
        debug!("rejecting request with missing or stale csrf token");
        error(StatusCode::FORBIDDEN, "csrfInvalid", "missing or invalid CSRF token")
    })
}

/// A request without a known `sid` cookie opens a new session. Sessions are
/// never expired; the store lives only as long as one test run or dev server.
async fn issue_csrf(State(db): State<Db>, headers: HeaderMap) -> Response {
    let mut sessions = db.sessions.write().await;
    let sid = session_id(&headers)
        .filter(|sid| sessions.contains_key(sid))
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // Each fetch rotates the token; the previous one stops being accepted.
    let token = Uuid::new_v4().simple().to_string();
    sessions.entry(sid.clone()).or_default().csrf = Some(token.clone());

    let field = if db.config.legacy_token_field { "token" } else { "csrfToken" };
    let mut body = Map::new();
    body.insert(field.to_string(), Value::String(token));

    let cookie = format!("{SESSION_COOKIE}={sid}; Path=/; HttpOnly; SameSite=Lax");
    ([(header::SET_COOKIE, cookie)], Json(Value::Object(body))).into_response()
}

async fn login(State(db): State<Db>, headers: HeaderMap, Json(input): Json<LoginBody>) -> Response {
    let mut sessions = db.sessions.write().await;
    let sid = match check_csrf(&sessions, &headers) {
        Ok(sid) => sid,
        Err(rejection) => return rejection,
    };

    if db.config.users.get(&input.username) != Some(&input.password) {
        return error(StatusCode::UNAUTHORIZED, "badCreds", "invalid");
    }
    info!(user = %input.username, "login");
    if let Some(session) = sessions.get_mut(&sid) {
        session.user = Some(input.username.clone());
    }
    Json(json!({ "user": input.username })).into_response()
}

async fn logout(State(db): State<Db>, headers: HeaderMap) -> Response {
    let mut sessions = db.sessions.write().await;
    let sid = match check_csrf(&sessions, &headers) {
        Ok(sid) => sid,
        Err(rejection) => return rejection,
    };
    if let Some(user) = sessions.get_mut(&sid).and_then(|s| s.user.take()) {
        info!(%user, "logout");
    }
    Json(json!({ "loggedOut": true })).into_response()
}

async fn to_process(State(db): State<Db>, headers: HeaderMap, Json(input): Json<ToProcessBody>) -> Response {
    let sessions = db.sessions.read().await;
    let sid = match check_csrf(&sessions, &headers) {
        Ok(sid) => sid,
        Err(rejection) => return rejection,
    };
    let Some(user) = sessions.get(&sid).and_then(|s| s.user.clone()) else {
        return error(StatusCode::UNAUTHORIZED, "notAuthenticated", "login required");
    };
    if input.params.is_array() {
        return error(StatusCode::BAD_REQUEST, "badParams", "params must not be an array");
    }
    debug!(tx = input.tx, %user, "toProcess");
    Json(json!({ "tx": input.tx, "params": input.params, "user": user })).into_response()
}
