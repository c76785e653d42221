//! Authenticated request pipeline and the public operations.
//!
//! # Design
//! Every operation is a POST that goes through `submit`: ensure a CSRF
//! token, decorate the request, hand it to the transport, classify the
//! response. Each step returns a `Failure`, and `submit` is the single seam
//! where a `Failure` is normalized into `ApiResult::Err`, so no operation
//! needs error handling of its own.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::csrf::CsrfTokenManager;
use crate::error::{normalize_error, ErrorInfo, ErrorKind, Failure};
use crate::http::{HttpMethod, HttpRequest, Transport};
use crate::types::{ApiResult, LoginBody, ProcessParams, ToProcessBody};

pub const LOGIN_PATH: &str = "/login";
pub const LOGOUT_PATH: &str = "/logout";
pub const TO_PROCESS_PATH: &str = "/toProcess";

/// Client for a cookie-session + CSRF-token backend.
///
/// Owns its token cache; two clients only share a cache when built with
/// [`ApiClient::with_tokens`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    tokens: Arc<CsrfTokenManager>,
    config: ClientConfig,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let tokens = Arc::new(CsrfTokenManager::new(transport.clone(), config.csrf_path.clone()));
        Self {
            transport,
            tokens,
            config,
        }
    }

    /// Build a client on top of an existing token manager, sharing its cache.
    pub fn with_tokens(transport: Arc<dyn Transport>, tokens: Arc<CsrfTokenManager>, config: ClientConfig) -> Self {
        Self {
            transport,
            tokens,
            config,
        }
    }

    /// Client talking to `base_url` over reqwest with a cookie store.
    #[cfg(feature = "reqwest-transport")]
    pub fn connect(base_url: &str) -> Result<Self, crate::http::TransportError> {
        let transport = crate::transport::ReqwestTransport::new(base_url)?;
        Ok(Self::new(Arc::new(transport)))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn tokens(&self) -> &Arc<CsrfTokenManager> {
        &self.tokens
    }

    /// Current CSRF token, fetched if needed.
    pub async fn ensure_token(&self) -> ApiResult<String> {
        self.tokens.ensure_token().await.map_err(normalize_error).into()
    }

    pub async fn login(&self, user: &str, pass: &str) -> ApiResult<Value> {
        let body = LoginBody {
            username: user.to_string(),
            password: pass.to_string(),
        };
        self.post_json(LOGIN_PATH, &body).await
    }

    pub async fn logout(&self) -> ApiResult<Value> {
        self.submit(LOGOUT_PATH, json!({})).await
    }

    pub async fn to_process(&self, tx: i64, params: Option<ProcessParams>) -> ApiResult<Value> {
        self.post_json(TO_PROCESS_PATH, &ToProcessBody { tx, params }).await
    }

    /// Forget the cached CSRF token, e.g. after the session cookies were
    /// cleared.
    pub fn reset_csrf(&self) {
        self.tokens.invalidate();
    }

    /// POST `body` to `path` with the CSRF token attached.
    pub async fn submit(&self, path: &str, body: Value) -> ApiResult<Value> {
        self.send(path, &body).await.map_err(normalize_error).into()
    }

    /// Like [`ApiClient::submit`] for any serializable body.
    pub async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> ApiResult<Value> {
        match serde_json::to_value(body) {
            Ok(body) => self.submit(path, body).await,
            Err(e) => ApiResult::Err(ErrorInfo::new(
                ErrorKind::InvalidRequest.as_str(),
                format!("request body for {path} is not valid JSON: {e}"),
            )),
        }
    }

    pub fn build_post(&self, path: &str, token: &str, body: &Value) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Post,
            path: path.to_string(),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                (self.config.csrf_header.clone(), token.to_string()),
            ],
            body: Some(body.to_string()),
        }
    }

    async fn send(&self, path: &str, body: &Value) -> Result<Value, Failure> {
        let token = self.tokens.ensure_token().await?;
        if !is_header_name(&self.config.csrf_header) {
            return Err(invalid_request(format!(
                "{:?} is not a valid header name",
                self.config.csrf_header
            )));
        }
        if !is_header_value(&token) {
            warn!(path, "csrf token cannot be sent as a header value, dropping it");
            self.tokens.invalidate_if(&token);
            return Err(invalid_request(
                "CSRF token from /csrf contains characters not allowed in a header".to_string(),
            ));
        }
        let request = self.build_post(path, &token, body);
        let response = self.transport.execute(request).await?;
        debug!(path, status = response.status, "request completed");

        if response.is_success() {
            return Ok(parse_body(&response.body));
        }
        if response.status == 403 && self.config.invalidate_on_forbidden {
            warn!(path, "request forbidden, dropping cached csrf token");
            self.tokens.invalidate_if(&token);
        }
        Err(Failure::from_response(&response))
    }
}

fn invalid_request(msg: String) -> Failure {
    Failure::Internal(ErrorInfo::new(ErrorKind::InvalidRequest.as_str(), msg))
}

/// RFC 9110 field-name: a non-empty token.
fn is_header_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

/// Visible ASCII, space and tab only.
fn is_header_value(value: &str) -> bool {
    value.bytes().all(|b| b == b'\t' || (b' '..=b'~').contains(&b))
}

/// Payload of a 2xx response: `null` when empty, the text itself when it is
/// not JSON.
fn parse_body(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NETWORK_ERROR_MSG;
    use crate::http::TransportError;
    use crate::testing::ScriptedTransport;

    fn client(transport: &Arc<ScriptedTransport>) -> ApiClient {
        ApiClient::new(transport.clone())
    }

    fn with_token(token: &str) -> Arc<ScriptedTransport> {
        let transport = ScriptedTransport::new();
        transport.reply(200, json!({"csrfToken": token}));
        transport
    }

    #[tokio::test]
    async fn submit_returns_parsed_payload() {
        let transport = with_token("abc");
        let payload = json!({"user": "ana", "roles": ["admin"], "n": 1.5});
        transport.reply(200, payload.clone());
        let result = client(&transport).submit("/anything", json!({"x": 1})).await;
        assert_eq!(result, ApiResult::Ok(payload));
    }

    #[tokio::test]
    async fn submit_empty_body_is_null() {
        let transport = with_token("abc");
        transport.reply_raw(204, "");
        let result = client(&transport).logout().await;
        assert_eq!(result, ApiResult::Ok(Value::Null));
    }

    #[tokio::test]
    async fn submit_non_json_body_is_text() {
        let transport = with_token("abc");
        transport.reply_raw(200, "done");
        let result = client(&transport).logout().await;
        assert_eq!(result, ApiResult::Ok(json!("done")));
    }

    #[tokio::test]
    async fn login_sends_credentials_with_headers() {
        let transport = with_token("abc");
        transport.reply(200, json!({"user": "ana"}));
        let result = client(&transport).login("ana", "secret").await;
        assert!(result.is_ok());

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, HttpMethod::Get);
        assert_eq!(requests[0].path, "/csrf");

        let login = &requests[1];
        assert_eq!(login.method, HttpMethod::Post);
        assert_eq!(login.path, "/login");
        assert_eq!(login.header("content-type"), Some("application/json"));
        assert_eq!(login.header("x-csrf-token"), Some("abc"));
        let body: Value = serde_json::from_str(login.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"username": "ana", "password": "secret"}));
    }

    #[tokio::test]
    async fn logout_sends_empty_object_with_token() {
        let transport = with_token("abc");
        transport.reply(200, json!({"loggedOut": true}));
        client(&transport).logout().await;

        let logout = &transport.requests()[1];
        assert_eq!(logout.path, "/logout");
        assert_eq!(logout.header("X-CSRF-Token"), Some("abc"));
        assert_eq!(logout.body.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn to_process_sends_tx_and_params() {
        let transport = with_token("abc");
        transport.reply(200, json!({"ok": 1}));
        let api = client(&transport);
        let params = ProcessParams::try_from(json!({"a": 1})).unwrap();
        api.to_process(5, Some(params)).await;

        let request = &transport.requests()[1];
        assert_eq!(request.path, "/toProcess");
        assert_eq!(request.header("X-CSRF-Token"), api.tokens().cached().as_deref());
        let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"tx": 5, "params": {"a": 1}}));
    }

    #[tokio::test]
    async fn to_process_without_params_omits_field() {
        let transport = with_token("abc");
        transport.reply(200, json!({}));
        client(&transport).to_process(7, None).await;

        let body: Value = serde_json::from_str(transport.requests()[1].body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"tx": 7}));
    }

    #[tokio::test]
    async fn token_is_fetched_once_across_operations() {
        let transport = with_token("abc");
        transport.reply(200, json!({}));
        transport.reply(200, json!({}));
        let api = client(&transport);
        api.login("ana", "secret").await;
        api.to_process(1, Some("x".into())).await;
        assert_eq!(transport.count("/csrf"), 1);
    }

    #[tokio::test]
    async fn reset_csrf_triggers_refetch() {
        let transport = with_token("one");
        transport.reply(200, json!({}));
        transport.reply(200, json!({"csrfToken": "two"}));
        transport.reply(200, json!({}));
        let api = client(&transport);
        api.logout().await;
        api.reset_csrf();
        api.logout().await;

        let requests = transport.requests();
        assert_eq!(transport.count("/csrf"), 2);
        assert_eq!(requests[3].header("X-CSRF-Token"), Some("two"));
    }

    #[tokio::test]
    async fn backend_error_is_passed_through() {
        let transport = with_token("abc");
        transport.reply(401, json!({"code": "badCreds", "msg": "invalid"}));
        let result = client(&transport).login("ana", "wrong").await;
        assert_eq!(result, ApiResult::Err(ErrorInfo::new("badCreds", "invalid")));
    }

    #[tokio::test]
    async fn network_error_on_post_is_normalized() {
        let transport = with_token("abc");
        transport.fail(TransportError::new("http://localhost:3000/logout", "connection refused"));
        let result = client(&transport).logout().await;
        let error = result.error().unwrap();
        assert!(error.is(ErrorKind::NetworkOrUnknown));
        assert_eq!(error.status, Some(0));
        assert_eq!(error.msg, NETWORK_ERROR_MSG);
    }

    #[tokio::test]
    async fn network_error_on_csrf_fetch_sends_nothing() {
        let transport = ScriptedTransport::new();
        transport.fail(TransportError::new("http://localhost:3000/csrf", "connection refused"));
        let result = client(&transport).login("ana", "secret").await;
        assert!(result.error().unwrap().is(ErrorKind::NetworkOrUnknown));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn csrf_missing_surfaces_through_operations() {
        let transport = ScriptedTransport::new();
        transport.reply(200, json!({}));
        let result = client(&transport).logout().await;
        let error = result.error().unwrap();
        assert!(error.is(ErrorKind::CsrfMissing));
        assert_eq!(error.raw, Some(json!({})));
        assert_eq!(transport.count("/logout"), 0);
    }

    #[tokio::test]
    async fn forbidden_drops_cached_token_without_retry() {
        let transport = with_token("stale");
        transport.reply(403, json!({"code": "csrfInvalid", "msg": "bad token"}));
        let api = client(&transport);
        let result = api.logout().await;
        assert_eq!(result.error().map(|e| e.code.as_str()), Some("csrfInvalid"));
        assert!(api.tokens().cached().is_none());
        assert_eq!(transport.count("/logout"), 1);
    }

    #[tokio::test]
    async fn late_forbidden_keeps_newer_token() {
        let transport = with_token("old");
        transport.reply(403, json!({"code": "csrfInvalid", "msg": "bad token"}));
        transport.reply(200, json!({"csrfToken": "new"}));
        let api = client(&transport);

        // `b` shares the cache and refreshes it while `a`'s request is in flight.
        let b = ApiClient::with_tokens(transport.clone(), api.tokens().clone(), ClientConfig::default());
        api.ensure_token().await;
        let (result, _) = tokio::join!(api.logout(), async {
            tokio::task::yield_now().await;
            b.reset_csrf();
            b.ensure_token().await
        });

        assert_eq!(result.error().map(|e| e.code.as_str()), Some("csrfInvalid"));
        assert_eq!(api.tokens().cached().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn unsendable_token_is_an_invalid_request() {
        let transport = with_token("bad\ntoken");
        let api = client(&transport);
        let result = api.logout().await;

        let error = result.error().unwrap();
        assert!(error.is(ErrorKind::InvalidRequest));
        assert_eq!(error.status, None);
        assert_eq!(transport.count("/logout"), 0);
        assert!(api.tokens().cached().is_none());
    }

    #[tokio::test]
    async fn unsendable_header_name_is_an_invalid_request() {
        let transport = with_token("abc");
        let config = ClientConfig {
            csrf_header: "X CSRF".to_string(),
            ..ClientConfig::default()
        };
        let api = ApiClient::with_config(transport.clone(), config);
        let result = api.logout().await;
        assert!(result.error().unwrap().is(ErrorKind::InvalidRequest));
        assert_eq!(transport.count("/logout"), 0);
        assert_eq!(api.tokens().cached().as_deref(), Some("abc"));
    }

    #[test]
    fn header_checks() {
        assert!(is_header_name("X-CSRF-Token"));
        assert!(!is_header_name(""));
        assert!(!is_header_name("X:Token"));
        assert!(is_header_value("a1b2 c3\td4"));
        assert!(!is_header_value("a\r\nSet-Cookie: x"));
    }

    #[tokio::test]
    async fn forbidden_keeps_token_when_disabled() {
        let transport = with_token("abc");
        transport.reply(403, json!({"code": "denied", "msg": "no"}));
        let config = ClientConfig {
            invalidate_on_forbidden: false,
            ..ClientConfig::default()
        };
        let api = ApiClient::with_config(transport.clone(), config);
        api.logout().await;
        assert_eq!(api.tokens().cached().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn custom_csrf_path_and_header() {
        let transport = with_token("abc");
        transport.reply(200, json!({}));
        let config = ClientConfig {
            csrf_path: "/api/csrf".to_string(),
            csrf_header: "X-XSRF-TOKEN".to_string(),
            ..ClientConfig::default()
        };
        ApiClient::with_config(transport.clone(), config).logout().await;

        let requests = transport.requests();
        assert_eq!(requests[0].path, "/api/csrf");
        assert_eq!(requests[1].header("X-XSRF-TOKEN"), Some("abc"));
    }

    #[tokio::test]
    async fn clients_do_not_share_tokens_unless_asked() {
        let transport = with_token("one");
        transport.reply(200, json!({"csrfToken": "two"}));
        let a = client(&transport);
        let b = client(&transport);
        assert_eq!(a.ensure_token().await, ApiResult::Ok("one".to_string()));
        assert_eq!(b.ensure_token().await, ApiResult::Ok("two".to_string()));

        let shared = ApiClient::with_tokens(transport.clone(), a.tokens().clone(), ClientConfig::default());
        assert_eq!(shared.ensure_token().await, ApiResult::Ok("one".to_string()));
        assert_eq!(transport.count("/csrf"), 2);
    }
}
