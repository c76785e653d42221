//! CSRF token acquisition and caching.
//!
//! # Design
//! `CsrfTokenManager` owns the only mutable state in the client: the cached
//! token. A hit is answered before the first `.await`, so a cached
//! `ensure_token` completes on its first poll. A miss takes the fetch lock;
//! callers that miss concurrently queue on that lock. When they get it they
//! take the outcome of the fetch that finished while they waited (the token,
//! or the same `Failure`), so one `/csrf` round-trip serves them all.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{ErrorInfo, ErrorKind, Failure};
use crate::http::{HttpMethod, HttpRequest, Transport};

const CSRF_MISSING_MSG: &str = "CSRF token missing from /csrf response (expected csrfToken/token)";

pub struct CsrfTokenManager {
    transport: Arc<dyn Transport>,
    path: String,
    token: RwLock<Option<String>>,
    /// Failure of the most recent fetch, handed to callers that queued on it.
    fetch: Mutex<Option<Failure>>,
    /// Number of finished fetches. Only written while `fetch` is held.
    fetches: AtomicU64,
}

impl CsrfTokenManager {
    pub fn new(transport: Arc<dyn Transport>, path: impl Into<String>) -> Self {
        Self {
            transport,
            path: path.into(),
            token: RwLock::new(None),
            fetch: Mutex::new(None),
            fetches: AtomicU64::new(0),
        }
    }

    /// The cached token, without fetching.
    pub fn cached(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Return the cached token, fetching it first if there is none.
    ///
    /// Non-2xx and network failures of the fetch are returned as-is; a 2xx
    /// body without a usable token is `CsrfMissing`.
    pub async fn ensure_token(&self) -> Result<String, Failure> {
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let seen = self.fetches.load(Ordering::Acquire);
        let mut last_failure = self.fetch.lock().await;
        if let Some(token) = self.cached() {
            debug!("csrf token fetched by a concurrent caller");
            return Ok(token);
        }
        if self.fetches.load(Ordering::Acquire) != seen {
            if let Some(failure) = last_failure.as_ref() {
                debug!("csrf fetch by a concurrent caller failed");
                return Err(failure.clone());
            }
        }

        let outcome = self.fetch_token().await;
        match &outcome {
            Ok(token) => {
                *self.token.write() = Some(token.clone());
                *last_failure = None;
            }
            Err(failure) => *last_failure = Some(failure.clone()),
        }
        self.fetches.fetch_add(1, Ordering::Release);
        outcome
    }

    /// Drop the cached token. The next `ensure_token` fetches a new one.
    pub fn invalidate(&self) {
        if self.token.write().take().is_some() {
            debug!("csrf token invalidated");
        }
    }

    /// Drop the cached token only if it is still `token`. A rejection of a
    /// request that carried an older token leaves a newer one in place.
    pub fn invalidate_if(&self, token: &str) {
        let mut cached = self.token.write();
        if cached.as_deref() == Some(token) {
            cached.take();
            debug!("csrf token invalidated");
        }
    }

    pub fn build_fetch_request(&self) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            path: self.path.clone(),
            headers: Vec::new(),
            body: None,
        }
    }

    async fn fetch_token(&self) -> Result<String, Failure> {
        debug!(path = %self.path, "fetching csrf token");
        let response = self.transport.execute(self.build_fetch_request()).await?;
        if !response.is_success() {
            return Err(Failure::from_response(&response));
        }
        parse_token(&response.body)
    }
}

impl std::fmt::Debug for CsrfTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfTokenManager")
            .field("path", &self.path)
            .field("cached", &self.token.read().is_some())
            .finish()
    }
}

/// Extract the token from a `/csrf` body. `csrfToken` wins when present and
/// non-null; `token` is the legacy name.
pub fn parse_token(body: &str) -> Result<String, Failure> {
    let data: Value = serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()));
    let field = match data.get("csrfToken") {
        Some(value) if !value.is_null() => Some(value),
        _ => data.get("token"),
    };

    match field.and_then(Value::as_str) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => {
            warn!("csrf response did not contain a token");
            Err(Failure::Internal(
                ErrorInfo::new(ErrorKind::CsrfMissing.as_str(), CSRF_MISSING_MSG).with_raw(data),
            ))
        }
    }
}
