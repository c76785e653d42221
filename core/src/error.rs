//! Error data and the failure normalizer.
//!
//! # Design
//! `ErrorInfo` is data handed to callers inside `ApiResult::Err`, never
//! something that is thrown. `Failure` is the raw, unclassified outcome the
//! pipeline collects on the way (network error, non-2xx response, or an
//! error the client synthesized itself). `normalize_error` is the single
//! place where a `Failure` becomes an `ErrorInfo`:
//!
//! 1. a JSON object body from the backend is returned verbatim;
//! 2. an internally synthesized `ErrorInfo` passes through untouched;
//! 3. anything else becomes `NetworkOrUnknown` with whatever diagnostics
//!    (status, url, lower-level details) are available.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::http::{HttpResponse, TransportError};

/// Message used for failures where no response was ever received.
pub const NETWORK_ERROR_MSG: &str =
    "Network error (status 0). Check: backend running, proxy enabled, correct port.";

const FALLBACK_MSG: &str = "Request failed";

/// Error codes the client produces on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `/csrf` answered 2xx without a usable `csrfToken` / `token` field.
    CsrfMissing,
    /// No response, or a non-2xx response without a structured body.
    NetworkOrUnknown,
    /// The request could not be built (body not encodable as JSON, or a CSRF
    /// header that is not a valid header); nothing was sent.
    InvalidRequest,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::CsrfMissing => "CsrfMissing",
            ErrorKind::NetworkOrUnknown => "NetworkOrUnknown",
            ErrorKind::InvalidRequest => "InvalidRequest",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload carried by `ApiResult::Err`.
///
/// Fields a backend error body carries beyond the known ones are kept in
/// `extra`, so a backend object serializes back out unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            msg: msg.into(),
            ..Self::default()
        }
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Adopt a backend error object as-is.
    ///
    /// Each known field is typed on its own when its JSON type lines up;
    /// a key that does not fit stays in `extra` untouched, so the object
    /// serializes back out unchanged.
    pub fn from_backend(mut body: Map<String, Value>) -> Self {
        let code = take_field::<String>(&mut body, "code", |s| !s.is_empty()).unwrap_or_default();
        let msg = take_field::<String>(&mut body, "msg", |s| !s.is_empty()).unwrap_or_default();
        Self {
            code,
            msg,
            status: take_field(&mut body, "status", |_| true),
            url: take_field(&mut body, "url", |_| true),
            details: take_field(&mut body, "details", |_| true),
            raw: take_field(&mut body, "raw", |_| true),
            extra: body,
        }
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.code == kind.as_str()
    }
}

/// Remove `key` from `body` only if it deserializes as `T` and passes `keep`.
fn take_field<T: DeserializeOwned>(body: &mut Map<String, Value>, key: &str, keep: impl Fn(&T) -> bool) -> Option<T> {
    let typed: T = serde_json::from_value(body.get(key)?.clone()).ok()?;
    if !keep(&typed) {
        return None;
    }
    body.remove(key);
    Some(typed)
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({status}): {}", self.code, self.msg),
            None => write!(f, "{}: {}", self.code, self.msg),
        }
    }
}

/// A raw, not yet classified failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Failure {
    /// No response was received.
    #[error(transparent)]
    Network(#[from] TransportError),

    /// The server answered with a non-2xx status. `body` holds the parsed
    /// JSON payload, or the raw text when it was not JSON.
    #[error("{message}")]
    Http {
        status: u16,
        url: String,
        body: Option<Value>,
        message: String,
    },

    /// An error the client produced itself, already shaped for callers.
    #[error("{0}")]
    Internal(ErrorInfo),
}

impl Failure {
    /// Build the failure for a non-2xx response.
    pub fn from_response(response: &HttpResponse) -> Self {
        let text = response.body.trim();
        let body = if text.is_empty() {
            None
        } else {
            Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(response.body.clone())))
        };
        Failure::Http {
            status: response.status,
            url: response.url.clone(),
            body,
            message: format!("Http failure response for {}: {}", response.url, response.status),
        }
    }
}

/// Classify a failure into the `ErrorInfo` callers receive.
pub fn normalize_error(failure: Failure) -> ErrorInfo {
    match failure {
        Failure::Http {
            body: Some(Value::Object(body)),
            ..
        } => ErrorInfo::from_backend(body),
        Failure::Internal(info) => info,
        Failure::Network(err) => ErrorInfo {
            code: ErrorKind::NetworkOrUnknown.as_str().to_string(),
            msg: NETWORK_ERROR_MSG.to_string(),
            status: Some(0),
            url: Some(err.url).filter(|u| !u.is_empty()),
            details: err.details,
            ..ErrorInfo::default()
        },
        Failure::Http {
            status,
            url,
            body,
            message,
        } => ErrorInfo {
            code: ErrorKind::NetworkOrUnknown.as_str().to_string(),
            msg: if message.is_empty() {
                FALLBACK_MSG.to_string()
            } else {
                message
            },
            status: Some(status),
            url: Some(url).filter(|u| !u.is_empty()),
            raw: body,
            ..ErrorInfo::default()
        },
    }
}
