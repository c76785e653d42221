//! Result shape and request DTOs.
//!
//! # Design
//! `ApiResult` is what every public operation resolves to. On the wire it is
//! `{ "ok": true, "data": ... }` or `{ "ok": false, "error": ... }`; the
//! `ok` tag is a boolean, which serde's enum representations cannot express,
//! so (de)serialization is written by hand. Deserializing rejects values that
//! carry both `data` and `error`.

use std::fmt;

use serde::de::{DeserializeOwned, Error as _};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

use crate::error::ErrorInfo;

/// Outcome of a public client operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResult<T> {
    Ok(T),
    Err(ErrorInfo),
}

impl<T> ApiResult<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, ApiResult::Ok(_))
    }

    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            ApiResult::Ok(data) => Some(data),
            ApiResult::Err(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            ApiResult::Ok(_) => None,
            ApiResult::Err(error) => Some(error),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResult<U> {
        match self {
            ApiResult::Ok(data) => ApiResult::Ok(f(data)),
            ApiResult::Err(error) => ApiResult::Err(error),
        }
    }

    pub fn into_result(self) -> Result<T, ErrorInfo> {
        self.into()
    }
}

impl<T> From<Result<T, ErrorInfo>> for ApiResult<T> {
    fn from(result: Result<T, ErrorInfo>) -> Self {
        match result {
            Ok(data) => ApiResult::Ok(data),
            Err(error) => ApiResult::Err(error),
        }
    }
}

impl<T> From<ApiResult<T>> for Result<T, ErrorInfo> {
    fn from(result: ApiResult<T>) -> Self {
        match result {
            ApiResult::Ok(data) => Ok(data),
            ApiResult::Err(error) => Err(error),
        }
    }
}

impl<T: Serialize> Serialize for ApiResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ApiResult", 2)?;
        match self {
            ApiResult::Ok(data) => {
                state.serialize_field("ok", &true)?;
                state.serialize_field("data", data)?;
            }
            ApiResult::Err(error) => {
                state.serialize_field("ok", &false)?;
                state.serialize_field("error", error)?;
            }
        }
        state.end()
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for ApiResult<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut map = Map::deserialize(deserializer)?;
        let ok = map
            .remove("ok")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| D::Error::custom("missing boolean `ok` tag"))?;

        match (ok, map.remove("data"), map.remove("error")) {
            (true, data, None) => serde_json::from_value(data.unwrap_or(Value::Null))
                .map(ApiResult::Ok)
                .map_err(D::Error::custom),
            (false, None, Some(error)) => serde_json::from_value(error)
                .map(ApiResult::Err)
                .map_err(D::Error::custom),
            (false, None, None) => Err(D::Error::custom("`ok: false` without `error`")),
            _ => Err(D::Error::custom("`data` and `error` are mutually exclusive")),
        }
    }
}

/// Body of `POST /login`.
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginBody")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// `params` accepted by `POST /toProcess`: an object (never an array), a
/// string, a number, or `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessParams {
    Object(Map<String, Value>),
    Text(String),
    Number(Number),
    Null,
}

impl From<Map<String, Value>> for ProcessParams {
    fn from(map: Map<String, Value>) -> Self {
        ProcessParams::Object(map)
    }
}

impl From<&str> for ProcessParams {
    fn from(text: &str) -> Self {
        ProcessParams::Text(text.to_string())
    }
}

impl From<String> for ProcessParams {
    fn from(text: String) -> Self {
        ProcessParams::Text(text)
    }
}

impl From<i64> for ProcessParams {
    fn from(n: i64) -> Self {
        ProcessParams::Number(n.into())
    }
}

impl From<Number> for ProcessParams {
    fn from(n: Number) -> Self {
        ProcessParams::Number(n)
    }
}

impl TryFrom<Value> for ProcessParams {
    type Error = Value;

    /// Arrays and booleans are handed back unchanged as the error.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(ProcessParams::Object(map)),
            Value::String(text) => Ok(ProcessParams::Text(text)),
            Value::Number(n) => Ok(ProcessParams::Number(n)),
            Value::Null => Ok(ProcessParams::Null),
            other => Err(other),
        }
    }
}

/// Body of `POST /toProcess`. `params: None` omits the field entirely,
/// which is distinct from `Some(ProcessParams::Null)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToProcessBody {
    pub tx: i64,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub params: Option<ProcessParams>,
}

/// A present field, even `null`, deserializes to `Some`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<ProcessParams>, D::Error> {
    ProcessParams::deserialize(deserializer).map(Some)
}
