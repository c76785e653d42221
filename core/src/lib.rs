//! Client core for a cookie-session + CSRF-token HTTP backend.
//!
//! # Overview
//! `ApiClient` fetches and caches the CSRF token, attaches it to every POST,
//! and folds every outcome into a single `ApiResult` value: callers never
//! see a transport error, only `ApiResult::Err(ErrorInfo)`.
//!
//! # Design
//! - The transport is injected behind the `Transport` trait and works on
//!   plain `HttpRequest` / `HttpResponse` data. `ReqwestTransport` is the
//!   default implementation (feature `reqwest-transport`).
//! - The token cache lives in a `CsrfTokenManager` owned by the client; there
//!   is no process-global state.
//! - Failures are collected as `Failure` values and normalized once, in
//!   `ApiClient::submit`.

pub mod client;
pub mod config;
pub mod csrf;
pub mod error;
pub mod http;
#[cfg(feature = "reqwest-transport")]
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use client::ApiClient;
pub use config::ClientConfig;
pub use csrf::CsrfTokenManager;
pub use error::{normalize_error, ErrorInfo, ErrorKind, Failure};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};
#[cfg(feature = "reqwest-transport")]
pub use transport::ReqwestTransport;
pub use types::{ApiResult, LoginBody, ProcessParams, ToProcessBody};
