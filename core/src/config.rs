//! Client configuration.

use serde::Deserialize;

pub const DEFAULT_CSRF_PATH: &str = "/csrf";
pub const DEFAULT_CSRF_HEADER: &str = "X-CSRF-Token";

/// Knobs for `ApiClient`. Every field has a default, so a partial
/// (or empty) config document deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// Endpoint the CSRF token is fetched from.
    pub csrf_path: String,
    /// Header the token is echoed back in.
    pub csrf_header: String,
    /// Drop the cached token when a POST is rejected with 403, so the next
    /// call fetches a fresh one. The rejected call itself is not retried.
    pub invalidate_on_forbidden: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            csrf_path: DEFAULT_CSRF_PATH.to_string(),
            csrf_header: DEFAULT_CSRF_HEADER.to_string(),
            invalidate_on_forbidden: true,
        }
    }
}
