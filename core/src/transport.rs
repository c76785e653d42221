//! `Transport` backed by reqwest.
//!
//! Paths are resolved against the base URL the way a browser resolves a
//! root-relative URL, so `/csrf` and `/login` always hit the same origin and
//! the cookie store sends the session cookies on every request.

use std::error::Error as _;

use async_trait::async_trait;
use serde_json::json;
use url::Url;

use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    base: Url,
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let base = Url::parse(base_url)
            .map_err(|e| TransportError::new(base_url, format!("invalid base URL: {e}")))?;
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| describe(base_url, &e))?;
        Ok(Self { base, client })
    }

    /// Use a preconfigured client (timeouts, proxy, ...). It should have a
    /// cookie store enabled or the session will not survive between calls.
    pub fn with_client(base: Url, client: reqwest::Client) -> Self {
        Self { base, client }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = self
            .base
            .join(&request.path)
            .map_err(|e| TransportError::new(request.path.clone(), format!("invalid request path: {e}")))?;

        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };
        let mut builder = self.client.request(method, url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| describe(url.as_str(), &e))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|e| describe(&final_url, &e))?;

        Ok(HttpResponse {
            status,
            url: final_url,
            headers,
            body,
        })
    }
}

fn describe(url: &str, err: &reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else if err.is_body() || err.is_decode() {
        "body"
    } else {
        "request"
    };
    TransportError::new(url, err.to_string()).with_details(json!({
        "kind": kind,
        "source": err.source().map(|s| s.to_string()),
    }))
}
