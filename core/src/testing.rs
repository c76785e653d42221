//! In-memory transport for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::http::{HttpRequest, HttpResponse, Transport, TransportError};

const ORIGIN: &str = "http://localhost:3000";

enum Reply {
    Response { status: u16, body: String },
    Failure(TransportError),
}

/// Answers requests from a queue of scripted replies, in order, and records
/// every request it sees. Yields once per request so concurrent callers
/// interleave the way they would over a real network.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn reply(&self, status: u16, body: Value) {
        self.reply_raw(status, &body.to_string());
    }

    pub(crate) fn reply_raw(&self, status: u16, body: &str) {
        self.replies.lock().push_back(Reply::Response {
            status,
            body: body.to_string(),
        });
    }

    pub(crate) fn fail(&self, err: TransportError) {
        self.replies.lock().push_back(Reply::Failure(err));
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn count(&self, path: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.path == path).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = format!("{ORIGIN}{}", request.path);
        self.requests.lock().push(request);
        tokio::task::yield_now().await;

        let reply = self.replies.lock().pop_front();
        match reply {
            Some(Reply::Response { status, body }) => Ok(HttpResponse {
                status,
                url,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body,
            }),
            Some(Reply::Failure(err)) => Err(err),
            None => Err(TransportError::new(url, "no scripted reply left")),
        }
    }
}
