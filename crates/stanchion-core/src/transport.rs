//! The transport seam.
//!
//! Outbound requests are lowered into a canonical wire shape
//! ([`TransportRequest`]) that a configurable HTTP client consumes. The
//! orchestrator never talks to the network itself; it talks to a
//! [`Transport`]. Two adapters ship here: [`TowerTransport`], which accepts
//! any `tower::Service` over the canonical shape, and [`MockTransport`],
//! a scripted responder used throughout the test suites.

use crate::error::{Error, Result};
use crate::request::{HttpMethod, RequestSpec};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};

/// Canonical outbound request shape consumed by transports.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub signal: Option<CancellationToken>,
    pub method: HttpMethod,
    pub base_url: String,
    pub url: String,
    pub headers: Map<String, Value>,
    pub params: Map<String, Value>,
    pub data: Option<Value>,
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    /// Lowers a request descriptor into the canonical form.
    pub fn from_spec(spec: &RequestSpec) -> Self {
        Self {
            signal: spec.cancel.clone(),
            method: spec.method,
            base_url: spec.base_url(),
            url: spec.path.clone(),
            headers: spec.headers.clone(),
            params: spec.query.clone(),
            data: spec.body.clone(),
            timeout: spec.timeout,
        }
    }
}

/// Response produced by a transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: std::collections::HashMap<String, String>,
    pub body: Value,
}

impl TransportResponse {
    /// Builds a response with an empty header set.
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            status_text: status_text(status).to_string(),
            headers: std::collections::HashMap::new(),
            body,
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

/// An outbound HTTP client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Dispatches one request. A non-2xx status should be returned as
    /// [`Error::Transport`] with the status attached so retry classification
    /// can apply.
    async fn dispatch(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// Adapts any `tower::Service` over the canonical shape into a [`Transport`].
#[derive(Clone)]
pub struct TowerTransport<S> {
    inner: S,
}

impl<S> TowerTransport<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> Transport for TowerTransport<S>
where
    S: Service<TransportRequest, Response = TransportResponse, Error = Error>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    async fn dispatch(&self, request: TransportRequest) -> Result<TransportResponse> {
        self.inner.clone().oneshot(request).await
    }
}

/// One scripted reply for [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockReply {
    outcome: std::result::Result<TransportResponse, Error>,
    delay: Option<Duration>,
}

impl MockReply {
    /// Replies with the given status and body.
    pub fn response(response: TransportResponse) -> Self {
        Self {
            outcome: Ok(response),
            delay: None,
        }
    }

    /// Replies with a bare status. Non-2xx statuses become transport errors,
    /// matching how a real client adapter reports them.
    pub fn status(status: u16) -> Self {
        if (200..300).contains(&status) {
            Self::response(TransportResponse::new(status, Value::Null))
        } else {
            Self {
                outcome: Err(Error::from_status(status, format!("HTTP {status}"))),
                delay: None,
            }
        }
    }

    /// Replies 200 with a JSON body.
    pub fn ok_json(body: Value) -> Self {
        Self::response(TransportResponse::new(200, body))
    }

    /// Replies with a transport-level error.
    pub fn error(error: Error) -> Self {
        Self {
            outcome: Err(error),
            delay: None,
        }
    }

    /// Delays the reply, observing the request's abort signal while waiting.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A scripted transport for tests and trial runs.
///
/// Replies are consumed in order; when the script runs dry the last reply
/// repeats. Honors the request abort signal during scripted delays.
pub struct MockTransport {
    script: Mutex<VecDeque<MockReply>>,
    last: Mutex<Option<MockReply>>,
    calls: AtomicUsize,
}

impl MockTransport {
    /// Creates a transport that replays the given replies in order.
    pub fn script(replies: impl IntoIterator<Item = MockReply>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// A transport that always replies 200 with the given body.
    pub fn always_ok(body: Value) -> Self {
        Self::script([MockReply::ok_json(body)])
    }

    /// Number of dispatches observed so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Option<MockReply> {
        let mut script = self.script.lock().unwrap();
        match script.pop_front() {
            Some(reply) => {
                *self.last.lock().unwrap() = Some(reply.clone());
                Some(reply)
            }
            None => self.last.lock().unwrap().clone(),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn dispatch(&self, request: TransportRequest) -> Result<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .next_reply()
            .ok_or_else(|| Error::connection("mock transport has no scripted replies"))?;

        if let Some(delay) = reply.delay {
            match &request.signal {
                Some(signal) => {
                    tokio::select! {
                        _ = signal.cancelled() => {
                            return Err(Error::Cancelled(
                                "request aborted while awaiting transport".to_string(),
                            ));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }

        reply.outcome
    }
}
