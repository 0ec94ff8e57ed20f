//! Request descriptors for outbound work.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// HTTP method for a request item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    #[serde(alias = "GET")]
    Get,
    #[serde(alias = "POST")]
    Post,
    #[serde(alias = "PUT")]
    Put,
    #[serde(alias = "PATCH")]
    Patch,
    #[serde(alias = "DELETE")]
    Delete,
}

impl HttpMethod {
    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Http => f.write_str("http"),
            Protocol::Https => f.write_str("https"),
        }
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Https
    }
}

/// Descriptor of one outbound HTTP request.
///
/// `id` identifies the item in reports and hook contexts; `group_id` scopes
/// request-group configuration merging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    pub hostname: String,
    #[serde(default)]
    pub protocol: Protocol,
    pub method: HttpMethod,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default)]
    pub query: Map<String, Value>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Abort handle honored by the transport at suspension points.
    #[serde(skip)]
    pub cancel: Option<CancellationToken>,
}

fn default_path() -> String {
    "/".to_string()
}

impl RequestSpec {
    /// Creates a minimal spec; everything else via the `with_*` setters.
    pub fn new(method: HttpMethod, hostname: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: None,
            group_id: None,
            hostname: hostname.into(),
            protocol: Protocol::default(),
            method,
            path: path.into(),
            port: None,
            headers: Map::new(),
            query: Map::new(),
            body: None,
            timeout: None,
            cancel: None,
        }
    }

    /// Convenience constructor for a GET request.
    pub fn get(hostname: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, hostname, path)
    }

    /// Convenience constructor for a POST request.
    pub fn post(hostname: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, hostname, path)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// `protocol://hostname[:port]`.
    pub fn base_url(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.protocol, self.hostname, port),
            None => format!("{}://{}", self.protocol, self.hostname),
        }
    }

    /// Full URL including the path, used for cache keying.
    pub fn full_url(&self) -> String {
        format!("{}{}", self.base_url(), self.path)
    }
}
