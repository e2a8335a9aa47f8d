//! # HTTP Response
//!
//! The outbound half of a route's raw handles.
//!
//! [`Response`] records what the dispatcher (or a decorator, or a handler that
//! writes directly) decided to send. A response is finished by exactly one of
//! [`Response::send`] or [`Response::redirect`]; later attempts are ignored and
//! logged. [`ResponseHandle`] is the shared, clonable handle passed through
//! decorators and into handler contexts.

use crate::reply::{HeaderValue, Headers};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{self, HeaderName};
use hyper::StatusCode;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Recorded outbound response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// HTTP status code
    status: u16,
    /// Headers keyed by lower-case name
    headers: Headers,
    /// Body; `None` is an empty body
    body: Option<Value>,
    /// Redirect target
    location: Option<String>,
    /// Whether send/redirect already happened
    finished: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Headers::new(),
            body: None,
            location: None,
            finished: false,
        }
    }
}

impl Response {
    /// Create an unfinished response with status 200
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP status code
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// All headers
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Header by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(&name.to_ascii_lowercase())
    }

    /// Body, if any was sent
    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Redirect target, if this response is a redirect
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Whether the response has been sent
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Set status code without finishing the response
    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// Set or override a header
    ///
    /// Headers stay writable after the response is finished so that outer
    /// decorators can still annotate it on the way out.
    pub fn set_header(&mut self, name: &str, value: impl Into<HeaderValue>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Apply every header in `headers`
    pub fn apply_headers(&mut self, headers: Headers) {
        for (name, value) in headers {
            self.set_header(&name, value);
        }
    }

    /// Finish with `status` and an optional body
    ///
    /// Returns `false` if the response was already finished.
    pub fn send(&mut self, status: u16, body: Option<Value>) -> bool {
        if self.finished {
            warn!(status, previous = self.status, "Response already sent, ignoring");
            return false;
        }
        self.status = status;
        self.body = body;
        self.finished = true;
        true
    }

    /// Finish as a redirect to `location`
    ///
    /// Returns `false` if the response was already finished.
    pub fn redirect(&mut self, status: u16, location: impl Into<String>) -> bool {
        if self.finished {
            warn!(status, previous = self.status, "Response already sent, ignoring redirect");
            return false;
        }
        self.status = status;
        self.location = Some(location.into());
        self.body = None;
        self.finished = true;
        true
    }

    /// Convert to hyper Response
    ///
    /// Every non-null body is JSON-encoded, strings included. An explicit
    /// `content-type` header always wins.
    #[must_use]
    pub fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let (bytes, content_type) = match self.body {
            None | Some(Value::Null) => (Bytes::new(), None),
            Some(value) => (
                Bytes::from(serde_json::to_vec(&value).unwrap_or_default()),
                Some("application/json"),
            ),
        };

        let mut res = hyper::Response::new(Full::new(bytes));
        *res.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let headers = res.headers_mut();
        if let Some(ct) = content_type {
            headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static(ct));
        }
        for (name, value) in &self.headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                warn!(header = %name, "Invalid header name, skipping");
                continue;
            };
            headers.remove(&name);
            for v in value.values() {
                match header::HeaderValue::from_str(v) {
                    Ok(v) => {
                        headers.append(name.clone(), v);
                    }
                    Err(_) => warn!(header = %name, "Invalid header value, skipping"),
                }
            }
        }
        if let Some(location) = self.location {
            match header::HeaderValue::from_str(&location) {
                Ok(v) => {
                    headers.insert(header::LOCATION, v);
                }
                Err(_) => warn!(%location, "Invalid redirect location"),
            }
        }

        res
    }
}

/// Shared handle to the response being built for one request
///
/// Clones refer to the same response. The lock is never held across an await.
#[derive(Debug, Clone, Default)]
pub struct ResponseHandle {
    inner: Arc<Mutex<Response>>,
}

impl ResponseHandle {
    /// Create a handle to a fresh response
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Response> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the response
    pub fn with<T>(&self, f: impl FnOnce(&mut Response) -> T) -> T {
        f(&mut self.lock())
    }

    /// Current status code
    #[must_use]
    pub fn status(&self) -> u16 {
        self.lock().status()
    }

    /// Whether the response has been sent
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.lock().is_finished()
    }

    /// Set status code without finishing the response
    pub fn set_status(&self, status: u16) {
        self.lock().set_status(status);
    }

    /// Set or override a header
    pub fn set_header(&self, name: &str, value: impl Into<HeaderValue>) {
        self.lock().set_header(name, value);
    }

    /// Finish with `status` and an optional body
    pub fn send(&self, status: u16, body: Option<Value>) -> bool {
        self.lock().send(status, body)
    }

    /// Finish with `status` and no body
    pub fn send_empty(&self, status: u16) -> bool {
        self.send(status, None)
    }

    /// Finish as a redirect
    pub fn redirect(&self, status: u16, location: impl Into<String>) -> bool {
        self.lock().redirect(status, location)
    }

    /// Copy of the response as it currently stands
    #[must_use]
    pub fn snapshot(&self) -> Response {
        self.lock().clone()
    }
}
