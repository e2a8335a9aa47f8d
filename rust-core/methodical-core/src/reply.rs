//! # Handler Replies
//!
//! What a handler hands back to the dispatcher. Every field is optional and
//! the precedence is fixed: a `redirect` wins over any `body`, a missing
//! `status` defaults to `307` for redirects and `200` otherwise.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Value of a response header: one string or several
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    /// Single header value
    One(String),
    /// Repeated header, emitted once per value
    Many(Vec<String>),
}

impl HeaderValue {
    /// All values in emission order
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::One(v) => vec![v.as_str()],
            Self::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::One(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(values: Vec<String>) -> Self {
        Self::Many(values)
    }
}

impl From<Vec<&str>> for HeaderValue {
    fn from(values: Vec<&str>) -> Self {
        Self::Many(values.into_iter().map(str::to_string).collect())
    }
}

/// Header mapping keyed by lower-case header name
pub type Headers = BTreeMap<String, HeaderValue>;

/// Message part of an [`ErrorBody`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Human-readable description
    pub message: String,
}

/// Body shape for failures produced by the framework rather than user data
///
/// Serializes as `{"error": {"message": "..."}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error details
    pub error: ErrorMessage,
}

impl ErrorBody {
    /// Create an error body with the given message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: ErrorMessage {
                message: message.into(),
            },
        }
    }

    /// Convert to a JSON value
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "error": { "message": self.error.message } })
    }
}

/// Reply body: the endpoint's own data or an [`ErrorBody`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload<R> {
    /// Data described by the endpoint's response schema
    Data(R),
    /// Framework-shaped error; never checked against the response schema
    Error(ErrorBody),
}

/// Result of a handler invocation
///
/// ```ignore
/// Reply::json(user).with_status(201).with_header("location", "/users/7")
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<R = Value> {
    /// Status code; `None` means 200, or 307 with a redirect
    pub status: Option<u16>,
    /// Redirect target; takes precedence over `body`
    pub redirect: Option<String>,
    /// Response body
    pub body: Option<Payload<R>>,
    /// Headers applied before the status and body are written
    pub headers: Headers,
}

impl<R> Default for Reply<R> {
    fn default() -> Self {
        Self {
            status: None,
            redirect: None,
            body: None,
            headers: Headers::new(),
        }
    }
}

impl<R> Reply<R> {
    /// Reply with no body at the default status
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reply with a data body
    pub fn json(body: R) -> Self {
        Self {
            body: Some(Payload::Data(body)),
            ..Self::default()
        }
    }

    /// Reply with an empty body and the given status
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Redirect to `location`
    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            redirect: Some(location.into()),
            ..Self::default()
        }
    }

    /// Reply with an [`ErrorBody`] and the given status
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            body: Some(Payload::Error(ErrorBody::new(message))),
            ..Self::default()
        }
    }

    /// Set status code
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Set a header, replacing any previous value under the same name
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set the data body
    #[must_use]
    pub fn with_body(mut self, body: R) -> Self {
        self.body = Some(Payload::Data(body));
        self
    }
}

impl<R: Serialize> Reply<R> {
    /// Serialize the body, keeping the data/error distinction
    ///
    /// # Errors
    ///
    /// Fails if the data body cannot be represented as JSON.
    pub fn into_json(self) -> serde_json::Result<Reply<Value>> {
        let body = match self.body {
            Some(Payload::Data(data)) => Some(Payload::Data(serde_json::to_value(data)?)),
            Some(Payload::Error(err)) => Some(Payload::Error(err)),
            None => None,
        };
        Ok(Reply {
            status: self.status,
            redirect: self.redirect,
            body,
            headers: self.headers,
        })
    }
}

impl Reply<Value> {
    /// Data body that a response schema should check, if any
    ///
    /// Error bodies and `null` data are not subject to the response schema.
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        match &self.body {
            Some(Payload::Data(v)) if !v.is_null() => Some(v),
            _ => None,
        }
    }

    /// Body as it goes on the wire
    #[must_use]
    pub fn wire_body(self) -> Option<Value> {
        match self.body? {
            Payload::Data(v) => Some(v),
            Payload::Error(err) => Some(err.to_value()),
        }
    }
}
