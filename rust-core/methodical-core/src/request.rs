//! # HTTP Request
//!
//! The inbound half of a route's raw handles.
//!
//! The dispatcher only needs three things from a request: the method string,
//! and the query and body payloads, already deserialized into JSON by the host.
//! [`Request::from_hyper_with_limit`] is the hyper host's way of producing that.

use crate::error::{Error, Result};
use crate::json::parse_json_bytes;
use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

/// Inbound request as seen by endpoints
///
/// `query` is always a JSON object (possibly empty). `body` is `Null` when the
/// request carried no payload.
#[derive(Debug, Clone)]
pub struct Request {
    /// Method exactly as received; matching is case-insensitive
    method: String,
    /// Request path (without query string)
    path: String,
    /// Raw query string (e.g., "page=1&limit=10")
    query_string: Option<String>,
    /// Deserialized query parameters
    query: Value,
    /// Request headers
    headers: HeaderMap,
    /// Deserialized request body
    body: Value,
    /// Validated JWT claims, set by the bearer auth decorator
    pub claims: Option<Value>,
}

impl Request {
    /// Create a request from a method and a path that may carry a query string
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        let (path, query_string) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path, None),
        };
        let query = parse_query_string(query_string.as_deref());

        Self {
            method: method.into(),
            path,
            query_string,
            query,
            headers: HeaderMap::new(),
            body: Value::Null,
            claims: None,
        }
    }

    /// Replace the deserialized query payload
    #[must_use]
    pub fn with_query(mut self, query: Value) -> Self {
        self.query = query;
        self
    }

    /// Replace the deserialized body payload
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Add a header (builder pattern)
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Create from hyper request
    ///
    /// # Errors
    ///
    /// Fails if the body cannot be read.
    pub async fn from_hyper(req: hyper::Request<hyper::body::Incoming>) -> Result<Self> {
        Self::from_hyper_with_limit(req, usize::MAX).await
    }

    /// Create from hyper request with body size limit
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadTooLarge` if the declared or actual body size
    /// exceeds `max_body_size`, and `Error::Http` if the body stream fails.
    pub async fn from_hyper_with_limit(
        req: hyper::Request<hyper::body::Incoming>,
        max_body_size: usize,
    ) -> Result<Self> {
        let method = req.method().as_str().to_string();
        let uri = req.uri();
        let path = uri.path().to_string();
        let query_string = uri.query().map(String::from);
        let query = parse_query_string(query_string.as_deref());
        let headers = req.headers().clone();

        if let Some(content_len) = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
        {
            if content_len > max_body_size {
                return Err(Error::PayloadTooLarge {
                    limit: max_body_size,
                    actual: content_len,
                });
            }
        }

        let bytes = BodyExt::collect(req.into_body()).await?.to_bytes();
        if bytes.len() > max_body_size {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual: bytes.len(),
            });
        }

        let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let body = decode_body(content_type, &bytes);

        Ok(Self {
            method,
            path,
            query_string,
            query,
            headers,
            body,
            claims: None,
        })
    }

    /// HTTP method as received
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Deserialized query payload
    #[must_use]
    pub fn query(&self) -> &Value {
        &self.query
    }

    /// Deserialized body payload
    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Get raw query string
    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// Get all headers as a HashMap
    #[must_use]
    pub fn headers_map(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|val| (k.as_str().to_string(), val.to_string()))
            })
            .collect()
    }
}

/// Turn raw body bytes into JSON according to the content type
///
/// Empty bodies are `Null`. JSON that fails to parse and any other content
/// type become a JSON string so a body schema can still reject them.
fn decode_body(content_type: Option<&str>, bytes: &Bytes) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }

    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    match mime.as_deref() {
        Some("application/x-www-form-urlencoded") => {
            parse_query_string(Some(&String::from_utf8_lossy(bytes)))
        }
        Some(ct) if ct == "application/json" || ct.ends_with("+json") => {
            let mut buf = bytes.to_vec();
            parse_json_bytes::<Value>(&mut buf).unwrap_or_else(|e| {
                debug!(error = %e, "Request body is not valid JSON, passing it through as text");
                Value::String(String::from_utf8_lossy(bytes).into_owned())
            })
        }
        _ => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Parse query string into a JSON object
///
/// Handles URL decoding. A key that appears more than once collects its
/// values into an array, in order of appearance.
pub(crate) fn parse_query_string(query: Option<&str>) -> Value {
    let mut map = Map::new();

    for pair in query.unwrap_or_default().split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = url_decode(key);
        let value = Value::String(url_decode(value));

        match map.get_mut(&key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key, value);
            }
        }
    }

    Value::Object(map)
}

/// Percent-decoding with `+` as space; invalid escapes are kept verbatim
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_query_string_simple() {
        let result = parse_query_string(Some("page=1&limit=10"));
        assert_eq!(result, json!({"page": "1", "limit": "10"}));
    }

    #[test]
    fn test_parse_query_string_empty() {
        assert_eq!(parse_query_string(None), json!({}));
        assert_eq!(parse_query_string(Some("")), json!({}));
    }

    #[test]
    fn test_parse_query_string_url_encoded() {
        let result = parse_query_string(Some("name=John+Doe&city=New%20York"));
        assert_eq!(result["name"], "John Doe");
        assert_eq!(result["city"], "New York");
    }

    #[test]
    fn test_parse_query_string_repeated_keys() {
        let result = parse_query_string(Some("tag=a&tag=b&tag=c&solo"));
        assert_eq!(result, json!({"tag": ["a", "b", "c"], "solo": ""}));
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("hello+world"), "hello world");
        assert_eq!(url_decode("hello%20world"), "hello world");
        assert_eq!(url_decode("100%25"), "100%");
        assert_eq!(url_decode("caf%C3%A9"), "café");
        assert_eq!(url_decode("bad%zzescape"), "bad%zzescape");
        assert_eq!(url_decode("trailing%2"), "trailing%2");
    }

    #[test]
    fn test_new_splits_query() {
        let req = Request::new("GET", "/users?page=2");
        assert_eq!(req.path(), "/users");
        assert_eq!(req.query_string(), Some("page=2"));
        assert_eq!(req.query(), &json!({"page": "2"}));
        assert_eq!(req.body(), &Value::Null);
    }

    #[test]
    fn test_builders_and_headers() {
        let req = Request::new("post", "/users")
            .with_body(json!({"name": "Ada"}))
            .with_header("X-Request-Id", "abc");
        assert_eq!(req.method(), "post");
        assert_eq!(req.body()["name"], "Ada");
        assert_eq!(req.header("x-request-id"), Some("abc"));
        assert_eq!(req.headers_map().get("x-request-id"), Some(&"abc".to_string()));
    }

    #[test]
    fn test_decode_body_variants() {
        let json_body = Bytes::from_static(br#"{"a":1}"#);
        assert_eq!(
            decode_body(Some("application/json; charset=utf-8"), &json_body),
            json!({"a": 1})
        );

        let form = Bytes::from_static(b"a=1&b=two+words");
        assert_eq!(
            decode_body(Some("application/x-www-form-urlencoded"), &form),
            json!({"a": "1", "b": "two words"})
        );

        let broken = Bytes::from_static(b"{not json");
        assert_eq!(decode_body(Some("application/json"), &broken), json!("{not json"));

        assert_eq!(decode_body(Some("text/plain"), &Bytes::from_static(b"hi")), json!("hi"));
        assert_eq!(decode_body(None, &Bytes::new()), Value::Null);
    }
}
