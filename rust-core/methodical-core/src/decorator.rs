//! # Decorators
//!
//! A decorator wraps a [`RequestHandler`] and returns a new one. It may run
//! logic before and after the inner handler, or answer on its own and never
//! call it.
//!
//! ## Ordering
//!
//! A [`DecoratorChain`] applies its decorators in list order, each wrapping
//! the previous result: `[d1, d2, d3]` becomes `d3(d2(d1(handler)))`. The
//! last decorator listed sees the request first and the response last.

use crate::handler::{HandlerFuture, RequestHandler};
use crate::reply::ErrorBody;
use crate::request::Request;
use crate::response::ResponseHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Wraps a request handler
pub trait Decorator: Send + Sync {
    /// Wrap `next`, returning the decorated handler
    fn decorate(&self, next: RequestHandler) -> RequestHandler;

    /// Decorator name for logging
    fn name(&self) -> &'static str {
        "Decorator"
    }
}

impl<F> Decorator for F
where
    F: Fn(RequestHandler) -> RequestHandler + Send + Sync,
{
    fn decorate(&self, next: RequestHandler) -> RequestHandler {
        self(next)
    }
}

/// Ordered list of decorators
#[derive(Default, Clone)]
pub struct DecoratorChain {
    decorators: Vec<Arc<dyn Decorator>>,
}

impl std::fmt::Debug for DecoratorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.decorators.iter().map(|d| d.name()))
            .finish()
    }
}

impl DecoratorChain {
    /// Create an empty chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a decorator; it wraps everything added before it
    pub fn add<D: Decorator + 'static>(&mut self, decorator: D) {
        self.decorators.push(Arc::new(decorator));
    }

    /// Number of decorators
    #[must_use]
    pub fn len(&self) -> usize {
        self.decorators.len()
    }

    /// Check if chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decorators.is_empty()
    }

    /// Wrap `handler` with every decorator, first listed innermost
    #[must_use]
    pub fn apply(&self, handler: RequestHandler) -> RequestHandler {
        self.decorators.iter().fold(handler, |inner, decorator| {
            debug!(decorator = decorator.name(), "Applying decorator");
            decorator.decorate(inner)
        })
    }
}

/// Logs every request and the status it was answered with
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDecorator {
    log_headers: bool,
}

impl LoggingDecorator {
    /// Create a new logging decorator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log request headers
    #[must_use]
    pub fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

impl Decorator for LoggingDecorator {
    fn decorate(&self, next: RequestHandler) -> RequestHandler {
        let log_headers = self.log_headers;
        Arc::new(move |req: Arc<Request>, res: ResponseHandle| -> HandlerFuture {
            let next = next.clone();
            Box::pin(async move {
                let request_id = req.header("x-request-id").unwrap_or("-").to_string();
                if log_headers {
                    info!(
                        method = %req.method(),
                        path = %req.path(),
                        request_id = %request_id,
                        headers = ?req.headers_map(),
                        "Request received"
                    );
                } else {
                    info!(
                        method = %req.method(),
                        path = %req.path(),
                        request_id = %request_id,
                        "Request received"
                    );
                }

                let result = next(req.clone(), res.clone()).await;

                info!(
                    method = %req.method(),
                    path = %req.path(),
                    status = res.status(),
                    request_id = %request_id,
                    failed = result.is_err(),
                    "Response sent"
                );
                result
            })
        })
    }

    fn name(&self) -> &'static str {
        "LoggingDecorator"
    }
}

/// Measures how long the inner handler takes
#[derive(Debug, Default, Clone, Copy)]
pub struct TimingDecorator {
    header: bool,
}

impl TimingDecorator {
    /// Create a new timing decorator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also report the duration in an `x-response-time` header
    #[must_use]
    pub fn with_header(mut self) -> Self {
        self.header = true;
        self
    }
}

impl Decorator for TimingDecorator {
    fn decorate(&self, next: RequestHandler) -> RequestHandler {
        let header = self.header;
        Arc::new(move |req: Arc<Request>, res: ResponseHandle| -> HandlerFuture {
            let next = next.clone();
            Box::pin(async move {
                let start = Instant::now();
                let result = next(req.clone(), res.clone()).await;
                let duration = start.elapsed();
                debug!(
                    method = %req.method(),
                    path = %req.path(),
                    duration_ms = %duration.as_millis(),
                    "Request timing"
                );
                if header {
                    res.set_header("x-response-time", format!("{}ms", duration.as_millis()));
                }
                result
            })
        })
    }

    fn name(&self) -> &'static str {
        "TimingDecorator"
    }
}

/// Adds Cross-Origin Resource Sharing headers
#[derive(Debug, Clone)]
pub struct CorsDecorator {
    allow_origin: String,
    allow_methods: String,
    allow_headers: String,
}

impl Default for CorsDecorator {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, PUT, DELETE, PATCH, OPTIONS".to_string(),
            allow_headers: "Content-Type, Authorization".to_string(),
        }
    }
}

impl CorsDecorator {
    /// Create a new CORS decorator with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set allowed origin
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origin = origin.into();
        self
    }

    /// Set allowed methods
    #[must_use]
    pub fn allow_methods(mut self, methods: impl Into<String>) -> Self {
        self.allow_methods = methods.into();
        self
    }

    /// Set allowed headers
    #[must_use]
    pub fn allow_headers(mut self, headers: impl Into<String>) -> Self {
        self.allow_headers = headers.into();
        self
    }

    /// Get the Access-Control-Allow-Origin header value
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.allow_origin
    }
}

impl Decorator for CorsDecorator {
    fn decorate(&self, next: RequestHandler) -> RequestHandler {
        let cors = Arc::new(self.clone());
        Arc::new(move |req: Arc<Request>, res: ResponseHandle| -> HandlerFuture {
            let next = next.clone();
            let cors = cors.clone();
            Box::pin(async move {
                let result = next(req, res.clone()).await;
                res.set_header("access-control-allow-origin", cors.allow_origin.as_str());
                res.set_header("access-control-allow-methods", cors.allow_methods.as_str());
                res.set_header("access-control-allow-headers", cors.allow_headers.as_str());
                result
            })
        })
    }

    fn name(&self) -> &'static str {
        "CorsDecorator"
    }
}

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

fn generate_request_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", now.as_nanos(), counter)
}

/// Ensures every request carries an `x-request-id` and echoes it back
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestIdDecorator;

impl RequestIdDecorator {
    /// Create a new request id decorator
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decorator for RequestIdDecorator {
    fn decorate(&self, next: RequestHandler) -> RequestHandler {
        Arc::new(move |req: Arc<Request>, res: ResponseHandle| -> HandlerFuture {
            let (req, request_id) = match req.header("x-request-id") {
                Some(id) => {
                    let id = id.to_string();
                    (req, id)
                }
                None => {
                    let id = generate_request_id();
                    let mut tagged = (*req).clone();
                    tagged.set_header("x-request-id", &id);
                    (Arc::new(tagged), id)
                }
            };
            res.set_header("x-request-id", request_id);
            next(req, res)
        })
    }

    fn name(&self) -> &'static str {
        "RequestIdDecorator"
    }
}

/// Token bucket rate limiting keyed by a request header
///
/// Requests over the limit are answered with `429` and an error body; the
/// inner handler never runs for them.
pub struct RateLimitDecorator {
    limiter: Arc<TokenBuckets>,
    /// Header identifying the client
    key_header: String,
}

/// Internal token bucket state
struct Bucket {
    tokens: u64,
    last_refill: Instant,
}

struct TokenBuckets {
    /// Maximum burst capacity
    capacity: u64,
    /// Tokens refilled per second
    refill_per_sec: u64,
    /// Per-key buckets
    state: Mutex<HashMap<String, Bucket>>,
    /// Map size at which refilled buckets are dropped
    sweep_at: usize,
}

const SWEEP_AT: usize = 1024;

impl RateLimitDecorator {
    /// Create a new rate limiter keyed by `x-client-ip`
    #[must_use]
    pub fn new(capacity: u64, refill_per_sec: u64) -> Self {
        Self {
            limiter: Arc::new(TokenBuckets {
                capacity,
                refill_per_sec,
                state: Mutex::new(HashMap::new()),
                sweep_at: SWEEP_AT,
            }),
            key_header: "x-client-ip".to_string(),
        }
    }

    /// Key buckets by a different request header
    #[must_use]
    pub fn keyed_by(mut self, header: impl Into<String>) -> Self {
        self.key_header = header.into();
        self
    }
}

impl TokenBuckets {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn refill(&self, bucket: &Bucket, now: Instant) -> u64 {
        let elapsed = now.duration_since(bucket.last_refill);
        (elapsed.as_secs_f64() * self.refill_per_sec as f64) as u64
    }

    fn allow(&self, key: &str) -> bool {
        let mut map = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if map.len() >= self.sweep_at && !map.contains_key(key) {
            // a full bucket is indistinguishable from a fresh one
            map.retain(|_, bucket| {
                bucket.tokens.saturating_add(self.refill(bucket, now)) < self.capacity
            });
        }

        let bucket = map.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });
        let refill = self.refill(bucket, now);
        if refill > 0 {
            bucket.tokens = bucket.tokens.saturating_add(refill).min(self.capacity);
            bucket.last_refill = now;
        }
        if bucket.tokens == 0 {
            return false;
        }
        bucket.tokens -= 1;
        true
    }
}

impl Decorator for RateLimitDecorator {
    fn decorate(&self, next: RequestHandler) -> RequestHandler {
        let limiter = self.limiter.clone();
        let key_header = self.key_header.clone();
        Arc::new(move |req: Arc<Request>, res: ResponseHandle| -> HandlerFuture {
            let key = req.header(&key_header).unwrap_or("unknown");
            if limiter.allow(key) {
                return next(req, res);
            }
            warn!(key = %key, "Rate limit exceeded");
            res.send(429, Some(ErrorBody::new("Rate limit exceeded").to_value()));
            Box::pin(async { Ok(()) })
        })
    }

    fn name(&self) -> &'static str {
        "RateLimitDecorator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use serde_json::json;
    use std::time::Duration;

    fn ok_handler() -> RequestHandler {
        handler_fn(|_req: Arc<Request>, res: ResponseHandle| async move {
            res.send(200, Some(json!({"ok": true})));
            Ok(())
        })
    }

    async fn call(handler: &RequestHandler, request: Request) -> crate::response::Response {
        let res = ResponseHandle::new();
        handler(Arc::new(request), res.clone()).await.unwrap();
        res.snapshot()
    }

    #[test]
    fn test_decorator_chain_empty() {
        let chain = DecoratorChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.len(), 0);
    }

    #[test]
    fn test_decorator_chain_add() {
        let mut chain = DecoratorChain::new();
        chain.add(LoggingDecorator::new());
        chain.add(TimingDecorator::new());

        assert!(!chain.is_empty());
        assert_eq!(chain.len(), 2);
        assert_eq!(format!("{chain:?}"), r#"["LoggingDecorator", "TimingDecorator"]"#);
    }

    #[test]
    fn test_cors_decorator_custom_origin() {
        let cors = CorsDecorator::new();
        assert_eq!(cors.origin(), "*");
        let cors = cors.allow_origin("https://example.com");
        assert_eq!(cors.origin(), "https://example.com");
    }

    #[tokio::test]
    async fn test_cors_headers_added_after_handler() {
        let handler = CorsDecorator::new()
            .allow_origin("https://example.com")
            .decorate(ok_handler());

        let res = call(&handler, Request::new("GET", "/")).await;
        assert_eq!(res.status(), 200);
        assert_eq!(
            res.header("Access-Control-Allow-Origin"),
            Some(&"https://example.com".into())
        );
    }

    #[tokio::test]
    async fn test_request_id_generated_and_echoed() {
        let seen = Arc::new(Mutex::new(None::<String>));
        let recorder = seen.clone();
        let inner = handler_fn(move |req: Arc<Request>, res: ResponseHandle| {
            let recorder = recorder.clone();
            async move {
                *recorder.lock().unwrap() = req.header("x-request-id").map(str::to_string);
                res.send_empty(204);
                Ok(())
            }
        });
        let handler = RequestIdDecorator::new().decorate(inner);

        let res = call(&handler, Request::new("GET", "/")).await;
        let generated = seen.lock().unwrap().clone().unwrap();
        assert_eq!(res.header("x-request-id"), Some(&generated.clone().into()));

        let res = call(&handler, Request::new("GET", "/").with_header("x-request-id", "abc")).await;
        assert_eq!(res.header("x-request-id"), Some(&"abc".into()));
        assert_eq!(seen.lock().unwrap().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_timing_header() {
        let handler = TimingDecorator::new().with_header().decorate(ok_handler());
        let res = call(&handler, Request::new("GET", "/")).await;
        assert!(res.header("x-response-time").is_some());
    }

    #[tokio::test]
    async fn test_rate_limit_short_circuits() {
        let handler = RateLimitDecorator::new(2, 0).decorate(ok_handler());
        let req = || Request::new("GET", "/").with_header("x-client-ip", "10.0.0.1");

        assert_eq!(call(&handler, req()).await.status(), 200);
        assert_eq!(call(&handler, req()).await.status(), 200);

        let res = call(&handler, req()).await;
        assert_eq!(res.status(), 429);
        assert_eq!(res.body(), Some(&json!({"error": {"message": "Rate limit exceeded"}})));

        let other = Request::new("GET", "/").with_header("x-client-ip", "10.0.0.2");
        assert_eq!(call(&handler, other).await.status(), 200);
    }

    #[tokio::test]
    async fn test_rate_limit_huge_refill_saturates() {
        let handler = RateLimitDecorator::new(3, u64::MAX).decorate(ok_handler());
        let req = || Request::new("GET", "/").with_header("x-client-ip", "10.0.0.1");

        for _ in 0..5 {
            assert_eq!(call(&handler, req()).await.status(), 200);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[test]
    fn test_rate_limit_drops_refilled_buckets() {
        let limiter = TokenBuckets {
            capacity: 1,
            refill_per_sec: u64::MAX,
            state: Mutex::new(HashMap::new()),
            sweep_at: 2,
        };
        assert!(limiter.allow("a"));
        assert!(limiter.allow("b"));
        std::thread::sleep(Duration::from_millis(2));

        assert!(limiter.allow("c"));
        let map = limiter.state.lock().unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("c"));
    }

    #[test]
    fn test_rate_limit_keeps_drained_buckets() {
        let limiter = TokenBuckets {
            capacity: 1,
            refill_per_sec: 0,
            state: Mutex::new(HashMap::new()),
            sweep_at: 2,
        };
        assert!(limiter.allow("a"));
        assert!(limiter.allow("b"));
        assert!(limiter.allow("c"));
        assert!(!limiter.allow("a"));
        assert_eq!(limiter.state.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_logging_passes_result_through() {
        let failing = handler_fn(|_req: Arc<Request>, res: ResponseHandle| async move {
            res.send_empty(500);
            Err(crate::Error::from(anyhow::anyhow!("boom")))
        });
        let handler = LoggingDecorator::new().with_headers().decorate(failing);

        let res = ResponseHandle::new();
        let result = handler(Arc::new(Request::new("GET", "/")), res.clone()).await;
        assert!(result.is_err());
        assert_eq!(res.status(), 500);
    }
}
