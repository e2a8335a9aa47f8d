//! # Endpoints
//!
//! An endpoint is one HTTP method's worth of behavior: optional query, body
//! and response schemas, an optional context builder, and a handler.
//!
//! Endpoints are declared with a builder whose type parameters track which
//! schemas were supplied, so the handler's [`Context`] carries exactly the
//! parsed types it can rely on:
//!
//! ```ignore
//! let create = Endpoint::post()
//!     .body(JsonSchema::<NewUser>::new())
//!     .response(JsonSchema::<User>::new())
//!     .context(|route: RouteContext| async move { anyhow::Ok(Session::from(&route.request)) })
//!     .handler(|ctx| async move {
//!         let user = store::insert(&ctx.extra, ctx.body).await?;
//!         Ok(Reply::json(user).with_status(201))
//!     });
//! ```
//!
//! With no `.query(..)`, `ctx.query` is `()`; the same holds for the body.
//!
//! Builder data lives in `ctx.extra`, separate from `ctx.query` and
//! `ctx.body`: a context builder can never replace the parsed input.

use crate::error::{Error, Result};
use crate::method::Method;
use crate::reply::Reply;
use crate::request::Request;
use crate::response::ResponseHandle;
use crate::validation::{NoSchema, Schema, ValidationErrors};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Base per-request context: the raw request and response handles
#[derive(Debug, Clone)]
pub struct RouteContext {
    /// Inbound request
    pub request: Arc<Request>,
    /// Outbound response
    pub response: ResponseHandle,
}

/// Context a handler receives
///
/// `Q` and `B` are the outputs of the query and body schemas, `X` the output
/// of the context builder; each is `()` when not declared.
#[derive(Debug)]
pub struct Context<Q = (), B = (), X = ()> {
    /// Inbound request
    pub request: Arc<Request>,
    /// Outbound response
    pub response: ResponseHandle,
    /// Parsed query
    pub query: Q,
    /// Parsed body
    pub body: B,
    /// Context builder output
    pub extra: X,
}

/// Derives extra per-request context from the base [`RouteContext`]
///
/// Implemented for any `Fn(RouteContext) -> impl Future<Output = anyhow::Result<X>>`.
pub trait ContextBuilder: Send + Sync + 'static {
    /// Extra context produced for the handler
    type Extra: Send + 'static;

    /// Produce the extra context for one request
    fn build(&self, route: RouteContext) -> BoxFuture<'static, anyhow::Result<Self::Extra>>;

    /// Whether a builder was actually declared
    fn is_declared(&self) -> bool {
        true
    }
}

/// Placeholder for an undeclared context builder; yields `()`
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl ContextBuilder for NoContext {
    type Extra = ();

    fn build(&self, _route: RouteContext) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn is_declared(&self) -> bool {
        false
    }
}

impl<F, Fut, X> ContextBuilder for F
where
    F: Fn(RouteContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<X>> + Send + 'static,
    X: Send + 'static,
{
    type Extra = X;

    fn build(&self, route: RouteContext) -> BoxFuture<'static, anyhow::Result<X>> {
        Box::pin(self(route))
    }
}

/// Which input a schema rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputSource {
    Query,
    Body,
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Body => write!(f, "body"),
        }
    }
}

/// What running an endpoint produced, before anything is written
#[derive(Debug)]
pub(crate) enum Outcome {
    /// Query or body failed validation; the handler never ran
    Rejected {
        source: InputSource,
        errors: ValidationErrors,
    },
    /// Handler reply, body already checked against the response schema
    Reply(Reply<Value>),
}

/// Type-erased endpoint pipeline: validate, build context, invoke, check reply
pub(crate) trait Pipeline: Send + Sync {
    fn run(&self, route: RouteContext) -> BoxFuture<'_, Result<Outcome>>;
}

type ReplyFuture<R> = BoxFuture<'static, anyhow::Result<Reply<R>>>;

type HandlerFn<Q, B, X, R> = Arc<dyn Fn(Context<Q, B, X>) -> ReplyFuture<R> + Send + Sync>;

struct TypedEndpoint<Q: Schema, B: Schema, S, C: ContextBuilder, R> {
    query: Q,
    body: B,
    response: S,
    context: C,
    handler: HandlerFn<Q::Output, B::Output, C::Extra, R>,
}

/// Await a user future, turning a panic into `Error::Panic`
async fn guarded<T>(fut: impl Future<Output = anyhow::Result<T>>) -> Result<T> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => Ok(result?),
        Err(payload) => Err(Error::from_panic(payload.as_ref())),
    }
}

impl<Q, B, S, C, R> Pipeline for TypedEndpoint<Q, B, S, C, R>
where
    Q: Schema,
    B: Schema,
    S: Schema,
    C: ContextBuilder,
    R: Serialize + Send + 'static,
{
    fn run(&self, route: RouteContext) -> BoxFuture<'_, Result<Outcome>> {
        Box::pin(async move {
            // Query first, body second; the first failure ends the request.
            let query = match self.query.safe_parse(route.request.query()) {
                Ok(query) => query,
                Err(errors) => {
                    return Ok(Outcome::Rejected {
                        source: InputSource::Query,
                        errors,
                    })
                }
            };
            let body = match self.body.safe_parse(route.request.body()) {
                Ok(body) => body,
                Err(errors) => {
                    return Ok(Outcome::Rejected {
                        source: InputSource::Body,
                        errors,
                    })
                }
            };

            let extra = guarded(async { self.context.build(route.clone()).await }).await?;

            let ctx = Context {
                request: route.request,
                response: route.response,
                query,
                body,
                extra,
            };
            let reply = guarded(async move { (self.handler)(ctx).await }).await?;
            let reply = reply.into_json()?;

            if self.response.is_declared() {
                if let Some(data) = reply.data() {
                    if let Err(errors) = self.response.safe_parse(data) {
                        return Err(Error::ResponseContract { errors });
                    }
                }
            }

            Ok(Outcome::Reply(reply))
        })
    }
}

/// A declared endpoint, ready to be handed to a dispatcher
#[derive(Clone)]
pub struct Endpoint {
    method: Method,
    pipeline: Arc<dyn Pipeline>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Start declaring an endpoint for `method`
    #[must_use]
    pub fn new(method: Method) -> EndpointBuilder {
        EndpointBuilder::new(method)
    }

    /// Start declaring an endpoint from a method name, in any case
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownMethod` if `method` is not a supported method.
    pub fn parse(method: &str) -> Result<EndpointBuilder> {
        Ok(EndpointBuilder::new(method.parse()?))
    }

    /// Start declaring a GET endpoint
    #[must_use]
    pub fn get() -> EndpointBuilder {
        Self::new(Method::Get)
    }

    /// Start declaring a POST endpoint
    #[must_use]
    pub fn post() -> EndpointBuilder {
        Self::new(Method::Post)
    }

    /// Start declaring a PUT endpoint
    #[must_use]
    pub fn put() -> EndpointBuilder {
        Self::new(Method::Put)
    }

    /// Start declaring a PATCH endpoint
    #[must_use]
    pub fn patch() -> EndpointBuilder {
        Self::new(Method::Patch)
    }

    /// Start declaring a DELETE endpoint
    #[must_use]
    pub fn delete() -> EndpointBuilder {
        Self::new(Method::Delete)
    }

    /// Start declaring a HEAD endpoint
    #[must_use]
    pub fn head() -> EndpointBuilder {
        Self::new(Method::Head)
    }

    /// Start declaring an OPTIONS endpoint
    #[must_use]
    pub fn options() -> EndpointBuilder {
        Self::new(Method::Options)
    }

    /// Start declaring a TRACE endpoint
    #[must_use]
    pub fn trace() -> EndpointBuilder {
        Self::new(Method::Trace)
    }

    /// Method this endpoint answers
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    pub(crate) fn run(&self, route: RouteContext) -> BoxFuture<'_, Result<Outcome>> {
        self.pipeline.run(route)
    }
}

/// Builder for [`Endpoint`]; finished by [`EndpointBuilder::handler`]
///
/// Nothing is validated at declaration time; schemas run per request.
pub struct EndpointBuilder<Q = NoSchema, B = NoSchema, S = NoSchema, C = NoContext> {
    method: Method,
    query: Q,
    body: B,
    response: S,
    context: C,
}

impl EndpointBuilder {
    /// Builder with no schemas and no context builder
    #[must_use]
    pub fn new(method: Method) -> Self {
        Self {
            method,
            query: NoSchema,
            body: NoSchema,
            response: NoSchema,
            context: NoContext,
        }
    }
}

impl<Q, B, S, C> EndpointBuilder<Q, B, S, C> {
    /// Validate the request query with `schema`
    pub fn query<Q2: Schema>(self, schema: Q2) -> EndpointBuilder<Q2, B, S, C> {
        EndpointBuilder {
            method: self.method,
            query: schema,
            body: self.body,
            response: self.response,
            context: self.context,
        }
    }

    /// Validate the request body with `schema`
    pub fn body<B2: Schema>(self, schema: B2) -> EndpointBuilder<Q, B2, S, C> {
        EndpointBuilder {
            method: self.method,
            query: self.query,
            body: schema,
            response: self.response,
            context: self.context,
        }
    }

    /// Check the handler's data body with `schema`
    ///
    /// A mismatch is a server-side contract violation and ends in a 500.
    pub fn response<S2: Schema>(self, schema: S2) -> EndpointBuilder<Q, B, S2, C> {
        EndpointBuilder {
            method: self.method,
            query: self.query,
            body: self.body,
            response: schema,
            context: self.context,
        }
    }

    /// Derive extra context before the handler runs
    pub fn context<C2: ContextBuilder>(self, builder: C2) -> EndpointBuilder<Q, B, S, C2> {
        EndpointBuilder {
            method: self.method,
            query: self.query,
            body: self.body,
            response: self.response,
            context: builder,
        }
    }
}

impl<Q, B, S, C> EndpointBuilder<Q, B, S, C>
where
    Q: Schema,
    B: Schema,
    S: Schema,
    C: ContextBuilder,
{
    /// Finish the declaration with the handler
    pub fn handler<F, Fut, R>(self, handler: F) -> Endpoint
    where
        F: Fn(Context<Q::Output, B::Output, C::Extra>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Reply<R>>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let erased: HandlerFn<Q::Output, B::Output, C::Extra, R> = Arc::new(
            move |ctx: Context<Q::Output, B::Output, C::Extra>| -> ReplyFuture<R> {
                Box::pin(handler(ctx))
            },
        );

        Endpoint {
            method: self.method,
            pipeline: Arc::new(TypedEndpoint {
                query: self.query,
                body: self.body,
                response: self.response,
                context: self.context,
                handler: erased,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::Payload;
    use crate::validation::{schema_fn, FieldError, JsonSchema, ValidationCode};
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Deserialize)]
    struct Paging {
        page: String,
    }

    #[derive(Debug, Deserialize)]
    struct NewItem {
        name: String,
    }

    fn route(request: Request) -> RouteContext {
        RouteContext {
            request: Arc::new(request),
            response: ResponseHandle::new(),
        }
    }

    fn reply_of(outcome: Outcome) -> Reply<Value> {
        match outcome {
            Outcome::Reply(reply) => reply,
            other @ Outcome::Rejected { .. } => panic!("expected a reply, got {other:?}"),
        }
    }

    #[test]
    fn test_declaration_keeps_method() {
        let ep = Endpoint::patch().handler(|_ctx| async { Ok(Reply::<()>::empty()) });
        assert_eq!(ep.method(), Method::Patch);

        let ep = Endpoint::parse("DELETE")
            .unwrap()
            .handler(|_ctx| async { Ok(Reply::<()>::empty()) });
        assert_eq!(ep.method(), Method::Delete);

        assert!(Endpoint::parse("brew").is_err());
    }

    #[tokio::test]
    async fn test_parsed_inputs_reach_handler() {
        let ep = Endpoint::post()
            .query(JsonSchema::<Paging>::new())
            .body(JsonSchema::<NewItem>::new())
            .handler(|ctx| async move {
                Ok(Reply::json(json!({ "page": ctx.query.page, "name": ctx.body.name })))
            });

        let req = Request::new("POST", "/items?page=3").with_body(json!({"name": "lamp"}));
        let reply = reply_of(ep.run(route(req)).await.unwrap());
        assert_eq!(reply.data(), Some(&json!({"page": "3", "name": "lamp"})));
    }

    #[tokio::test]
    async fn test_query_failure_skips_body_schema() {
        let body_calls = Arc::new(AtomicUsize::new(0));
        let counter = body_calls.clone();

        let ep = Endpoint::post()
            .query(JsonSchema::<Paging>::new())
            .body(schema_fn(move |_v: &Value| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(FieldError::required("name").into())
            }))
            .handler(|_ctx| async { Ok(Reply::<()>::empty()) });

        let outcome = ep.run(route(Request::new("POST", "/"))).await.unwrap();
        match outcome {
            Outcome::Rejected { source, errors } => {
                assert_eq!(source, InputSource::Query);
                assert_eq!(errors.errors[0].field, "page");
            }
            Outcome::Reply(_) => panic!("query should have been rejected"),
        }
        assert_eq!(body_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_body_failure_reported_alone() {
        let ep = Endpoint::put()
            .query(JsonSchema::<Paging>::new())
            .body(JsonSchema::<NewItem>::new())
            .handler(|_ctx| async { Ok(Reply::<()>::empty()) });

        let req = Request::new("PUT", "/?page=1").with_body(json!({"name": 5}));
        match ep.run(route(req)).await.unwrap() {
            Outcome::Rejected { source, errors } => {
                assert_eq!(source, InputSource::Body);
                assert_eq!(errors.len(), 1);
                assert_eq!(errors.errors[0].code, ValidationCode::InvalidType);
            }
            Outcome::Reply(_) => panic!("body should have been rejected"),
        }
    }

    #[tokio::test]
    async fn test_context_builder_output_is_extra() {
        #[derive(Debug)]
        struct Session {
            user: String,
            x: u32,
        }

        let ep = Endpoint::get()
            .query(JsonSchema::<Paging>::new())
            .context(|route: RouteContext| async move {
                anyhow::Ok(Session {
                    user: route.request.header("x-user").unwrap_or("anon").to_string(),
                    x: 1,
                })
            })
            .handler(|ctx| async move {
                Ok(Reply::json(json!({
                    "user": ctx.extra.user,
                    "x": ctx.extra.x,
                    "page": ctx.query.page,
                })))
            });

        let req = Request::new("GET", "/?page=9").with_header("x-user", "ada");
        let reply = reply_of(ep.run(route(req)).await.unwrap());
        assert_eq!(reply.data(), Some(&json!({"user": "ada", "x": 1, "page": "9"})));
    }

    #[tokio::test]
    async fn test_context_builder_cannot_replace_query() {
        let ep = Endpoint::get()
            .query(JsonSchema::<Paging>::new())
            .context(|_route: RouteContext| async move {
                anyhow::Ok(json!({ "query": "clobber" }))
            })
            .handler(|ctx| async move {
                Ok(Reply::json(json!({ "query": ctx.query.page, "extra": ctx.extra })))
            });

        let reply = reply_of(ep.run(route(Request::new("GET", "/?page=1"))).await.unwrap());
        assert_eq!(
            reply.data(),
            Some(&json!({"query": "1", "extra": {"query": "clobber"}}))
        );
    }

    #[tokio::test]
    async fn test_context_builder_error_skips_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let ep = Endpoint::get()
            .context(|_route: RouteContext| async move {
                Err::<(), _>(anyhow::anyhow!("session store down"))
            })
            .handler(move |_ctx| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Ok(Reply::<()>::empty()) }
            });

        let err = ep.run(route(Request::new("GET", "/"))).await.unwrap_err();
        assert_eq!(err.to_string(), "session store down");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_panic_is_caught() {
        let ep = Endpoint::get().handler(|_ctx| async {
            if true {
                panic!("handler exploded");
            }
            Ok(Reply::<()>::empty())
        });

        let err = ep.run(route(Request::new("GET", "/"))).await.unwrap_err();
        assert!(matches!(err, Error::Panic { ref message } if message == "handler exploded"));
    }

    #[tokio::test]
    async fn test_response_schema_violation_is_error() {
        #[derive(Debug, Deserialize)]
        struct Item {
            #[allow(dead_code)]
            id: u64,
        }

        let ep = Endpoint::get()
            .response(JsonSchema::<Item>::new())
            .handler(|_ctx| async { Ok(Reply::json(json!({"id": "not-a-number"}))) });

        let err = ep.run(route(Request::new("GET", "/"))).await.unwrap_err();
        assert!(matches!(err, Error::ResponseContract { .. }));
    }

    #[tokio::test]
    async fn test_response_schema_skips_error_and_empty_bodies() {
        #[derive(Debug, Deserialize)]
        struct Item {
            #[allow(dead_code)]
            id: u64,
        }

        let ep = Endpoint::get()
            .response(JsonSchema::<Item>::new())
            .handler(|ctx| async move {
                if ctx.request.header("x-fail").is_some() {
                    Ok(Reply::<Value>::error(409, "conflict"))
                } else {
                    Ok(Reply::empty().with_status(204))
                }
            });

        let reply = reply_of(ep.run(route(Request::new("GET", "/"))).await.unwrap());
        assert_eq!(reply.status, Some(204));

        let req = Request::new("GET", "/").with_header("x-fail", "1");
        let reply = reply_of(ep.run(route(req)).await.unwrap());
        assert!(matches!(reply.body, Some(Payload::Error(_))));
    }
}
