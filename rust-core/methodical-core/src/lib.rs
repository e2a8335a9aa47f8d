//! # Methodical Core
//!
//! Per-HTTP-method endpoint dispatch with schema validation.
//! Turns a set of endpoint declarations into a single request handler that
//! picks the endpoint by method, validates input, runs the handler and writes
//! a response.
//!
//! ## Architecture
//!
//! Endpoints are declared with typed schemas and erased into a per-method
//! index. A request flows: method lookup, query schema, body schema, context
//! builder, handler, response schema, emission. Decorators wrap the whole
//! dispatcher; the hyper [`Server`] is one possible host.
//!
//! ## Modules
//!
//! - `endpoint` - Endpoint declaration and the per-request pipeline
//! - `dispatcher` - Method index, dispatch and `as_handler`
//! - `decorator` - Handler wrapping (logging, timing, CORS, rate limiting)
//! - `auth` - JWT bearer authentication decorator
//! - `validation` - Schemas and structured validation errors
//! - `reply` - Handler replies and error bodies
//! - `request` / `response` - Raw request and response handles
//! - `server` - HTTP server built on Hyper
//! - `json` - High-performance JSON parsing with simd-json
//! - `logging` - tracing subscriber setup
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod auth;
pub mod decorator;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod json;
pub mod logging;
pub mod method;
pub mod reply;
pub mod request;
pub mod response;
pub mod server;
pub mod validation;

pub use auth::{AuthConfig, BearerAuth};
pub use decorator::{
    CorsDecorator, Decorator, DecoratorChain, LoggingDecorator, RateLimitDecorator,
    RequestIdDecorator, TimingDecorator,
};
pub use dispatcher::{as_handler, Dispatcher, HandlerOptions, MethodIndex};
pub use endpoint::{Context, ContextBuilder, Endpoint, EndpointBuilder, NoContext, RouteContext};
pub use error::{Error, Result};
pub use handler::{handler_fn, HandlerFuture, RequestHandler};
pub use json::{parse_json, to_json};
pub use logging::{init_tracing, LogConfig, LogFormat};
pub use method::Method;
pub use reply::{ErrorBody, HeaderValue, Headers, Payload, Reply};
pub use request::Request;
pub use response::{Response, ResponseHandle};
pub use server::{run_handler, Server, ServerConfig};
pub use validation::{
    schema_fn, AnyJson, FieldError, JsonSchema, NoSchema, Schema, ValidationCode,
    ValidationErrors, ValidationResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
