//! # Method Dispatcher
//!
//! Selects the endpoint for a request's HTTP method and turns its outcome
//! into a written response.
//!
//! | Situation                         | Response                       |
//! |-----------------------------------|--------------------------------|
//! | no endpoint for the method        | `404`, empty body              |
//! | query or body schema rejects      | `400`, `{"errors": [...]}`     |
//! | handler reply                     | reply status or `200`/`307`    |
//! | handler/context error, panic, bad response body | `500`, empty body, `Err` returned |
//!
//! Failures in the last row are written first and then handed back to the
//! caller so the host can log or report them.

use crate::decorator::{Decorator, DecoratorChain};
use crate::endpoint::{Endpoint, Outcome, RouteContext};
use crate::error::{Error, Result};
use crate::handler::{HandlerFuture, RequestHandler};
use crate::method::Method;
use crate::reply::Reply;
use crate::request::Request;
use crate::response::ResponseHandle;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, debug_span, warn, Instrument};

/// At most one endpoint per HTTP method
#[derive(Debug, Default)]
pub struct MethodIndex {
    slots: [Option<Endpoint>; Method::COUNT],
}

impl MethodIndex {
    /// Index `endpoints` by method
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateMethod` if two endpoints share a method.
    pub fn build(endpoints: impl IntoIterator<Item = Endpoint>) -> Result<Self> {
        let mut index = Self::default();
        for endpoint in endpoints {
            let method = endpoint.method();
            let slot = &mut index.slots[method.index()];
            if slot.is_some() {
                return Err(Error::DuplicateMethod { method });
            }
            *slot = Some(endpoint);
        }
        Ok(index)
    }

    /// Endpoint registered for `method`
    #[must_use]
    pub fn get(&self, method: Method) -> Option<&Endpoint> {
        self.slots[method.index()].as_ref()
    }

    /// Endpoint for a raw request method string, in any case
    #[must_use]
    pub fn resolve(&self, method: &str) -> Option<&Endpoint> {
        Method::lookup(method).and_then(|m| self.get(m))
    }

    /// Registered methods in canonical order
    pub fn methods(&self) -> impl Iterator<Item = Method> + '_ {
        self.slots.iter().flatten().map(Endpoint::method)
    }

    /// Number of registered endpoints
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Whether no endpoint is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dispatches requests to the endpoint for their method
#[derive(Debug, Clone)]
pub struct Dispatcher {
    index: Arc<MethodIndex>,
}

impl Dispatcher {
    /// Build a dispatcher over `endpoints`
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateMethod` if two endpoints share a method.
    pub fn new(endpoints: impl IntoIterator<Item = Endpoint>) -> Result<Self> {
        let index = MethodIndex::build(endpoints)?;
        debug!(methods = ?index.methods().collect::<Vec<_>>(), "Dispatcher ready");
        Ok(Self {
            index: Arc::new(index),
        })
    }

    /// Methods this dispatcher answers
    #[must_use]
    pub fn methods(&self) -> Vec<Method> {
        self.index.methods().collect()
    }

    /// Handle one request, writing the outcome to `response`
    ///
    /// # Errors
    ///
    /// Returns the server-side failure after a `500` has been written.
    pub async fn dispatch(&self, request: Arc<Request>, response: ResponseHandle) -> Result<()> {
        let span = debug_span!("dispatch", method = %request.method(), path = %request.path());
        async move {
            match self.process(request, response.clone()).await {
                Ok(()) => Ok(()),
                Err(err) => {
                    if !response.send_empty(500) {
                        warn!("Response already sent before endpoint failure");
                    }
                    debug!(error = %err, "Endpoint failed, answered 500");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process(&self, request: Arc<Request>, response: ResponseHandle) -> Result<()> {
        let Some(endpoint) = self.index.resolve(request.method()) else {
            debug!("No endpoint for method");
            response.send_empty(404);
            return Ok(());
        };

        let route = RouteContext {
            request,
            response: response.clone(),
        };
        match endpoint.run(route).await? {
            Outcome::Rejected { source, errors } => {
                debug!(%source, errors = errors.len(), "Input rejected");
                response.send(400, Some(errors.to_value()));
            }
            Outcome::Reply(reply) => emit(&response, reply),
        }
        Ok(())
    }

    /// Convert into a [`RequestHandler`]
    #[must_use]
    pub fn into_handler(self) -> RequestHandler {
        Arc::new(move |request: Arc<Request>, response: ResponseHandle| -> HandlerFuture {
            let this = self.clone();
            Box::pin(async move { this.dispatch(request, response).await })
        })
    }
}

/// Write a reply: headers first, then a redirect or the status and body
fn emit(response: &ResponseHandle, mut reply: Reply<Value>) {
    let headers = std::mem::take(&mut reply.headers);
    let status = reply.status;
    response.with(|res| {
        res.apply_headers(headers);
        match reply.redirect.take() {
            Some(location) => {
                res.redirect(status.unwrap_or(307), location);
            }
            None => {
                res.send(status.unwrap_or(200), reply.wire_body());
            }
        }
    });
}

/// Options for [`as_handler`]
#[derive(Debug, Clone, Default)]
pub struct HandlerOptions {
    /// Decorators wrapped around the dispatcher, first listed innermost
    pub decorators: DecoratorChain,
}

impl HandlerOptions {
    /// Options with no decorators
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a decorator; it wraps every decorator added before it
    #[must_use]
    pub fn decorate<D: Decorator + 'static>(mut self, decorator: D) -> Self {
        self.decorators.add(decorator);
        self
    }
}

/// Build a single request handler from per-method endpoints
///
/// ```ignore
/// let handler = as_handler(
///     [
///         Endpoint::get().handler(|_ctx| async { Ok(Reply::json(json!({"hello": "world"}))) }),
///     ],
///     HandlerOptions::new().decorate(LoggingDecorator::new()),
/// )?;
/// ```
///
/// # Errors
///
/// Returns `Error::DuplicateMethod` if two endpoints share a method.
pub fn as_handler(
    endpoints: impl IntoIterator<Item = Endpoint>,
    options: HandlerOptions,
) -> Result<RequestHandler> {
    let dispatcher = Dispatcher::new(endpoints)?;
    Ok(options.decorators.apply(dispatcher.into_handler()))
}
