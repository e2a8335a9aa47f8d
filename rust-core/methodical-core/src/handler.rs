//! # Request Handlers
//!
//! A [`RequestHandler`] is the single entry point a host calls per request:
//! it receives the raw request and a response handle, writes the outcome to
//! the handle and reports any server-side failure as `Err` *after* the
//! response was written.

use crate::error::Result;
use crate::request::Request;
use crate::response::ResponseHandle;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Boxed future returned by request handlers
pub type HandlerFuture = BoxFuture<'static, Result<()>>;

/// Type-erased request handler shared between tasks
pub type RequestHandler = Arc<dyn Fn(Arc<Request>, ResponseHandle) -> HandlerFuture + Send + Sync>;

/// Wrap an async function as a [`RequestHandler`]
///
/// ```ignore
/// let handler = handler_fn(|_req, res| async move {
///     res.send_empty(204);
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> RequestHandler
where
    F: Fn(Arc<Request>, ResponseHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |req: Arc<Request>, res: ResponseHandle| -> HandlerFuture {
        Box::pin(f(req, res))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handler_fn_writes_response() {
        let handler = handler_fn(|req: Arc<Request>, res: ResponseHandle| async move {
            res.set_header("x-method", req.method());
            res.send_empty(204);
            Ok(())
        });

        let res = ResponseHandle::new();
        handler(Arc::new(Request::new("GET", "/")), res.clone())
            .await
            .unwrap();

        let snap = res.snapshot();
        assert_eq!(snap.status(), 204);
        assert!(snap.header("x-method").is_some());
    }

    #[test]
    fn test_handler_error_propagates() {
        let handler = handler_fn(|_req, res: ResponseHandle| async move {
            res.send_empty(500);
            Err(crate::Error::from(anyhow::anyhow!("storage offline")))
        });

        let res = ResponseHandle::new();
        let result = tokio_test::block_on(handler(Arc::new(Request::new("GET", "/")), res.clone()));
        assert_eq!(result.unwrap_err().to_string(), "storage offline");
        assert_eq!(res.status(), 500);
    }
}
