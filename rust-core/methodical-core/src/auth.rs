//! # Bearer Authentication
//!
//! JWT validation as a decorator. Requests without a valid
//! `Authorization: Bearer <token>` header are answered with `401` before the
//! inner handler runs. Accepted requests reach the inner handler with their
//! decoded claims in [`Request::claims`].

use crate::decorator::Decorator;
use crate::handler::{HandlerFuture, RequestHandler};
use crate::reply::ErrorBody;
use crate::request::Request;
use crate::response::ResponseHandle;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Authentication Configuration (JWT)
#[derive(Clone)]
pub struct AuthConfig {
    /// JWT decoding key
    pub decoding_key: DecodingKey,
    /// JWT validation settings
    pub validation: Validation,
}

impl AuthConfig {
    /// Create auth config from shared secret (HS256)
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Validate `token` and return its claims
    ///
    /// # Errors
    ///
    /// Returns the `jsonwebtoken` error for malformed, expired or badly signed tokens.
    pub fn verify(&self, token: &str) -> jsonwebtoken::errors::Result<Value> {
        decode::<Value>(token, &self.decoding_key, &self.validation).map(|data| data.claims)
    }
}

/// Decorator requiring a valid bearer token
#[derive(Clone)]
pub struct BearerAuth {
    config: Arc<AuthConfig>,
}

impl BearerAuth {
    /// Require HS256 tokens signed with `secret`
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self::with_config(AuthConfig::new(secret))
    }

    /// Require tokens accepted by `config`
    #[must_use]
    pub fn with_config(config: AuthConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

fn unauthorized(res: &ResponseHandle, message: &str) -> HandlerFuture {
    res.send(401, Some(ErrorBody::new(message).to_value()));
    Box::pin(async { Ok(()) })
}

impl Decorator for BearerAuth {
    fn decorate(&self, next: RequestHandler) -> RequestHandler {
        let config = self.config.clone();
        Arc::new(move |req: Arc<Request>, res: ResponseHandle| -> HandlerFuture {
            let Some(token) = req
                .header("authorization")
                .and_then(|h| h.strip_prefix("Bearer "))
            else {
                return unauthorized(&res, "Missing or invalid Authorization header");
            };

            match config.verify(token) {
                Ok(claims) => {
                    let mut authed = (*req).clone();
                    authed.claims = Some(claims);
                    next(Arc::new(authed), res)
                }
                Err(e) => {
                    warn!("JWT validation failed: {}", e);
                    unauthorized(&res, "Unauthorized")
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "BearerAuth"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{as_handler, HandlerOptions};
    use crate::endpoint::Endpoint;
    use crate::reply::Reply;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn token(secret: &str) -> String {
        let claims = json!({ "sub": "ada", "exp": 4_102_444_800_u64 });
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn protected() -> RequestHandler {
        as_handler(
            [Endpoint::get().handler(|ctx| async move {
                let sub = ctx
                    .request
                    .claims
                    .as_ref()
                    .and_then(|c| c["sub"].as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(Reply::json(json!({ "sub": sub })))
            })],
            HandlerOptions::new().decorate(BearerAuth::new(SECRET)),
        )
        .unwrap()
    }

    async fn call(handler: &RequestHandler, request: Request) -> crate::response::Response {
        let res = ResponseHandle::new();
        handler(Arc::new(request), res.clone()).await.unwrap();
        res.snapshot()
    }

    #[tokio::test]
    async fn test_valid_token_exposes_claims() {
        let req = Request::new("GET", "/")
            .with_header("authorization", &format!("Bearer {}", token(SECRET)));
        let res = call(&protected(), req).await;
        assert_eq!(res.status(), 200);
        assert_eq!(res.body(), Some(&json!({"sub": "ada"})));
    }

    #[tokio::test]
    async fn test_missing_header_is_401() {
        let res = call(&protected(), Request::new("GET", "/")).await;
        assert_eq!(res.status(), 401);
        assert_eq!(
            res.body(),
            Some(&json!({"error": {"message": "Missing or invalid Authorization header"}}))
        );
    }

    #[tokio::test]
    async fn test_wrong_secret_is_401() {
        let req = Request::new("GET", "/")
            .with_header("authorization", &format!("Bearer {}", token("other")));
        let res = call(&protected(), req).await;
        assert_eq!(res.status(), 401);
        assert_eq!(res.body(), Some(&json!({"error": {"message": "Unauthorized"}})));
    }

    #[test]
    fn test_verify_returns_claims() {
        let config = AuthConfig::new(SECRET);
        let claims = config.verify(&token(SECRET)).unwrap();
        assert_eq!(claims["sub"], "ada");
        assert!(config.verify("not-a-jwt").is_err());
    }
}
