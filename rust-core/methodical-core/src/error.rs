//! # Error Handling
//!
//! Centralized error types for methodical core.
//! Uses `thiserror` for ergonomic error definitions.
//!
//! Client input problems (query/body schema mismatches) are never represented
//! here: they become `400` replies inside the dispatcher. Everything in this
//! enum is either a construction-time failure or a server-side failure that
//! the dispatcher answers with `500` and then hands back to the host.

use crate::method::Method;
use crate::validation::ValidationErrors;
use thiserror::Error;

/// Result type alias for methodical operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the methodical runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Two endpoints passed to one dispatcher share an HTTP method
    #[error("Duplicate endpoint for method {method}: only one endpoint per method is allowed")]
    DuplicateMethod {
        /// The method declared more than once
        method: Method,
    },

    /// A method string did not name a supported HTTP method
    #[error("Unsupported HTTP method: {method}")]
    UnknownMethod {
        /// The rejected method string
        method: String,
    },

    /// Handler or context builder returned an error
    #[error(transparent)]
    Handler(#[from] anyhow::Error),

    /// Handler produced a body that its response schema rejected
    #[error("Response body violates the declared response schema: {}", errors.summary())]
    ResponseContract {
        /// Structured errors from the response schema
        errors: ValidationErrors,
    },

    /// Handler or context builder panicked
    #[error("Handler panicked: {message}")]
    Panic {
        /// Panic payload, if it was a string
        message: String,
    },

    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload could not be parsed as JSON
    #[error("Invalid JSON: {reason}")]
    InvalidJson {
        /// Parser message
        reason: String,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Actual size
        actual: usize,
    },
}

impl Error {
    /// Build an `Error::Panic` from a caught unwind payload
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        Self::Panic { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::FieldError;

    #[test]
    fn test_duplicate_method_names_method() {
        let err = Error::DuplicateMethod {
            method: Method::Post,
        };
        assert!(err.to_string().contains("POST"));
    }

    #[test]
    fn test_handler_error_is_transparent() {
        let err = Error::from(anyhow::anyhow!("database unavailable"));
        assert_eq!(err.to_string(), "database unavailable");
    }

    #[test]
    fn test_response_contract_lists_fields() {
        let mut errors = ValidationErrors::new();
        errors.add(FieldError::required("id"));
        let err = Error::ResponseContract { errors };
        assert!(err.to_string().contains("id is required"));
    }

    #[test]
    fn test_from_panic_payloads() {
        let err = Error::from_panic(&"boom");
        assert_eq!(err.to_string(), "Handler panicked: boom");

        let err = Error::from_panic(&String::from("owned boom"));
        assert!(err.to_string().contains("owned boom"));

        let err = Error::from_panic(&42_u8);
        assert!(err.to_string().contains("Unknown panic"));
    }

    #[test]
    fn test_bind_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = Error::BindError {
            address: "0.0.0.0:8000".to_string(),
            source: io_err,
        };
        assert!(err.to_string().contains("0.0.0.0:8000"));
    }
}
