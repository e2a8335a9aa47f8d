//! # Validation Module
//!
//! Structured validation errors and the schema capability endpoints rely on.
//!
//! A [`Schema`] turns an untyped JSON value into a typed one or reports a
//! [`ValidationErrors`] list. `safe_parse` never panics and never fails
//! out-of-band; the dispatcher decides what a failure means (a `400` for
//! query/body input, a `500` for a handler's own response body).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Field name used for errors that concern the whole value rather than a member
pub const ROOT_FIELD: &str = "$";

/// Error code for categorizing validation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    /// Required field is missing
    Required,
    /// Value is invalid type
    InvalidType,
    /// Value is too short
    TooShort,
    /// Value is too long
    TooLong,
    /// Value is below minimum
    TooSmall,
    /// Value is above maximum
    TooLarge,
    /// Value doesn't match pattern
    InvalidFormat,
    /// Field is not part of the schema
    UnknownField,
    /// Value is not in allowed set
    InvalidChoice,
    /// Custom validation failed
    Custom,
}

/// A single validation error for a specific field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field name (e.g., "email", "user.address.city")
    pub field: String,
    /// Human-readable error message
    pub message: String,
    /// Machine-readable error code
    pub code: ValidationCode,
}

impl FieldError {
    /// Create a new field error
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: ValidationCode) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
        }
    }

    /// Create a "required field" error
    pub fn required(field: impl Into<String>) -> Self {
        let field_str = field.into();
        Self {
            message: format!("{field_str} is required"),
            field: field_str,
            code: ValidationCode::Required,
        }
    }

    /// Create an "invalid type" error
    pub fn invalid_type(field: impl Into<String>, expected: &str) -> Self {
        let field_str = field.into();
        Self {
            message: format!("{field_str} must be {expected}"),
            field: field_str,
            code: ValidationCode::InvalidType,
        }
    }

    /// Create a "too short" error
    pub fn too_short(field: impl Into<String>, min: usize) -> Self {
        let field_str = field.into();
        Self {
            message: format!("{field_str} must be at least {min} characters"),
            field: field_str,
            code: ValidationCode::TooShort,
        }
    }

    /// Create a "too long" error
    pub fn too_long(field: impl Into<String>, max: usize) -> Self {
        let field_str = field.into();
        Self {
            message: format!("{field_str} must be at most {max} characters"),
            field: field_str,
            code: ValidationCode::TooLong,
        }
    }

    /// Create a "too small" error for numeric lower bounds
    pub fn too_small(field: impl Into<String>, min: impl fmt::Display) -> Self {
        let field_str = field.into();
        Self {
            message: format!("{field_str} must be at least {min}"),
            field: field_str,
            code: ValidationCode::TooSmall,
        }
    }

    /// Create a "too large" error for numeric upper bounds
    pub fn too_large(field: impl Into<String>, max: impl fmt::Display) -> Self {
        let field_str = field.into();
        Self {
            message: format!("{field_str} must be at most {max}"),
            field: field_str,
            code: ValidationCode::TooLarge,
        }
    }

    /// Translate a serde deserialization error into a field error
    ///
    /// serde reports problems as messages only, so the field name is recovered
    /// from the backtick-quoted token where serde provides one.
    #[must_use]
    pub fn from_serde(err: &serde_json::Error) -> Self {
        Self::from_serde_at("", err)
    }

    /// Like [`FieldError::from_serde`], for an error raised at `path`
    ///
    /// `path` is the dotted location of the failing value, e.g. `items[0].qty`;
    /// an empty path or `.` means the whole input.
    #[must_use]
    pub fn from_serde_at(path: &str, err: &serde_json::Error) -> Self {
        let message = err.to_string();
        let at = if path.is_empty() || path == "." {
            ROOT_FIELD.to_string()
        } else {
            path.to_string()
        };

        if let Some(field) = quoted_token(&message, "missing field `") {
            return Self::required(member_of(path, field));
        }
        if let Some(field) = quoted_token(&message, "unknown field `") {
            // the offending key may already be the last path segment
            let field = if path == field || path.ends_with(&format!(".{field}")) {
                path.to_string()
            } else {
                member_of(path, field)
            };
            return Self::new(field, message, ValidationCode::UnknownField);
        }
        if message.starts_with("unknown variant `") {
            return Self::new(at, message, ValidationCode::InvalidChoice);
        }
        if message.starts_with("invalid type") || message.starts_with("invalid value") {
            return Self::new(at, message, ValidationCode::InvalidType);
        }
        if message.starts_with("invalid length") {
            return Self::new(at, message, ValidationCode::InvalidFormat);
        }
        Self::new(at, message, ValidationCode::Custom)
    }
}

/// Extract `name` from `...prefix name` + "`" ...
fn quoted_token<'a>(message: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = message.strip_prefix(prefix)?;
    rest.split_once('`').map(|(token, _)| token)
}

/// Dotted name of member `field` inside the value at `path`
fn member_of(path: &str, field: &str) -> String {
    if path.is_empty() || path == "." {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

/// Collection of validation errors
///
/// Allows aggregating multiple field errors for a single request.
/// Serializes as `{"errors": [...]}`, which is the `400` response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    /// List of field-level errors
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    /// Create an empty error collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field error
    pub fn add(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    /// Add a required field error
    pub fn add_required(&mut self, field: impl Into<String>) {
        self.add(FieldError::required(field));
    }

    /// Check if there are any errors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get the number of errors
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `Ok(value)` when nothing was recorded, otherwise `Err(self)`
    ///
    /// # Errors
    ///
    /// Returns the collection itself if it holds at least one error.
    pub fn into_result<T>(self, value: T) -> ValidationResult<T> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }

    /// Convert to JSON response body
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"errors":[]}"#.to_string())
    }

    /// Convert to a JSON value for embedding in a response
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "errors": [] }))
    }

    /// One-line, human-readable summary of all messages
    #[must_use]
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Group errors by field
    #[must_use]
    pub fn by_field(&self) -> HashMap<String, Vec<&FieldError>> {
        let mut map: HashMap<String, Vec<&FieldError>> = HashMap::new();
        for error in &self.errors {
            map.entry(error.field.clone()).or_default().push(error);
        }
        map
    }
}

impl From<FieldError> for ValidationErrors {
    fn from(error: FieldError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Result type for validation operations
pub type ValidationResult<T> = std::result::Result<T, ValidationErrors>;

/// A safe-parse capability: validate unknown JSON and produce a typed value
///
/// Implementations must not panic on bad input; every problem is reported
/// through the `Err` side.
pub trait Schema: Send + Sync + 'static {
    /// Typed value produced on success
    type Output: Send + 'static;

    /// Validate `input`, returning the parsed value or structured errors
    ///
    /// # Errors
    ///
    /// Returns the structured errors describing why `input` was rejected.
    fn safe_parse(&self, input: &Value) -> ValidationResult<Self::Output>;

    /// Whether this schema was actually declared
    ///
    /// Only [`NoSchema`] answers `false`.
    fn is_declared(&self) -> bool {
        true
    }
}

/// Placeholder for an undeclared schema; accepts anything and yields `()`
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSchema;

impl Schema for NoSchema {
    type Output = ();

    fn safe_parse(&self, _input: &Value) -> ValidationResult<()> {
        Ok(())
    }

    fn is_declared(&self) -> bool {
        false
    }
}

/// Accepts any JSON value and hands it through untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyJson;

impl Schema for AnyJson {
    type Output = Value;

    fn safe_parse(&self, input: &Value) -> ValidationResult<Value> {
        Ok(input.clone())
    }
}

type Refinement<T> = Arc<dyn Fn(&T, &mut ValidationErrors) + Send + Sync>;

/// Schema backed by a serde `Deserialize` type plus optional refinements
///
/// Deserialization errors become a single [`FieldError`]; refinements run
/// only after deserialization succeeds and may record any number of errors.
///
/// ```ignore
/// let schema = JsonSchema::<NewUser>::new()
///     .refine(|u, errors| {
///         if u.name.len() < 3 {
///             errors.add(FieldError::too_short("name", 3));
///         }
///     });
/// ```
pub struct JsonSchema<T> {
    refinements: Vec<Refinement<T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSchema<T> {
    /// Create a schema with no refinements
    #[must_use]
    pub fn new() -> Self {
        Self {
            refinements: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Add a refinement check run against the deserialized value
    #[must_use]
    pub fn refine<F>(mut self, check: F) -> Self
    where
        F: Fn(&T, &mut ValidationErrors) + Send + Sync + 'static,
    {
        self.refinements.push(Arc::new(check));
        self
    }
}

impl<T> Default for JsonSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonSchema<T> {
    fn clone(&self) -> Self {
        Self {
            refinements: self.refinements.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for JsonSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchema")
            .field("type", &std::any::type_name::<T>())
            .field("refinements", &self.refinements.len())
            .finish()
    }
}

impl<T> Schema for JsonSchema<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn safe_parse(&self, input: &Value) -> ValidationResult<T> {
        let value = serde_path_to_error::deserialize(input).map_err(|e| {
            let path = e.path().to_string();
            ValidationErrors::from(FieldError::from_serde_at(&path, e.inner()))
        })?;

        let mut errors = ValidationErrors::new();
        for check in &self.refinements {
            check(&value, &mut errors);
        }
        errors.into_result(value)
    }
}

/// Schema defined by a plain function
pub struct FnSchema<F, T> {
    parse: F,
    _marker: PhantomData<fn() -> T>,
}

/// Wrap a function as a [`Schema`]
pub fn schema_fn<F, T>(parse: F) -> FnSchema<F, T>
where
    F: Fn(&Value) -> ValidationResult<T> + Send + Sync + 'static,
    T: Send + 'static,
{
    FnSchema {
        parse,
        _marker: PhantomData,
    }
}

impl<F, T> Schema for FnSchema<F, T>
where
    F: Fn(&Value) -> ValidationResult<T> + Send + Sync + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn safe_parse(&self, input: &Value) -> ValidationResult<T> {
        (self.parse)(input)
    }
}
