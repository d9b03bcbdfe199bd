//! Core error types.

use thiserror::Error;

use crate::driver::DriverError;

/// A field value failed its type constraints.
///
/// Raised before any database call; the caller recovers by fixing the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// Human readable description.
    pub message: String,
}

impl ValidationError {
    /// Create a validation error for a field.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Prefix the field path with an enclosing field name.
    pub fn within(mut self, parent: &str) -> Self {
        self.field = join_path(parent, &self.field);
        self
    }
}

/// A wire or database representation could not be coerced to native form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{message}", field_prefix(.field))]
pub struct ConversionError {
    /// Dotted path of the offending field, empty when not yet known.
    pub field: String,
    /// Human readable description.
    pub message: String,
}

impl ConversionError {
    /// Create a conversion error without a field path.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: String::new(),
            message: message.into(),
        }
    }

    /// Prefix the field path with an enclosing field name.
    pub fn within(mut self, parent: &str) -> Self {
        self.field = join_path(parent, &self.field);
        self
    }
}

fn field_prefix(field: &str) -> String {
    if field.is_empty() {
        String::new()
    } else {
        format!("{}: ", field)
    }
}

fn join_path(parent: &str, child: &str) -> String {
    match (parent.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => parent.to_string(),
        _ => format!("{}.{}", parent, child),
    }
}

/// Engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Field value failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Malformed wire or database representation.
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// A referenced class key is unknown to the registry.
    #[error("record class `{0}` is not registered")]
    NotRegistered(String),

    /// Two different classes were registered under one key.
    #[error("record class key `{0}` is already registered to a different class")]
    DuplicateRegistration(String),

    /// A schema declaration is inconsistent.
    #[error("invalid schema for `{class}`: {message}")]
    Schema {
        /// Class key being registered.
        class: String,
        /// What is wrong with it.
        message: String,
    },

    /// The engine refused the operation (DENY rule, wrong class in a bulk insert, ...).
    #[error("operation error: {0}")]
    Operation(String),

    /// The database reported a non-success result for a write.
    #[error("operation failure: {0}")]
    OperationFailure(String),

    /// Transient connectivity failure, surfaced after retries were exhausted.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// The manager has no database handle.
    #[error("manager for `{0}` is not bound to a database")]
    Unbound(String),

    /// Cascading removal went deeper than the configured limit.
    #[error("cascade depth exceeded: {depth}")]
    CascadeDepthExceeded {
        /// Depth at which the cascade was stopped.
        depth: usize,
    },
}

impl Error {
    /// Prefix the field path of a validation or conversion error.
    pub(crate) fn within(self, parent: &str) -> Self {
        match self {
            Error::Validation(err) => Error::Validation(err.within(parent)),
            Error::Conversion(err) => Error::Conversion(err.within(parent)),
            other => other,
        }
    }
}

impl From<DriverError> for Error {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Connection(message) => Error::ConnectionFailure(message),
            other => Error::OperationFailure(other.to_string()),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
