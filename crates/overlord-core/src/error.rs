//! Error taxonomy and core error types.
//!
//! [`ResourceError`] turns one raw failure description into a structured
//! `{message, errors}` report. Each rendering method consumes the error, so
//! exactly one kind can be chosen per instance.

use serde::Serialize;
use thiserror::Error;

use crate::SubscriberId;

/// Category of a rendered error report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Json,
    Binary,
    Value,
    Model,
    Missing,
    Invalid,
    Duplicate,
}

impl ErrorKind {
    /// Returns the snake_case name used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Binary => "binary",
            Self::Value => "value",
            Self::Model => "model",
            Self::Missing => "missing",
            Self::Invalid => "invalid",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Structured error response: `{"message": ..., "errors": ...}`.
///
/// The kind is kept for callers that map reports to status codes; it is
/// not part of the serialized shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    #[serde(skip)]
    pub kind: ErrorKind,
    pub message: String,
    pub errors: String,
}

/// A raw failure waiting to be rendered as an [`ErrorReport`].
#[derive(Debug, Clone)]
pub struct ResourceError {
    description: String,
}

impl ResourceError {
    /// Wraps any displayable failure.
    pub fn new(error: impl std::fmt::Display) -> Self {
        Self {
            description: error.to_string(),
        }
    }

    fn report(self, kind: ErrorKind, message: String) -> ErrorReport {
        ErrorReport {
            kind,
            message,
            errors: self.description,
        }
    }

    /// Malformed JSON input.
    pub fn json(self) -> ErrorReport {
        self.report(ErrorKind::Json, "Invalid JSON Object".to_string())
    }

    /// Malformed binary (msgpack) input.
    pub fn binary(self) -> ErrorReport {
        self.report(ErrorKind::Binary, "Invalid Binary Object".to_string())
    }

    /// A value failed validation.
    pub fn value(self) -> ErrorReport {
        self.report(ErrorKind::Value, "Value Error".to_string())
    }

    /// Model validation failure.
    ///
    /// The description is split on the first `-`: the head becomes the
    /// message with `Model` replaced by `<resource> resource`, the tail
    /// becomes the errors payload. Later `-` separators in the tail are kept
    /// as ` - `.
    pub fn model(self, resource: &str) -> ErrorReport {
        let qualified = format!("{resource} resource");
        let mut parts = self.description.split('-');
        let head = parts.next().unwrap_or_default();

        let message = head.trim_matches(' ').replace("Model", &qualified);
        let errors = parts
            .collect::<String>()
            .replace("  ", " - ")
            .trim()
            .to_string();

        ErrorReport {
            kind: ErrorKind::Model,
            message,
            errors,
        }
    }

    /// Referenced resource does not exist.
    pub fn missing(self, resource: &str, name: &str) -> ErrorReport {
        let message = format!("Missing {resource} resource [\"{name}\"].");
        self.report(ErrorKind::Missing, message)
    }

    /// Referenced resource exists but is not usable.
    pub fn invalid(self, resource: &str, name: &str) -> ErrorReport {
        let message = format!("Invalid {resource} resource [\"{name}\"].");
        self.report(ErrorKind::Invalid, message)
    }

    /// Unique field collision.
    pub fn duplicate(self, resource: &str, field: &str, value: &str) -> ErrorReport {
        let message = format!("{resource} {field} [\"{value}\"] invalid or already taken.");
        self.report(ErrorKind::Duplicate, message)
    }
}

/// Errors raised by core channel operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A channel was used before its handshake completed.
    #[error("connection not ready: {operation} requires a completed handshake")]
    ConnectionNotReady { operation: String },

    /// The channel was already registered under another identity.
    #[error("channel already registered as {subscriber_id}")]
    AlreadyRegistered { subscriber_id: SubscriberId },
}
