//! Error types for Blob Relay
//!
//! Uses `thiserror` for ergonomic error handling with full context preservation.

use crate::route::{BackendKind, ObjectLocation};
use std::fmt;
use thiserror::Error;

/// Boxed error used as the `source` of wrapped failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Primary error type for all relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Webhook handshake or origin check rejected
    #[error("Authentication failed: {message}")]
    Auth {
        message: String,
        callback_url: Option<String>,
        status: Option<u16>,
        body: Option<String>,
        #[source]
        source: Option<BoxError>,
    },

    /// Change notification does not match the expected schema
    #[error("Parse error: {message} ({field}={value:?})")]
    Parse {
        message: String,
        field: &'static str,
        value: String,
    },

    /// Policy evaluator unreachable or the rule set failed
    #[error("Policy evaluation failed: {message}")]
    Eval {
        message: String,
        input: String,
        #[source]
        source: Option<BoxError>,
    },

    /// No storage backend is configured for the source object's kind
    #[error("Unsupported source: no {kind} backend configured")]
    UnsupportedSource { kind: BackendKind },

    /// Copying to a destination failed
    #[error("Replication to {destination} failed: {message}")]
    Replication {
        message: String,
        destination: ObjectLocation,
        #[source]
        source: Option<BoxError>,
    },

    /// Storage backend I/O errors
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Message serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Operation timeout
    #[error("Timeout: {operation} exceeded {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Create an authentication error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
            callback_url: None,
            status: None,
            body: None,
            source: None,
        }
    }

    /// Create a parse error for a named field
    pub fn parse(message: impl Into<String>, field: &'static str, value: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            field,
            value: value.into(),
        }
    }

    /// Create a policy evaluation error
    pub fn eval(message: impl Into<String>, input: impl Into<String>) -> Self {
        Self::Eval {
            message: message.into(),
            input: input.into(),
            source: None,
        }
    }

    /// Create a policy evaluation error with source
    pub fn eval_with_source(
        message: impl Into<String>,
        input: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Eval {
            message: message.into(),
            input: input.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a replication error for a destination
    pub fn replication(message: impl Into<String>, destination: ObjectLocation) -> Self {
        Self::Replication {
            message: message.into(),
            destination,
            source: None,
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error with source
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Wrap this error as a failed replication to `destination`.
    ///
    /// Errors that already name a destination are returned unchanged.
    pub fn into_replication(self, destination: &ObjectLocation) -> Self {
        match self {
            Self::Replication { .. } | Self::UnsupportedSource { .. } => self,
            other => Self::Replication {
                message: other.to_string(),
                destination: destination.clone(),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Parse { .. } => "parse",
            Self::Eval { .. } => "eval",
            Self::UnsupportedSource { .. } => "unsupported_source",
            Self::Replication { .. } => "replication",
            Self::Storage { .. } => "storage",
            Self::Serialization { .. } => "serialization",
            Self::Configuration { .. } => "configuration",
            Self::Timeout { .. } => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    /// Check if the caller sent something we refuse to act on: a rejected
    /// handshake or a body that does not decode
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::Serialization { .. })
    }
}

/// Error context for enhanced debugging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub component: &'static str,
    pub operation: String,
    pub event_id: Option<String>,
    pub subject: Option<String>,
}

impl ErrorContext {
    pub fn new(component: &'static str, operation: impl Into<String>) -> Self {
        Self {
            component,
            operation: operation.into(),
            event_id: None,
            subject: None,
        }
    }

    /// Builder: attach the event being processed
    pub fn with_event(mut self, id: impl Into<String>, subject: impl Into<String>) -> Self {
        self.event_id = Some(id.into());
        self.subject = Some(subject.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}::{}]", self.component, self.operation)?;
        if let Some(ref id) = self.event_id {
            write!(f, " event={}", id)?;
        }
        if let Some(ref subject) = self.subject {
            write!(f, " subject={}", subject)?;
        }
        Ok(())
    }
}

/// Extension trait for adding context to errors
pub trait ErrorContextExt<T> {
    fn with_context(self, ctx: ErrorContext) -> Result<T>;
}

impl<T> ErrorContextExt<T> for Result<T> {
    fn with_context(self, ctx: ErrorContext) -> Result<T> {
        self.map_err(|e| {
            tracing::error!(
                error = %e,
                error_kind = e.kind(),
                component = ctx.component,
                operation = %ctx.operation,
                event_id = ?ctx.event_id,
                subject = ?ctx.subject,
                "Operation failed"
            );
            e
        })
    }
}
