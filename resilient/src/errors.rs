//! Error types for the resilient framework.
//!
//! Failures fall in three families:
//! - control failures raised by the framework itself ([`ExecutionError`]),
//! - domain failures produced by the protected operation,
//! - storage failures produced by the durable queue backend.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The reason carried by a control failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// The execution was cancelled through its cancellation token.
    Cancel,
    /// The bulkhead had no free slot nor queue room.
    Bulkhead,
    /// The circuit breaker is open.
    Circuit,
}

impl Reason {
    /// Returns the wire name of the reason.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cancel => "cancel",
            Self::Bulkhead => "bulkhead",
            Self::Circuit => "circuit",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure raised by a strategy to signal a policy decision.
///
/// These are never produced by the protected operation itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Execution error: {reason}{}", .message.as_ref().map(|m| format!(", {m}")).unwrap_or_default())]
pub struct ExecutionError {
    /// Why the execution was rejected.
    pub reason: Reason,
    /// Optional additional detail.
    pub message: Option<String>,
}

impl ExecutionError {
    /// Creates a new execution error.
    #[must_use]
    pub const fn new(reason: Reason) -> Self {
        Self {
            reason,
            message: None,
        }
    }

    /// Sets the detail message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Returns true if `error` is (or wraps) an execution error, optionally
    /// of the given reason.
    #[must_use]
    pub fn is(error: &(dyn std::error::Error + 'static), reason: Option<Reason>) -> bool {
        let found = error
            .downcast_ref::<Self>()
            .map(|e| e.reason)
            .or_else(|| error.downcast_ref::<ResilientError>().and_then(ResilientError::reason));

        match (found, reason) {
            (Some(found), Some(reason)) => found == reason,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("reason".to_string(), serde_json::json!(self.reason.as_str()));
        if let Some(ref message) = self.message {
            map.insert("message".to_string(), serde_json::json!(message));
        }
        map.insert("error".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// The main error type for resilient operations.
///
/// Every variant is reference counted so errors can be cloned into event
/// streams and compared by identity with [`ResilientError::same_as`].
#[derive(Debug, Clone, Error)]
pub enum ResilientError {
    /// A control failure: cancel, bulkhead or circuit.
    #[error("{0}")]
    Execution(Arc<ExecutionError>),

    /// A failure produced by the protected operation.
    #[error("{0}")]
    Operation(Arc<anyhow::Error>),

    /// A failure of the storage backend.
    #[error("Storage error: {0}")]
    Storage(Arc<anyhow::Error>),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResilientError {
    /// Creates a control failure for the given reason.
    #[must_use]
    pub fn execution(reason: Reason) -> Self {
        Self::Execution(Arc::new(ExecutionError::new(reason)))
    }

    /// Creates a cancellation failure.
    #[must_use]
    pub fn cancel() -> Self {
        Self::execution(Reason::Cancel)
    }

    /// Creates a bulkhead rejection.
    #[must_use]
    pub fn bulkhead() -> Self {
        Self::execution(Reason::Bulkhead)
    }

    /// Creates a circuit rejection.
    #[must_use]
    pub fn circuit() -> Self {
        Self::execution(Reason::Circuit)
    }

    /// Normalizes an operation failure.
    ///
    /// An error that already carries a `ResilientError` (for example the
    /// rejection of a nested policy) is unwrapped so its identity is kept.
    #[must_use]
    pub fn operation(error: anyhow::Error) -> Self {
        match error.downcast::<Self>() {
            Ok(inner) => inner,
            Err(error) => match error.downcast::<ExecutionError>() {
                Ok(inner) => Self::Execution(Arc::new(inner)),
                Err(error) => Self::Operation(Arc::new(error)),
            },
        }
    }

    /// Converts a caught panic into an operation failure.
    #[must_use]
    pub fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::Operation(Arc::new(anyhow::anyhow!("panicked: {message}")))
    }

    /// Wraps a storage backend failure.
    #[must_use]
    pub fn storage(error: impl Into<anyhow::Error>) -> Self {
        let error = error.into();
        match error.downcast::<Self>() {
            Ok(inner @ Self::Storage(_)) => inner,
            Ok(other) => Self::Storage(Arc::new(anyhow::Error::new(other))),
            Err(error) => Self::Storage(Arc::new(error)),
        }
    }

    /// Returns the control reason, if this is a control failure.
    #[must_use]
    pub fn reason(&self) -> Option<Reason> {
        match self {
            Self::Execution(e) => Some(e.reason),
            _ => None,
        }
    }

    /// Returns true if this is a control failure of the given reason.
    #[must_use]
    pub fn is_reason(&self, reason: Reason) -> bool {
        self.reason() == Some(reason)
    }

    /// Returns true if this is a control failure of any reason.
    #[must_use]
    pub const fn is_execution_error(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a storage failure.
    #[must_use]
    pub const fn is_storage_error(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if both values are the same error object.
    ///
    /// Clones share identity; two separately created errors never do,
    /// even when they render identically.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Execution(a), Self::Execution(b)) => Arc::ptr_eq(a, b),
            (Self::Operation(a), Self::Operation(b)) | (Self::Storage(a), Self::Storage(b)) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        let kind = match self {
            Self::Execution(e) => {
                map.extend(e.to_dict());
                "ExecutionError"
            }
            Self::Operation(_) => "OperationError",
            Self::Storage(_) => "StorageError",
            Self::Serialization(_) => "SerializationError",
            Self::Internal(_) => "InternalError",
        };

        map.insert("type".to_string(), serde_json::json!(kind));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

impl From<ExecutionError> for ResilientError {
    fn from(err: ExecutionError) -> Self {
        Self::Execution(Arc::new(err))
    }
}

impl From<serde_json::Error> for ResilientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result alias used across the crate.
pub type Result<T, E = ResilientError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_message() {
        let err = ExecutionError::new(Reason::Bulkhead);
        assert_eq!(err.to_string(), "Execution error: bulkhead");

        let err = ExecutionError::new(Reason::Cancel).with_message("user abort");
        assert_eq!(err.to_string(), "Execution error: cancel, user abort");
    }

    #[test]
    fn test_reason_capability() {
        let err = ResilientError::circuit();
        assert!(err.is_execution_error());
        assert!(err.is_reason(Reason::Circuit));
        assert!(!err.is_reason(Reason::Cancel));

        let err = ResilientError::operation(anyhow::anyhow!("boom"));
        assert!(!err.is_execution_error());
        assert_eq!(err.reason(), None);
    }

    #[test]
    fn test_is_on_foreign_errors() {
        let err = ResilientError::bulkhead();
        assert!(ExecutionError::is(&err, None));
        assert!(ExecutionError::is(&err, Some(Reason::Bulkhead)));
        assert!(!ExecutionError::is(&err, Some(Reason::Circuit)));

        let io = std::io::Error::new(std::io::ErrorKind::Other, "Execution error: cancel");
        assert!(!ExecutionError::is(&io, None));
    }

    #[test]
    fn test_operation_unwraps_nested_errors() {
        let original = ResilientError::cancel();
        let wrapped = anyhow::Error::new(original.clone());

        let normalized = ResilientError::operation(wrapped);
        assert!(normalized.same_as(&original));

        let plain = ResilientError::operation(anyhow::Error::new(ExecutionError::new(Reason::Circuit)));
        assert!(plain.is_reason(Reason::Circuit));
    }

    #[test]
    fn test_same_as_is_identity() {
        let a = ResilientError::operation(anyhow::anyhow!("same text"));
        let b = ResilientError::operation(anyhow::anyhow!("same text"));

        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
        assert!(!ResilientError::cancel().same_as(&ResilientError::cancel()));
    }

    #[test]
    fn test_storage_wrapping() {
        let err = ResilientError::storage(anyhow::anyhow!("disk full"));
        assert!(err.is_storage_error());
        assert_eq!(err.to_string(), "Storage error: disk full");

        let again = ResilientError::storage(anyhow::Error::new(err.clone()));
        assert!(again.same_as(&err));
    }

    #[test]
    fn test_panicked_keeps_message() {
        let caught = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        let err = ResilientError::panicked(caught.as_ref());
        assert_eq!(err.to_string(), "panicked: boom");
        assert!(!err.is_execution_error());

        let caught = std::panic::catch_unwind(|| panic!("{} items", 3)).unwrap_err();
        assert_eq!(ResilientError::panicked(caught.as_ref()).to_string(), "panicked: 3 items");
    }

    #[test]
    fn test_to_dict() {
        let dict = ResilientError::bulkhead().to_dict();
        assert_eq!(dict.get("type").unwrap(), "ExecutionError");
        assert_eq!(dict.get("reason").unwrap(), "bulkhead");
    }
}
