//! Error types for the permission constraint network.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! specific conditions. "Constraint not satisfied" is never an error; it is a
//! `false` from `is_constraint_activated`.

use thiserror::Error;

/// Validation errors raised at the boundary, before anything reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Permission id cannot be empty")]
    EmptyPermissionId,

    #[error("Account cannot be empty (in {context})")]
    EmptyAccount {
        context: &'static str,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Expression nesting exceeds maximum depth of {max_depth}")]
    ExpressionTooDeep {
        max_depth: usize,
    },

    #[error("Redelegation percentage {value} is out of range [0, 100]")]
    PercentageOutOfRange {
        value: u128,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors from the network runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Network command queue is full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Failures of the external chain-query capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("Chain connection failed: {message}")]
    Connection {
        message: String,
    },

    #[error("Chain query '{query}' failed: {message}")]
    Query {
        query: &'static str,
        message: String,
    },

    #[error("Chain query '{query}' timed out after {duration_ms}ms")]
    Timeout {
        query: &'static str,
        duration_ms: u64,
    },

    #[error("Invalid {kind} identifier: {value}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
    },

    #[error("Chain subscription failed: {message}")]
    Subscription {
        message: String,
    },
}

/// A chain event whose payload could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventParseError {
    #[error("Event {event} is missing argument #{index}")]
    MissingArgument {
        event: String,
        index: usize,
    },

    #[error("Event {event} argument #{index} is empty")]
    EmptyArgument {
        event: String,
        index: usize,
    },

    #[error("Event {event} argument #{index} is not a boolean: {value}")]
    InvalidBool {
        event: String,
        index: usize,
        value: String,
    },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum ReteError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Event error: {0}")]
    Event(#[from] EventParseError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ReteError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a chain error.
    #[must_use]
    pub const fn is_chain(&self) -> bool {
        matches!(self, Self::Chain(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Event(_) | Self::Internal { .. } => false,
            Self::Execution(e) => matches!(e, ExecutionError::QueueFull { .. } | ExecutionError::Timeout { .. }),
            Self::Chain(e) => matches!(
                e,
                ChainError::Connection { .. } | ChainError::Timeout { .. } | ChainError::Subscription { .. }
            ),
        }
    }
}

/// Result type alias for network operations.
pub type ReteResult<T> = Result<T, ReteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_percentage_message() {
        let err = ValidationError::PercentageOutOfRange { value: 150 };
        let msg = format!("{err}");
        assert!(msg.contains("150"));
        assert!(msg.contains("out of range"));
    }

    #[test]
    fn chain_error_timeout_message() {
        let err = ChainError::Timeout {
            query: "stake_of",
            duration_ms: 5000,
        };
        let msg = format!("{err}");
        assert!(msg.contains("stake_of"));
        assert!(msg.contains("5000ms"));
    }

    #[test]
    fn rete_error_from_validation_is_not_retryable() {
        let err: ReteError = ValidationError::EmptyPermissionId.into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn rete_error_queue_full_is_retryable() {
        let err: ReteError = ExecutionError::QueueFull { capacity: 8 }.into();
        assert!(err.is_execution());
        assert!(err.is_retryable());
    }

    #[test]
    fn rete_error_chain_classification() {
        let conn: ReteError = ChainError::Connection {
            message: "refused".to_string(),
        }
        .into();
        assert!(conn.is_chain());
        assert!(conn.is_retryable());

        let bad_id: ReteError = ChainError::InvalidIdentifier {
            kind: "permission",
            value: "xyz".to_string(),
        }
        .into();
        assert!(!bad_id.is_retryable());
    }

    #[test]
    fn rete_error_internal() {
        let err = ReteError::internal("unexpected state");
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("unexpected state"));
    }
}
