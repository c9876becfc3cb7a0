//! Error types shared across fleetroll crates.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for control-plane calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for orchestration operations.
pub type FleetResult<T> = Result<T, FleetError>;

/// Errors a control-plane or load-balancer call can return.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// The instance is not (yet) known to the named balancer.
    #[error("instance {instance_id} is not known to {resource}")]
    InvalidInstance {
        resource: String,
        instance_id: String,
    },

    /// Validation failure, throttling, permissions, ...
    #[error("{operation} rejected: {message}")]
    Rejected { operation: String, message: String },
}

impl ApiError {
    pub fn rejected(operation: &str, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by a rolling replacement session.
///
/// Every variant is fatal to the session. Nothing is retried and no
/// compensating capacity change is attempted.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("group not found: {0}")]
    NotFound(String),

    #[error("waited too long for {what} ({waited:?}) at {at}")]
    Timeout {
        what: String,
        waited: Duration,
        at: String,
    },

    #[error("cancelled while waiting for {what}")]
    Cancelled { what: String },

    #[error("remote fault: {0}")]
    Remote(#[from] ApiError),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FleetError {
    /// Short machine-readable kind, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::Remote(_) => "remote_fault",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}
