//! Error types for the resale core
//!
//! This module defines all error types used throughout the crate.

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for resale operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the resale system
#[derive(Error, Debug)]
pub enum Error {
    /// Reseller balance cannot cover the action
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Cost of the action
        required: Decimal,
        /// Balance observed at the registry
        available: Decimal,
    },

    /// Customer payment was declined
    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    /// Customer payment needs additional authentication
    #[error("Payment requires additional action: {0}")]
    PaymentRequiresAction(String),

    /// Payment processor errors (transport, unexpected responses)
    #[error("Payment error: {0}")]
    Payment(String),

    /// Registry ledger errors
    #[error("Registry error ({ledger}): {message}")]
    Registry {
        /// Ledger name
        ledger: String,
        /// Error message
        message: String,
    },

    /// A paid registry action did not take effect
    #[error("Registry action failed: {0}")]
    RegistryActionFailed(String),

    /// Notification delivery errors
    #[error("Notification failed: {0}")]
    Notification(String),

    /// Persistence errors
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// An external call exceeded its time budget
    #[error("Timed out after {after:?}: {operation}")]
    Timeout {
        /// What was being attempted
        operation: String,
        /// The budget that elapsed
        after: Duration,
    },

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Scheduler errors (bad recurrence, unknown job, lifecycle misuse)
    #[error("Scheduler error: {0}")]
    Schedule(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a registry error
    pub fn registry(ledger: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Registry {
            ledger: ledger.into(),
            message: message.into(),
        }
    }

    /// Create a registry action failure
    pub fn registry_action(msg: impl Into<String>) -> Self {
        Self::RegistryActionFailed(msg.into())
    }

    /// Create a payment error
    pub fn payment(msg: impl Into<String>) -> Self {
        Self::Payment(msg.into())
    }

    /// Create a notification error
    pub fn notification(msg: impl Into<String>) -> Self {
        Self::Notification(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a scheduler error
    pub fn schedule(msg: impl Into<String>) -> Self {
        Self::Schedule(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Whether the error came from a call that hit its time budget
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
