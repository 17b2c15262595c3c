// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Courier session gateway.

use thiserror::Error;

use crate::types::Direction;

/// The primary error type used across Courier traits and core operations.
#[derive(Debug, Error)]
pub enum CourierError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, filesystem).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Transport errors (handshake failure, socket closed, protocol rejection).
    #[error("transport error: {message}")]
    Transport {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The account has no connected transport handle.
    #[error("no active connection for account {account_id}")]
    NoActiveConnection { account_id: String },

    /// The recipient address cannot be routed.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Caller supplied input that failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The requested account has no session.
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// A bounded resource refused a new entry.
    #[error("{resource} capacity of {capacity} exceeded")]
    CapacityExceeded { resource: String, capacity: usize },

    /// A queue direction already has a handler.
    #[error("a handler is already registered for the {0} queue")]
    HandlerAlreadyRegistered(Direction),

    /// A job reached the failed set.
    #[error("job {job_id} failed: {message}")]
    JobFailed { job_id: i64, message: String },

    /// An operation was invoked before `initialize()` completed.
    #[error("service is not initialized")]
    NotInitialized,

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CourierError {
    /// Wraps any error as a storage failure.
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CourierError::Storage {
            source: Box::new(err),
        }
    }

    /// Builds a transport error without an underlying source.
    pub fn transport(message: impl Into<String>) -> Self {
        CourierError::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Whether a queue job that failed with this error may be attempted again.
    ///
    /// Errors caused by the request itself (no live session, bad recipient,
    /// malformed payload) fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CourierError::NoActiveConnection { .. }
                | CourierError::InvalidRecipient(_)
                | CourierError::InvalidInput(_)
                | CourierError::AccountNotFound(_)
                | CourierError::Serialization(_)
                | CourierError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_are_not_retryable() {
        let no_conn = CourierError::NoActiveConnection {
            account_id: "acct-1".into(),
        };
        assert!(!no_conn.is_retryable());
        assert!(!CourierError::InvalidRecipient("@".into()).is_retryable());
        assert!(!CourierError::InvalidInput("empty text".into()).is_retryable());
    }

    #[test]
    fn infrastructure_errors_are_retryable() {
        assert!(CourierError::transport("socket reset").is_retryable());
        assert!(CourierError::storage(std::io::Error::other("disk")).is_retryable());
        let timeout = CourierError::Timeout {
            duration: std::time::Duration::from_secs(1),
        };
        assert!(timeout.is_retryable());
    }

    #[test]
    fn messages_name_the_account() {
        let err = CourierError::NoActiveConnection {
            account_id: "acct-9".into(),
        };
        assert_eq!(err.to_string(), "no active connection for account acct-9");
    }
}
