//! Error types for session store operations.

use crate::backend::StoreError;

/// Error type for session store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required identifier is missing or shorter than its minimum length.
    #[error("invalid {field}: {message}")]
    Validation {
        /// Name of the offending field (`tmsi`, `imsi`, `msisdn`, ...).
        field: &'static str,
        /// Human-readable reason.
        message: String,
    },

    /// No live record exists for the TMSI.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// A live record already exists for the TMSI.
    #[error("Session already exists: {0}")]
    AlreadyExists(String),

    /// Session has expired under a caller-defined business rule.
    ///
    /// The store itself never returns this: a key reclaimed by the backend's
    /// TTL is indistinguishable from one never written and reads as
    /// [`Error::NotFound`].
    #[error("Session expired: {0}")]
    Expired(String),

    /// The operation context was cancelled before the operation completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// The backing store failed (connectivity, batch execution, wrong type).
    #[error("failed to {op}: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    /// A record could not be encoded or decoded.
    #[error("failed to {op}: {source}")]
    Serialization {
        op: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// TTL bounds are inconsistent.
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn store(op: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Store { op, source }
    }

    pub(crate) fn serialization(op: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Serialization { op, source }
    }

    /// Whether this is one of the domain outcomes (validation, not found,
    /// already exists, expired) rather than an infrastructure failure.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::NotFound(_) | Self::AlreadyExists(_) | Self::Expired(_)
        )
    }

    /// Whether this reports a missing session.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Name of the offending field for validation errors.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Result type for session store operations.
pub type Result<T> = std::result::Result<T, Error>;
