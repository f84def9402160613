//! Error types for the WebApp operator
//!
//! Errors from the Kubernetes API are classified by HTTP status so the
//! reconciler can tell absence (404) and concurrent modification (409) apart
//! from transient access failures. Each variant carries the kind and name of
//! the resource involved to aid debugging in production.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific resource is known
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for WebApp operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The addressed object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// Name of the missing object
        name: String,
    },

    /// The object was modified concurrently (optimistic concurrency failure)
    #[error("conflict writing {kind} {name}: {message}")]
    Conflict {
        /// Kind of the conflicting object
        kind: String,
        /// Name of the conflicting object
        name: String,
        /// Message returned by the API server
        message: String,
    },

    /// Any other Kubernetes API failure (network, unavailability, rejection)
    #[error("kubernetes error on {kind} {name}: {source}")]
    Access {
        /// Kind of the object being accessed
        kind: String,
        /// Name of the object being accessed
        name: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// Owner linkage could not be established for a managed object
    #[error("ownership setup failed for {kind} {name}: {message}")]
    OwnershipSetup {
        /// Kind of the object that would have been created
        kind: String,
        /// Name of the object that would have been created
        name: String,
        /// Description of what is missing
        message: String,
    },

    /// Validation error for the WebApp spec
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The invocation was cancelled by shutdown or deadline
    #[error("reconciliation cancelled: {0}")]
    Cancelled(String),
}

impl From<kube::Error> for Error {
    fn from(source: kube::Error) -> Self {
        Self::from_kube(UNKNOWN_CONTEXT, UNKNOWN_CONTEXT, source)
    }
}

impl Error {
    /// Classify a kube-rs error raised while accessing `kind`/`name`
    ///
    /// 404 becomes [`Error::NotFound`], 409 becomes [`Error::Conflict`],
    /// everything else is an [`Error::Access`] failure.
    pub fn from_kube(kind: impl Into<String>, name: impl Into<String>, source: kube::Error) -> Self {
        let kind = kind.into();
        let name = name.into();
        match source {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound { kind, name },
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                kind,
                name,
                message: ae.message,
            },
            source => Self::Access { kind, name, source },
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(
        kind: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an ownership setup error
    pub fn ownership(
        kind: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::OwnershipSetup {
            kind: kind.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a cancellation error with the given reason
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Returns true if this error signals absence of the addressed object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this error is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors require a spec change. Access
    /// errors are retryable unless the API server rejected the request itself.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Conflict { .. } => true,
            Self::Access { source, .. } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Self::OwnershipSetup { .. } => true,
            Self::Validation(_) => false,
            Self::Serialization(_) => false,
            Self::Cancelled(_) => true,
        }
    }

    /// Machine-readable reason used in status conditions
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::Conflict { .. } => "Conflict",
            Self::Access { .. } => "TransientAccess",
            Self::OwnershipSetup { .. } => "OwnershipSetup",
            Self::Validation(_) => "ValidationFailed",
            Self::Serialization(_) => "SerializationFailed",
            Self::Cancelled(_) => "Cancelled",
        }
    }

    /// Requeue delay for this error, or `None` when only a spec change can help
    pub fn requeue_after(&self, backoff: Duration, conflict: Duration) -> Option<Duration> {
        if !self.is_retryable() {
            return None;
        }
        if self.is_conflict() {
            Some(conflict)
        } else {
            Some(backoff)
        }
    }
}
