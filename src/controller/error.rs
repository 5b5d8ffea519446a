//! Error types for the Cluster and plugin controllers

use std::time::Duration;

use thiserror::Error;

#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Unsupported cluster version: {0:?}")]
    UnsupportedVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Transient error (will retry): {0}")]
    TransientError(String),
}

impl Error {
    /// Check if this error is retryable on a timer.
    ///
    /// Configuration errors (unknown version, invalid config) will not heal
    /// until the spec changes, so they wait for the next watch event instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            // Any remote failure (network, conflict, throttling, RBAC) is retried
            Error::KubeError(_) => true,
            Error::TransientError(_) => true,
            Error::NotFound(_) => true,
            Error::SerializationError(_) => true,
            Error::MissingObjectKey(_) => true,
            Error::UnsupportedVersion(_) => false,
            Error::InvalidConfig(_) => false,
        }
    }

    /// Check if this error means the object is absent
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::KubeError(kube::Error::Api(api_err)) => api_err.code == 404,
            _ => false,
        }
    }

    /// Check if this error means the object already exists
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(api_err)) if api_err.code == 409 && api_err.reason == "AlreadyExists")
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Default delay before a failed pass is retried
pub const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_secs(1);

/// Fixed-delay retry policy shared by every controller.
///
/// All transient failures are retried after the same delay; there is no
/// exponential growth and no jitter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before a failed pass is retried
    pub requeue_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            requeue_delay: DEFAULT_REQUEUE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(requeue_delay: Duration) -> Self {
        Self { requeue_delay }
    }

    /// Delay for an error, or `None` when the error must wait for a spec change
    pub fn delay_for_error(&self, error: &Error) -> Option<Duration> {
        if error.is_retryable() {
            Some(self.requeue_delay)
        } else {
            None
        }
    }
}
