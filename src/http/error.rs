//! Error types for the HTTP provisioner.

use thiserror::Error;

use crate::backend::ProvisionOperation;
use crate::config::ConfigError;

/// Errors raised by [`super::HttpProvisioner`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HttpProvisionerError {
    /// Raised when the provisioner configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the request never produced a response.
    #[error("provider error: {message}")]
    Provider {
        /// Transport error reported by the HTTP client.
        message: String,
    },
    /// Raised when the service answered with a non-success status.
    #[error("{operation} for {resource} rejected with status {status}: {message}")]
    Rejected {
        /// Operation that was dispatched.
        operation: ProvisionOperation,
        /// Resource the operation targeted.
        resource: String,
        /// HTTP status code.
        status: u16,
        /// Response body, when the service sent one.
        message: String,
    },
}

impl From<ConfigError> for HttpProvisionerError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<reqwest::Error> for HttpProvisionerError {
    fn from(value: reqwest::Error) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}
