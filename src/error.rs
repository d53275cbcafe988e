//! Error types for the governance engine

use std::io;

use thiserror::Error;

/// Result type alias for governance operations
pub type Result<T> = std::result::Result<T, Error>;

/// Governance engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No instance available for selection
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Network operation failed (connect/send/recv)
    #[error("Network failed: {0}")]
    NetworkFailed(String),

    /// Peer answered with an unexpected response
    #[error("Server error: {0}")]
    ServerError(String),

    /// Operation exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A bounded resource (worker, admission slot) is exhausted
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors that describe a failed remote interaction, as opposed
    /// to local misuse or misconfiguration.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::NetworkFailed(_) | Self::Timeout(_) | Self::Http(_) | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_classification() {
        assert!(Error::NetworkFailed("refused".into()).is_network());
        assert!(Error::Timeout("probe".into()).is_network());
        assert!(!Error::Config("bad key".into()).is_network());
        assert!(!Error::InstanceNotFound("svc".into()).is_network());
    }

    #[test]
    fn display_includes_detail() {
        let err = Error::InstanceNotFound("payments/checkout".into());
        assert_eq!(err.to_string(), "Instance not found: payments/checkout");
    }
}
