//! Error types for directory authentication operations.
//!
//! The error enum is deliberately a small closed set: callers of the
//! authentication layer receive one of these classifications, with the most
//! specific available diagnostic attached as plain text. Raw protocol or
//! resolver error text is only ever carried inside a variant, never used as
//! the classification itself.

use thiserror::Error;

/// Main error type for directory authentication operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Configuration is malformed or incomplete; fatal at setup, never retried.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The realm has no domains configured.
    #[error("No domains configured")]
    NoDomainsConfigured,

    /// A DNS lookup failed while discovering directory servers.
    #[error("Service discovery failed: {0}")]
    DiscoveryFailed(String),

    /// No directory servers could be located for a domain.
    #[error("No directory servers found for domain {domain}{}", .detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    NoServersFound {
        /// Domain whose discovery yielded nothing.
        domain: String,
        /// Causing lookup error, if any.
        detail: Option<String>,
    },

    /// TLS negotiation failed against a server that requires it.
    #[error("TLS negotiation with {server} failed: {message}")]
    TlsNegotiationFailed {
        /// Server the handshake was attempted against.
        server: String,
        /// Handshake failure detail.
        message: String,
    },

    /// The directory rejected the supplied credentials.
    #[error("Authentication rejected{}: {reason}", .domain.as_deref().map(|d| format!(" by domain {d}")).unwrap_or_default())]
    AuthenticationRejected {
        /// Domain that rejected the credentials, when known.
        domain: Option<String>,
        /// Rejection detail as reported by the server.
        reason: String,
    },

    /// Every candidate server for a domain failed with a transient error.
    #[error("All directory servers for domain {domain} are unreachable; last cause: {last_cause}")]
    AllServersUnreachable {
        /// Domain whose candidate list was exhausted.
        domain: String,
        /// Most recent transient failure.
        last_cause: String,
    },

    /// The user does not exist in any configured domain.
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// The group does not exist in any configured domain.
    #[error("Group not found: {0}")]
    GroupNotFound(String),

    /// A network operation exceeded its configured timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A transport or protocol level directory failure.
    #[error("Directory error from {server}: {message}")]
    DirectoryError {
        /// Server that produced the failure.
        server: String,
        /// Failure detail.
        message: String,
    },

    /// A security identifier could not be parsed.
    #[error("Invalid security identifier: {0}")]
    InvalidSid(String),
}

/// Specialized result type for directory authentication operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the stable error code for this error type.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::NoDomainsConfigured => "NO_DOMAINS_CONFIGURED",
            Self::DiscoveryFailed(_) => "DISCOVERY_FAILED",
            Self::NoServersFound { .. } => "NO_SERVERS_FOUND",
            Self::TlsNegotiationFailed { .. } => "TLS_NEGOTIATION_FAILED",
            Self::AuthenticationRejected { .. } => "AUTHENTICATION_REJECTED",
            Self::AllServersUnreachable { .. } => "ALL_SERVERS_UNREACHABLE",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::GroupNotFound(_) => "GROUP_NOT_FOUND",
            Self::Timeout(_) => "TIMEOUT",
            Self::DirectoryError { .. } => "DIRECTORY_ERROR",
            Self::InvalidSid(_) => "INVALID_SID",
        }
    }

    /// Returns true when a failover loop may move on to the next candidate
    /// server after this error.
    ///
    /// Credential rejections are excluded: retrying the same credentials
    /// against further servers can amplify an account lockout. Timeouts are
    /// always transient, never a rejection.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryFailed(_)
                | Self::TlsNegotiationFailed { .. }
                | Self::Timeout(_)
                | Self::DirectoryError { .. }
        )
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::ConfigError(_)
                | Self::NoDomainsConfigured
                | Self::AllServersUnreachable { .. }
                | Self::TlsNegotiationFailed { .. }
        )
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            Error::ConfigError("x".to_string()).error_code(),
            "CONFIG_ERROR"
        );
        assert_eq!(Error::NoDomainsConfigured.error_code(), "NO_DOMAINS_CONFIGURED");
        assert_eq!(
            Error::NoServersFound {
                domain: "example.com".to_string(),
                detail: None,
            }
            .error_code(),
            "NO_SERVERS_FOUND"
        );
        assert_eq!(
            Error::AuthenticationRejected {
                domain: Some("example.com".to_string()),
                reason: "invalid credentials".to_string(),
            }
            .error_code(),
            "AUTHENTICATION_REJECTED"
        );
        assert_eq!(
            Error::Timeout("bind".to_string()).error_code(),
            "TIMEOUT"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(Error::Timeout("connect".to_string()).is_transient());
        assert!(Error::DirectoryError {
            server: "dc1:389".to_string(),
            message: "connection refused".to_string(),
        }
        .is_transient());

        assert!(!Error::AuthenticationRejected {
            domain: None,
            reason: "invalid credentials".to_string(),
        }
        .is_transient());
        assert!(!Error::UserNotFound("jdoe".to_string()).is_transient());
        assert!(!Error::ConfigError("bad".to_string()).is_transient());
    }

    #[test]
    fn display_includes_context() {
        let err = Error::AllServersUnreachable {
            domain: "example.com".to_string(),
            last_cause: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "All directory servers for domain example.com are unreachable; last cause: connection refused"
        );

        let err = Error::AuthenticationRejected {
            domain: Some("example.com".to_string()),
            reason: "code 49".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Authentication rejected by domain example.com: code 49"
        );
    }
}
