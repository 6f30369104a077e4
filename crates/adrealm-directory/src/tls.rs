//! Connection security policy and TLS negotiation.
//!
//! The policy is derived once from configuration and threaded explicitly
//! through discovery and bind; nothing here reaches into shared realm state.

use tracing::{debug, warn};

use adrealm_core::config::TlsSettings;
use adrealm_core::error::Result;

use crate::discovery::ServerCandidate;
use crate::session::{DirectoryConnector, DirectorySession, Transport};

/// Well-known plaintext LDAP port.
pub const LDAP_PORT: u16 = 389;
/// Well-known LDAP-over-TLS port.
pub const LDAPS_PORT: u16 = 636;
/// Well-known plaintext global catalog port.
pub const GLOBAL_CATALOG_PORT: u16 = 3268;
/// Well-known global-catalog-over-TLS port.
pub const GLOBAL_CATALOG_TLS_PORT: u16 = 3269;

/// How a directory connection is secured.
///
/// `RequireTls` and `Plaintext` are mutually exclusive by construction;
/// `StartTls` only exists when TLS is not already mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSecurity {
    /// Connect over TLS from the start; negotiation failure is fatal for the
    /// candidate.
    RequireTls,
    /// Connect in plaintext, then attempt an in-band upgrade; upgrade failure
    /// downgrades to plaintext.
    StartTls,
    /// Plaintext only.
    Plaintext,
}

impl ConnectionSecurity {
    /// Derives the policy from configured flags. `require_tls` wins;
    /// `start_tls` only applies when TLS is not mandatory.
    #[must_use]
    pub const fn from_settings(settings: TlsSettings) -> Self {
        if settings.require_tls {
            Self::RequireTls
        } else if settings.start_tls {
            Self::StartTls
        } else {
            Self::Plaintext
        }
    }

    /// Default port for explicitly configured servers that omit one.
    #[must_use]
    pub const fn default_port(&self) -> u16 {
        match self {
            Self::RequireTls => LDAPS_PORT,
            Self::StartTls | Self::Plaintext => LDAP_PORT,
        }
    }

    /// Remaps well-known plaintext ports to their TLS equivalents when the
    /// policy mandates TLS. SRV records carry no TLS-specific entries, so
    /// discovered ports arrive as plaintext ports.
    #[must_use]
    pub const fn remap_port(&self, port: u16) -> u16 {
        if !matches!(self, Self::RequireTls) {
            return port;
        }
        match port {
            LDAP_PORT => LDAPS_PORT,
            GLOBAL_CATALOG_PORT => GLOBAL_CATALOG_TLS_PORT,
            other => other,
        }
    }
}

/// Certificate trust mode, orthogonal to [`ConnectionSecurity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertificateTrust {
    /// Accept any certificate without validation.
    TrustAll,
    /// Validate against the platform trust store.
    #[default]
    SystemRoots,
}

impl CertificateTrust {
    /// Derives the trust mode from configured flags.
    #[must_use]
    pub const fn from_settings(settings: TlsSettings) -> Self {
        if settings.trust_all_certificates {
            Self::TrustAll
        } else {
            Self::SystemRoots
        }
    }
}

/// Establishes a connection to a single candidate under a security policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsNegotiator;

impl TlsNegotiator {
    /// Opens a session against `candidate` according to `security`.
    ///
    /// Under `StartTls`, a failed upgrade attempt is not fatal: some servers
    /// leave the session unusable after a rejected upgrade, so the candidate
    /// is re-dialed with a fresh plaintext connection instead of reusing it.
    /// Under `RequireTls`, any failure propagates and the caller decides
    /// whether to move to the next candidate.
    ///
    /// # Errors
    ///
    /// Returns the connector's error when every permitted transport for the
    /// policy fails.
    pub async fn establish(
        &self,
        connector: &dyn DirectoryConnector,
        candidate: &ServerCandidate,
        security: ConnectionSecurity,
    ) -> Result<Box<dyn DirectorySession>> {
        match security {
            ConnectionSecurity::RequireTls => connector.open(candidate, Transport::Ldaps).await,
            ConnectionSecurity::Plaintext => connector.open(candidate, Transport::Plain).await,
            ConnectionSecurity::StartTls => {
                match connector.open(candidate, Transport::StartTls).await {
                    Ok(session) => {
                        debug!(server = %candidate, "connection upgraded to TLS");
                        Ok(session)
                    }
                    Err(err) => {
                        warn!(
                            server = %candidate,
                            error = %err,
                            "StartTLS upgrade failed; re-dialing in plaintext"
                        );
                        connector.open(candidate, Transport::Plain).await
                    }
                }
            }
        }
    }
}
