//! DNS service-discovery abstraction.
//!
//! Discovery is specified against this trait, not against a concrete
//! resolver, so that server-location logic can be exercised without a live
//! DNS server. The production implementation delegates to
//! `trust-dns-resolver` configured from the system resolver settings.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use trust_dns_resolver::TokioAsyncResolver;

use adrealm_core::error::{Error, Result};

/// A single DNS SRV record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    /// Record priority. Note that Active Directory discovery ranks higher
    /// values first.
    pub priority: u16,
    /// Record weight. Currently carried but not used for ordering.
    pub weight: u16,
    /// Service port.
    pub port: u16,
    /// Target host name, possibly with a trailing dot.
    pub target: String,
}

/// Resolves SRV records for a service name.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SrvResolver: Send + Sync {
    /// Looks up all SRV records for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DiscoveryFailed`] when the lookup fails; an empty
    /// record set is returned as an empty vector, not an error.
    async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvRecord>>;
}

/// SRV resolver backed by the system DNS configuration.
pub struct SystemSrvResolver {
    resolver: TokioAsyncResolver,
}

impl SystemSrvResolver {
    /// Creates a resolver from the system DNS configuration with the given
    /// per-query timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] when the system resolver configuration
    /// cannot be read.
    pub fn from_system_conf(query_timeout: Duration) -> Result<Self> {
        let (config, mut opts) = trust_dns_resolver::system_conf::read_system_conf()
            .map_err(|err| Error::ConfigError(format!("failed to read DNS configuration: {err}")))?;
        opts.timeout = query_timeout;
        opts.attempts = 2;
        Ok(Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        })
    }
}

#[async_trait]
impl SrvResolver for SystemSrvResolver {
    async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvRecord>> {
        debug!(name, "querying SRV records");
        let lookup = self
            .resolver
            .srv_lookup(name)
            .await
            .map_err(|err| Error::DiscoveryFailed(format!("SRV lookup for {name} failed: {err}")))?;

        Ok(lookup
            .iter()
            .map(|srv| SrvRecord {
                priority: srv.priority(),
                weight: srv.weight(),
                port: srv.port(),
                target: srv.target().to_utf8(),
            })
            .collect())
    }
}
