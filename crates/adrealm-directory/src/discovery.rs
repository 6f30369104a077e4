//! Domain controller discovery.
//!
//! Translates a domain name (and optional site) into a ranked list of
//! reachable directory servers via DNS SRV records, or returns a statically
//! configured list when one is supplied. An explicit server list is an
//! override, not a hint: discovery performs no DNS lookups at all for it.

use std::fmt;
use std::sync::Arc;
use tracing::debug;

use adrealm_core::config::DomainConfig;
use adrealm_core::error::{Error, Result};

use crate::dns::{SrvRecord, SrvResolver};
use crate::tls::ConnectionSecurity;

/// A candidate directory server, produced fresh per discovery call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerCandidate {
    /// Host name of the server.
    pub host: String,
    /// Port to connect on, already remapped for the active security policy.
    pub port: u16,
}

impl ServerCandidate {
    /// Creates a candidate.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolves domains to prioritized candidate server lists.
pub struct ServerDiscovery {
    resolver: Arc<dyn SrvResolver>,
}

impl ServerDiscovery {
    /// Creates a discovery instance over the given resolver.
    #[must_use]
    pub fn new(resolver: Arc<dyn SrvResolver>) -> Self {
        Self { resolver }
    }

    /// Resolves the domain to an ordered candidate list.
    ///
    /// When the domain carries an explicit server list it is parsed and
    /// returned in the given order with no DNS involved. Otherwise SRV tiers
    /// are queried in fixed precedence (global catalog before plain domain
    /// controller, site-scoped before unscoped) until one yields records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] for a malformed explicit list and
    /// [`Error::NoServersFound`] when no tier yields a record; discovery
    /// itself never retries.
    pub async fn discover(
        &self,
        domain: &DomainConfig,
        security: ConnectionSecurity,
    ) -> Result<Vec<ServerCandidate>> {
        if let Some(servers) = domain.servers.as_deref().filter(|s| !s.trim().is_empty()) {
            return parse_server_list(servers, security.default_port());
        }

        let mut last_failure: Option<Error> = None;
        for name in srv_query_names(&domain.name, domain.site.as_deref()) {
            match self.resolver.lookup_srv(&name).await {
                Ok(records) if !records.is_empty() => {
                    debug!(query = %name, count = records.len(), "SRV records found");
                    return Ok(rank_candidates(records, security));
                }
                Ok(_) => {}
                Err(err) => last_failure = Some(err),
            }
        }

        Err(Error::NoServersFound {
            domain: domain.name.clone(),
            detail: last_failure.map(|err| err.to_string()),
        })
    }
}

/// The SRV names to query, in precedence order: prefer the forest-wide global
/// catalog over the single-domain service, and the configured site over the
/// whole domain.
fn srv_query_names(domain: &str, site: Option<&str>) -> Vec<String> {
    let mut names = Vec::with_capacity(4);
    for service in ["_gc._tcp.", "_ldap._tcp."] {
        if let Some(site) = site {
            names.push(format!("{service}{site}._sites.{domain}"));
        }
        names.push(format!("{service}{domain}"));
    }
    names
}

/// Orders discovered records by strictly descending priority. Equal
/// priorities keep resolver order; the weight field is deliberately ignored.
fn rank_candidates(
    mut records: Vec<SrvRecord>,
    security: ConnectionSecurity,
) -> Vec<ServerCandidate> {
    records.sort_by(|a, b| b.priority.cmp(&a.priority));
    records
        .into_iter()
        .map(|record| {
            ServerCandidate::new(
                record.target.trim_end_matches('.'),
                security.remap_port(record.port),
            )
        })
        .collect()
}

fn parse_server_list(servers: &str, default_port: u16) -> Result<Vec<ServerCandidate>> {
    servers
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| parse_server_token(token, default_port))
        .collect()
}

fn parse_server_token(token: &str, default_port: u16) -> Result<ServerCandidate> {
    let malformed = || Error::ConfigError(format!("malformed server entry `{token}`"));

    match token.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(malformed());
            }
            let port = port.parse::<u16>().map_err(|_| malformed())?;
            Ok(ServerCandidate::new(host, port))
        }
        None => Ok(ServerCandidate::new(token, default_port)),
    }
}
