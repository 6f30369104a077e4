//! Directory-connection abstraction and the `ldap3`-backed implementation.
//!
//! The failover and lookup layers are written against [`DirectoryConnector`]
//! and [`DirectorySession`]; the LDAP wire protocol itself is delegated to
//! `ldap3`. Both traits are mocked in tests.

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use native_tls::TlsConnector;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use adrealm_core::error::{Error, Result};

use crate::discovery::ServerCandidate;
use crate::tls::CertificateTrust;

/// LDAP result code for invalid credentials.
const RC_INVALID_CREDENTIALS: u32 = 49;

/// Transport used for a single connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// TLS from the first byte (`ldaps://`).
    Ldaps,
    /// Plaintext dial followed by an in-band StartTLS upgrade.
    StartTls,
    /// Plaintext only.
    Plain,
}

/// Search scope for directory queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// The base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// The entire subtree.
    Subtree,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// Outcome of a bind attempt, distinguishing a credential rejection from a
/// transport failure. Transport failures surface as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindStatus {
    /// The server accepted the bind.
    Bound,
    /// The server rejected the credentials (LDAP result code 49).
    InvalidCredentials(String),
}

/// A directory entry returned from a search.
#[derive(Debug, Clone, Default)]
pub struct DirectoryEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// String-valued attributes.
    pub attrs: HashMap<String, Vec<String>>,
    /// Binary-valued attributes (`objectSid`, `objectGUID`, `tokenGroups`).
    pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl DirectoryEntry {
    /// Returns the first string value of the attribute, if present.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.attrs
            .get(attribute)
            .and_then(|values| values.first().map(String::as_str))
    }

    /// Returns all string values of the attribute.
    #[must_use]
    pub fn values(&self, attribute: &str) -> &[String] {
        self.attrs
            .get(attribute)
            .map_or(&[], |values| values.as_slice())
    }

    /// Returns the first binary value of the attribute, if present.
    #[must_use]
    pub fn first_bin(&self, attribute: &str) -> Option<&[u8]> {
        self.bin_attrs
            .get(attribute)
            .and_then(|values| values.first().map(Vec::as_slice))
    }

    /// Returns all binary values of the attribute.
    #[must_use]
    pub fn bin_values(&self, attribute: &str) -> &[Vec<u8>] {
        self.bin_attrs
            .get(attribute)
            .map_or(&[], |values| values.as_slice())
    }
}

/// A live directory session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectorySession: Send {
    /// Performs a simple bind. Empty DN and password bind anonymously.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<BindStatus>;

    /// Runs a search and collects the result entries.
    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<DirectoryEntry>>;

    /// Terminates the session.
    async fn unbind(&mut self) -> Result<()>;
}

/// Opens directory sessions against candidate servers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Opens a session over the given transport.
    async fn open(
        &self,
        candidate: &ServerCandidate,
        transport: Transport,
    ) -> Result<Box<dyn DirectorySession>>;
}

/// Real connector backed by `ldap3`.
pub struct LdapDirectoryConnector {
    trust: CertificateTrust,
    connect_timeout: Duration,
    operation_timeout: Duration,
}

/// Property key overriding the connection establishment timeout, in seconds.
pub const PROP_CONNECT_TIMEOUT_SECS: &str = "connect_timeout_secs";
/// Property key overriding the per-operation timeout, in seconds.
pub const PROP_OPERATION_TIMEOUT_SECS: &str = "operation_timeout_secs";

impl LdapDirectoryConnector {
    /// Creates a connector with the given trust mode and timeouts.
    ///
    /// Recognized extra properties override the corresponding setting:
    /// [`PROP_CONNECT_TIMEOUT_SECS`] and [`PROP_OPERATION_TIMEOUT_SECS`]
    /// take whole seconds. Unrecognized keys are logged and ignored; an
    /// unparsable value keeps the configured default.
    #[must_use]
    pub fn new(
        trust: CertificateTrust,
        connect_timeout: Duration,
        operation_timeout: Duration,
        extra_properties: &BTreeMap<String, String>,
    ) -> Self {
        let mut connector = Self {
            trust,
            connect_timeout,
            operation_timeout,
        };
        for (key, value) in extra_properties {
            match key.as_str() {
                PROP_CONNECT_TIMEOUT_SECS => {
                    connector.connect_timeout =
                        parse_secs_property(key, value, connector.connect_timeout);
                }
                PROP_OPERATION_TIMEOUT_SECS => {
                    connector.operation_timeout =
                        parse_secs_property(key, value, connector.operation_timeout);
                }
                _ => debug!(property = %key, "ignoring unrecognized connection property"),
            }
        }
        connector
    }

    fn settings(&self, transport: Transport) -> Result<LdapConnSettings> {
        let mut settings = LdapConnSettings::new().set_conn_timeout(self.connect_timeout);

        if transport == Transport::StartTls {
            settings = settings.set_starttls(true);
        }

        if matches!(transport, Transport::Ldaps | Transport::StartTls)
            && self.trust == CertificateTrust::TrustAll
        {
            let connector = TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .map_err(|err| {
                    Error::ConfigError(format!("failed to construct TLS connector: {err}"))
                })?;
            settings = settings.set_connector(connector).set_no_tls_verify(true);
        }

        Ok(settings)
    }
}

fn parse_secs_property(key: &str, value: &str, fallback: Duration) -> Duration {
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => {
            debug!(property = %key, seconds = secs, "applying connection property");
            Duration::from_secs(secs)
        }
        _ => {
            warn!(property = %key, value = %value, "invalid connection property value, keeping default");
            fallback
        }
    }
}

fn endpoint_url(candidate: &ServerCandidate, transport: Transport) -> Result<Url> {
    let scheme = match transport {
        Transport::Ldaps => "ldaps",
        Transport::StartTls | Transport::Plain => "ldap",
    };
    Url::parse(&format!("{scheme}://{candidate}"))
        .map_err(|err| Error::ConfigError(format!("invalid server address {candidate}: {err}")))
}

#[async_trait]
impl DirectoryConnector for LdapDirectoryConnector {
    async fn open(
        &self,
        candidate: &ServerCandidate,
        transport: Transport,
    ) -> Result<Box<dyn DirectorySession>> {
        let url = endpoint_url(candidate, transport)?;
        debug!(%url, "connecting to directory server");

        let settings = self.settings(transport)?;
        let server = candidate.to_string();
        let (conn, ldap) = timeout(
            self.connect_timeout,
            LdapConnAsync::from_url_with_settings(settings, &url),
        )
        .await
        .map_err(|_| Error::Timeout(format!("connecting to {server} timed out")))?
        .map_err(|err| map_connect_error(&server, transport, &err))?;
        ldap3::drive!(conn);

        Ok(Box::new(LdapDirectorySession {
            inner: ldap,
            server,
            operation_timeout: self.operation_timeout,
        }))
    }
}

/// TLS-transport connect failures are classified as negotiation failures so
/// the opportunistic-upgrade path can tell them apart from plain dial errors.
fn map_connect_error(server: &str, transport: Transport, err: &ldap3::LdapError) -> Error {
    match transport {
        Transport::Ldaps | Transport::StartTls => Error::TlsNegotiationFailed {
            server: server.to_string(),
            message: err.to_string(),
        },
        Transport::Plain => Error::DirectoryError {
            server: server.to_string(),
            message: err.to_string(),
        },
    }
}

struct LdapDirectorySession {
    inner: ldap3::Ldap,
    server: String,
    operation_timeout: Duration,
}

impl LdapDirectorySession {
    fn directory_error(&self, err: &ldap3::LdapError) -> Error {
        Error::DirectoryError {
            server: self.server.clone(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl DirectorySession for LdapDirectorySession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<BindStatus> {
        let result = timeout(self.operation_timeout, self.inner.simple_bind(dn, password))
            .await
            .map_err(|_| Error::Timeout(format!("bind to {} timed out", self.server)))?
            .map_err(|err| self.directory_error(&err))?;

        if result.rc == 0 {
            return Ok(BindStatus::Bound);
        }
        if result.rc == RC_INVALID_CREDENTIALS {
            return Ok(BindStatus::InvalidCredentials(result.text));
        }
        Err(Error::DirectoryError {
            server: self.server.clone(),
            message: format!("bind failed with result code {}: {}", result.rc, result.text),
        })
    }

    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<DirectoryEntry>> {
        let result = timeout(
            self.operation_timeout,
            self.inner
                .search(base, scope.into(), filter, attributes.to_vec()),
        )
        .await
        .map_err(|_| Error::Timeout(format!("search against {} timed out", self.server)))?
        .map_err(|err| self.directory_error(&err))?;

        let (entries, _) = result.success().map_err(|err| self.directory_error(&err))?;
        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| DirectoryEntry {
                dn: entry.dn,
                attrs: entry.attrs,
                bin_attrs: entry.bin_attrs,
            })
            .collect())
    }

    async fn unbind(&mut self) -> Result<()> {
        timeout(self.operation_timeout, self.inner.unbind())
            .await
            .map_err(|_| Error::Timeout(format!("unbind from {} timed out", self.server)))?
            .map_err(|err| self.directory_error(&err))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_accessors() {
        let mut attrs = HashMap::new();
        attrs.insert(
            "memberOf".to_string(),
            vec!["CN=Admins,DC=example,DC=com".to_string()],
        );
        let mut bin_attrs = HashMap::new();
        bin_attrs.insert("objectGUID".to_string(), vec![vec![1, 2, 3]]);

        let entry = DirectoryEntry {
            dn: "CN=Fred,DC=example,DC=com".to_string(),
            attrs,
            bin_attrs,
        };

        assert_eq!(entry.first("memberOf"), Some("CN=Admins,DC=example,DC=com"));
        assert_eq!(entry.values("memberOf").len(), 1);
        assert_eq!(entry.first("mail"), None);
        assert!(entry.values("mail").is_empty());
        assert_eq!(entry.first_bin("objectGUID"), Some(&[1u8, 2, 3][..]));
        assert!(entry.bin_values("objectSid").is_empty());
    }

    #[test]
    fn recognized_properties_override_timeouts() {
        let mut properties = BTreeMap::new();
        properties.insert(PROP_CONNECT_TIMEOUT_SECS.to_string(), "3".to_string());
        properties.insert(PROP_OPERATION_TIMEOUT_SECS.to_string(), "45".to_string());
        properties.insert("ad.some.future.knob".to_string(), "on".to_string());

        let connector = LdapDirectoryConnector::new(
            CertificateTrust::SystemRoots,
            Duration::from_secs(10),
            Duration::from_secs(30),
            &properties,
        );
        assert_eq!(connector.connect_timeout, Duration::from_secs(3));
        assert_eq!(connector.operation_timeout, Duration::from_secs(45));
    }

    #[test]
    fn invalid_property_values_keep_defaults() {
        let mut properties = BTreeMap::new();
        properties.insert(PROP_CONNECT_TIMEOUT_SECS.to_string(), "soon".to_string());
        properties.insert(PROP_OPERATION_TIMEOUT_SECS.to_string(), "0".to_string());

        let connector = LdapDirectoryConnector::new(
            CertificateTrust::SystemRoots,
            Duration::from_secs(10),
            Duration::from_secs(30),
            &properties,
        );
        assert_eq!(connector.connect_timeout, Duration::from_secs(10));
        assert_eq!(connector.operation_timeout, Duration::from_secs(30));
    }

    #[test]
    fn endpoint_url_scheme_follows_transport() {
        let candidate = ServerCandidate::new("dc1.example.com", 636);
        assert_eq!(
            endpoint_url(&candidate, Transport::Ldaps).unwrap().as_str(),
            "ldaps://dc1.example.com:636"
        );
        let candidate = ServerCandidate::new("dc1.example.com", 389);
        assert_eq!(
            endpoint_url(&candidate, Transport::StartTls)
                .unwrap()
                .as_str(),
            "ldap://dc1.example.com:389"
        );
        assert_eq!(
            endpoint_url(&candidate, Transport::Plain).unwrap().as_str(),
            "ldap://dc1.example.com:389"
        );
    }
}
