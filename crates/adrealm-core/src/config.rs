//! Configuration surface for a directory authentication realm.
//!
//! Configuration is consumed here, not produced: persistence and UI layers
//! own their own formats and hand a validated [`RealmConfig`] to the realm.
//! All values are immutable after construction.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::Validate;

use crate::error::{Error, Result};

/// Default connection timeout (seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default per-operation timeout (seconds).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

/// Strategy used to resolve a user's effective group memberships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupLookupStrategy {
    /// Read the precomputed `tokenGroups` attribute; one round trip, requires
    /// server support.
    TokenGroups,
    /// Walk `memberOf` edges breadth-first with cycle suppression.
    Recursive,
    /// Try `TokenGroups`, downgrading a domain to `Recursive` for the process
    /// lifetime if the attribute is unsupported.
    #[default]
    Auto,
}

impl GroupLookupStrategy {
    /// Returns the stable identifier used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TokenGroups => "token_groups",
            Self::Recursive => "recursive",
            Self::Auto => "auto",
        }
    }
}

/// Transport security flags for directory connections.
///
/// `require_tls` wins over `start_tls`: opportunistic upgrade only applies
/// when TLS is not already mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSettings {
    /// Require the connection to be TLS from the start (`ldaps://`).
    #[serde(default = "default_true")]
    pub require_tls: bool,
    /// Attempt an in-band StartTLS upgrade on plaintext connections.
    #[serde(default = "default_true")]
    pub start_tls: bool,
    /// Accept any server certificate instead of validating against the
    /// platform trust store.
    #[serde(default)]
    pub trust_all_certificates: bool,
}

impl Default for TlsSettings {
    fn default() -> Self {
        // Secure by default, matching the realm-wide default posture.
        Self {
            require_tls: true,
            start_tls: true,
            trust_all_certificates: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// Size and TTL bounds for the lookup cache.
///
/// A size of 0 or a TTL of 0 disables caching entirely; every lookup then
/// performs a fresh directory round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate, Default)]
pub struct CacheSettings {
    /// Maximum number of cached entries.
    #[validate(range(max = 100_000))]
    #[serde(default)]
    pub size: u64,
    /// Entry lifetime in seconds.
    #[serde(default)]
    pub ttl_secs: u64,
}

impl CacheSettings {
    /// Creates settings with the given bounds.
    #[must_use]
    pub const fn new(size: u64, ttl_secs: u64) -> Self {
        Self { size, ttl_secs }
    }

    /// Returns true when either bound disables the cache.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.size == 0 || self.ttl_secs == 0
    }

    /// Entry lifetime as a [`Duration`].
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// A single Active Directory domain the realm authenticates against.
///
/// Identity key is the domain name, compared case-insensitively.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DomainConfig {
    /// Fully qualified DNS name of the domain.
    #[validate(length(min = 1))]
    pub name: String,
    /// Optional Active Directory site restricting discovery to topologically
    /// close controllers.
    #[serde(default)]
    pub site: Option<String>,
    /// Optional explicit server list (`host[:port][,host[:port]]*`). When
    /// set, discovery is bypassed entirely.
    #[serde(default)]
    pub servers: Option<String>,
    /// Distinguished name (or principal) to bind with for lookups. Absent
    /// means anonymous bind.
    #[serde(default)]
    pub bind_dn: Option<String>,
    /// Bind secret. Absent or empty means anonymous bind.
    #[serde(default)]
    pub bind_password: Option<SecretString>,
    /// Per-domain TLS override; falls back to the realm-wide settings.
    #[serde(default)]
    pub tls: Option<TlsSettings>,
}

impl DomainConfig {
    /// Creates a domain entry with discovery enabled and anonymous bind.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            site: None,
            servers: None,
            bind_dn: None,
            bind_password: None,
            tls: None,
        }
    }

    /// Sets the Active Directory site.
    #[must_use]
    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    /// Sets the explicit server list, bypassing discovery.
    #[must_use]
    pub fn with_servers(mut self, servers: impl Into<String>) -> Self {
        self.servers = Some(servers.into());
        self
    }

    /// Sets the bind credentials used for lookups.
    #[must_use]
    pub fn with_bind(mut self, dn: impl Into<String>, password: SecretString) -> Self {
        self.bind_dn = Some(dn.into());
        self.bind_password = Some(password);
        self
    }

    /// Overrides the realm-wide TLS settings for this domain.
    #[must_use]
    pub const fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Case-insensitive identity comparison on the domain name.
    #[must_use]
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Derives the search base DN from the DNS name
    /// (`corp.example.com` becomes `DC=corp,DC=example,DC=com`).
    #[must_use]
    pub fn base_dn(&self) -> String {
        self.name
            .split('.')
            .filter(|label| !label.is_empty())
            .map(|label| format!("DC={label}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Configuration for a realm spanning one or more domains.
///
/// Domain order is precedence order: the first listed domain is evaluated
/// first on every request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RealmConfig {
    /// Domains in precedence order. Emptiness is checked by
    /// [`Self::ensure_valid`] so the error carries its own classification.
    #[validate(nested)]
    pub domains: Vec<DomainConfig>,
    /// Lookup cache bounds. Defaults to disabled.
    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheSettings,
    /// Realm-wide TLS settings; individual domains may override.
    #[serde(default)]
    pub tls: TlsSettings,
    /// Group resolution strategy.
    #[serde(default)]
    pub group_lookup: GroupLookupStrategy,
    /// Connection establishment timeout in seconds.
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Per directory-operation timeout in seconds.
    #[validate(range(min = 1, max = 600))]
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    /// Extra connection properties passed through to the directory client.
    /// Unknown keys are ignored.
    #[serde(default)]
    pub extra_properties: BTreeMap<String, String>,
}

const fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

const fn default_operation_timeout_secs() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

impl RealmConfig {
    /// Creates a realm configuration over the given domains with defaults for
    /// everything else.
    #[must_use]
    pub fn new(domains: Vec<DomainConfig>) -> Self {
        Self {
            domains,
            cache: CacheSettings::default(),
            tls: TlsSettings::default(),
            group_lookup: GroupLookupStrategy::default(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            extra_properties: BTreeMap::new(),
        }
    }

    /// Builds a realm configuration from a comma-separated domain name list,
    /// one entry per name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDomainsConfigured`] when the list contains no
    /// non-empty names.
    pub fn from_domain_list(list: &str) -> Result<Self> {
        let domains: Vec<DomainConfig> = list
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(DomainConfig::new)
            .collect();
        if domains.is_empty() {
            return Err(Error::NoDomainsConfigured);
        }
        Ok(Self::new(domains))
    }

    /// Overrides the cache settings.
    #[must_use]
    pub const fn with_cache(mut self, cache: CacheSettings) -> Self {
        self.cache = cache;
        self
    }

    /// Overrides the realm-wide TLS settings.
    #[must_use]
    pub const fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = tls;
        self
    }

    /// Overrides the group lookup strategy.
    #[must_use]
    pub const fn with_group_lookup(mut self, strategy: GroupLookupStrategy) -> Self {
        self.group_lookup = strategy;
        self
    }

    /// Overrides the connect timeout in seconds.
    #[must_use]
    pub const fn with_connect_timeout_secs(mut self, seconds: u64) -> Self {
        self.connect_timeout_secs = seconds;
        self
    }

    /// Overrides the per-operation timeout in seconds.
    #[must_use]
    pub const fn with_operation_timeout_secs(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = seconds;
        self
    }

    /// Adds an extra pass-through connection property.
    #[must_use]
    pub fn with_extra_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.extra_properties.insert(name.into(), value.into());
        self
    }

    /// Effective TLS settings for a domain (per-domain override or realm-wide).
    #[must_use]
    pub fn tls_for(&self, domain: &DomainConfig) -> TlsSettings {
        domain.tls.unwrap_or(self.tls)
    }

    /// Looks up a domain entry by name, case-insensitively.
    #[must_use]
    pub fn domain(&self, name: &str) -> Option<&DomainConfig> {
        self.domains.iter().find(|d| d.matches_name(name))
    }

    /// Connection establishment timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Per directory-operation timeout.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Validates the configuration, mapping an empty domain list to
    /// [`Error::NoDomainsConfigured`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDomainsConfigured`] or [`Error::ConfigError`].
    pub fn ensure_valid(&self) -> Result<()> {
        if self.domains.is_empty() {
            return Err(Error::NoDomainsConfigured);
        }
        Validate::validate(self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_dn_derivation() {
        let domain = DomainConfig::new("corp.example.com");
        assert_eq!(domain.base_dn(), "DC=corp,DC=example,DC=com");
        assert!(domain.matches_name("CORP.Example.COM"));
    }

    #[test]
    fn cache_settings_disabled_when_either_bound_is_zero() {
        assert!(CacheSettings::new(0, 600).is_disabled());
        assert!(CacheSettings::new(256, 0).is_disabled());
        assert!(!CacheSettings::new(256, 600).is_disabled());
        assert!(CacheSettings::default().is_disabled());
    }

    #[test]
    fn domain_list_parsing() {
        let config = RealmConfig::from_domain_list("a.example.com, b.example.com").unwrap();
        assert_eq!(config.domains.len(), 2);
        assert_eq!(config.domains[0].name, "a.example.com");
        assert_eq!(config.domains[1].name, "b.example.com");

        assert!(matches!(
            RealmConfig::from_domain_list(" , "),
            Err(Error::NoDomainsConfigured)
        ));
    }

    #[test]
    fn empty_realm_fails_validation() {
        let config = RealmConfig::new(Vec::new());
        assert!(matches!(
            config.ensure_valid(),
            Err(Error::NoDomainsConfigured)
        ));
    }

    #[test]
    fn nested_domain_validation_flags_empty_name() {
        let config = RealmConfig::new(vec![DomainConfig::new("")]);
        assert!(matches!(config.ensure_valid(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn per_domain_tls_override_wins() {
        let plain = TlsSettings {
            require_tls: false,
            start_tls: false,
            trust_all_certificates: false,
        };
        let overridden = DomainConfig::new("legacy.example.com").with_tls(plain);
        let discovered = DomainConfig::new("corp.example.com");
        let config = RealmConfig::new(vec![overridden.clone(), discovered.clone()]);

        assert!(!config.tls_for(&overridden).require_tls);
        assert!(config.tls_for(&discovered).require_tls);
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: RealmConfig = serde_json::from_str(
            r#"{
                "domains": [
                    {"name": "corp.example.com", "site": "HQ"},
                    {"name": "eu.example.com", "bind_dn": "svc-lookup@eu.example.com", "bind_password": "hunter2"}
                ],
                "cache": {"size": 256, "ttl_secs": 600}
            }"#,
        )
        .unwrap();

        config.ensure_valid().unwrap();
        assert_eq!(config.domains.len(), 2);
        assert_eq!(config.domains[0].site.as_deref(), Some("HQ"));
        assert!(config.tls.require_tls);
        assert_eq!(config.group_lookup, GroupLookupStrategy::Auto);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert!(!config.cache.is_disabled());
    }
}
