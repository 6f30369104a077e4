//! Multi-domain authentication realm.
//!
//! Ties discovery, failover bind, group resolution, and the lookup cache
//! together. Domains are evaluated serially in configuration order; the
//! first success wins. Failures are aggregated with a fixed precedence:
//! a credential rejection anywhere outranks not-found, which outranks
//! unreachable.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, info, warn};

use adrealm_core::config::{DomainConfig, GroupLookupStrategy, RealmConfig};
use adrealm_core::error::{Error, Result};

use crate::binder::{BoundSession, FailoverBinder};
use crate::cache::{LookupCache, LookupKey};
use crate::discovery::{ServerCandidate, ServerDiscovery};
use crate::dn::escape_filter_value;
use crate::dns::{SrvResolver, SystemSrvResolver};
use crate::group::{GroupRecord, GROUP_ATTRIBUTES};
use crate::groups::{GroupResolver, TokenGroupsOutcome};
use crate::session::{
    BindStatus, DirectoryConnector, DirectorySession, LdapDirectoryConnector, SearchScope,
};
use crate::tls::{CertificateTrust, ConnectionSecurity, TlsNegotiator};
use crate::user::{UserRecord, USER_ATTRIBUTES};

/// Outcome of probing a single controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// The server accepted the bind.
    Success,
    /// The server was reached but rejected the credentials.
    Rejected {
        /// Server-reported rejection detail.
        reason: String,
    },
    /// The server could not be reached or the bind failed in transport.
    Unreachable {
        /// The failure observed.
        cause: String,
    },
}

/// One controller's probe result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerProbe {
    /// The probed server (`host:port`).
    pub server: String,
    /// What happened.
    pub outcome: ProbeOutcome,
}

/// Result of probing one domain, for operator-facing diagnostics.
///
/// Unlike real authentication, every discovered controller is probed, even
/// after a success or a rejection, so an operator sees the state of the
/// whole candidate list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainDiagnostics {
    /// The probed domain.
    pub domain: String,
    /// One entry per discovered controller, in attempt order.
    pub probes: Vec<ServerProbe>,
    /// Set when discovery itself failed and no controller could be probed.
    pub discovery_error: Option<String>,
}

/// An authentication realm spanning one or more Active Directory domains.
pub struct DirectoryRealm {
    config: RealmConfig,
    connector: Arc<dyn DirectoryConnector>,
    discovery: ServerDiscovery,
    binder: FailoverBinder,
    groups: GroupResolver,
    user_cache: LookupCache<UserRecord>,
    group_cache: LookupCache<GroupRecord>,
    /// Domains downgraded from `Auto` to recursive resolution for the
    /// lifetime of this realm. Lowercased domain names.
    downgraded: RwLock<HashSet<String>>,
}

impl DirectoryRealm {
    /// Builds a realm over the system DNS resolver and a real LDAP connector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDomainsConfigured`] or [`Error::ConfigError`] when
    /// the configuration is invalid or system DNS configuration cannot be
    /// read.
    pub fn new(config: RealmConfig) -> Result<Self> {
        config.ensure_valid()?;
        let resolver: Arc<dyn SrvResolver> =
            Arc::new(SystemSrvResolver::from_system_conf(config.connect_timeout())?);
        let connector: Arc<dyn DirectoryConnector> = Arc::new(LdapDirectoryConnector::new(
            CertificateTrust::from_settings(config.tls),
            config.connect_timeout(),
            config.operation_timeout(),
            &config.extra_properties,
        ));
        Self::with_components(config, resolver, connector)
    }

    /// Builds a realm over explicit resolver and connector implementations.
    ///
    /// # Errors
    ///
    /// Returns the configuration validation error, if any.
    pub fn with_components(
        config: RealmConfig,
        resolver: Arc<dyn SrvResolver>,
        connector: Arc<dyn DirectoryConnector>,
    ) -> Result<Self> {
        config.ensure_valid()?;
        let user_cache = LookupCache::new(&config.cache);
        let group_cache = LookupCache::new(&config.cache);
        Ok(Self {
            config,
            connector,
            discovery: ServerDiscovery::new(resolver),
            binder: FailoverBinder::default(),
            groups: GroupResolver,
            user_cache,
            group_cache,
            downgraded: RwLock::new(HashSet::new()),
        })
    }

    /// Authenticates `username` with the given secret and returns the
    /// account record with its effective groups.
    ///
    /// The bind always runs live; credential checks are never served from
    /// the cache. A `user@domain` form restricts the attempt to that domain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthenticationRejected`] when any domain rejects the
    /// credentials, [`Error::UserNotFound`] when the bind succeeds nowhere
    /// and no domain knows the account, or [`Error::AllServersUnreachable`]
    /// when every domain was unreachable.
    pub async fn authenticate(&self, username: &str, secret: &SecretString) -> Result<UserRecord> {
        let (name, hint) = split_principal(username);
        let domains = self.select_domains(hint)?;

        let mut outcomes = FailureAggregate::default();
        for domain in domains {
            let upn = format!("{name}@{}", domain.name);
            match self
                .authenticate_in_domain(domain, name, &upn, secret)
                .await
            {
                Ok(record) => {
                    info!(user = %name, domain = %domain.name, "authentication succeeded");
                    return Ok(record);
                }
                Err(err) => {
                    debug!(user = %name, domain = %domain.name, error = %err, "domain attempt failed");
                    outcomes.record(err);
                }
            }
        }

        let err = outcomes.into_error();
        if err.should_log() {
            warn!(user = %name, error = %err, code = err.error_code(), "authentication failed");
        } else {
            debug!(user = %name, error = %err, "authentication failed");
        }
        Err(err)
    }

    /// Looks up an account without checking any credentials, binding with
    /// the per-domain service credentials (or anonymously).
    ///
    /// Results are cached per the realm's cache settings. A `user@domain`
    /// form restricts the search to that domain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UserNotFound`] when no domain knows the account, or
    /// the aggregated connectivity error.
    pub async fn lookup_user(&self, username: &str) -> Result<UserRecord> {
        let (name, hint) = split_principal(username);
        let key = LookupKey::new(
            hint.unwrap_or("*"),
            format!("user:{}", name.to_ascii_lowercase()),
            self.config.group_lookup,
        );
        self.user_cache
            .get_or_compute(key, self.lookup_user_live(name, hint))
            .await
    }

    /// Looks up a group by name. Results are cached like user lookups; a
    /// `group@domain` form restricts the search to that domain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GroupNotFound`] when no domain has the group, or the
    /// aggregated connectivity error.
    pub async fn lookup_group(&self, group_name: &str) -> Result<GroupRecord> {
        let (name, hint) = split_principal(group_name);
        let key = LookupKey::new(
            hint.unwrap_or("*"),
            format!("group:{}", name.to_ascii_lowercase()),
            self.config.group_lookup,
        );
        self.group_cache
            .get_or_compute(key, self.lookup_group_live(name, hint))
            .await
    }

    /// Probes every configured domain with the given credentials and reports
    /// one outcome per discovered controller. Never fails as a whole; each
    /// failure is captured in its entry.
    ///
    /// Every controller is contacted individually, without the rejection
    /// short-circuit real authentication uses, so the report covers the
    /// entire candidate list.
    pub async fn diagnose(&self, username: &str, secret: &SecretString) -> Vec<DomainDiagnostics> {
        let (name, _) = split_principal(username);
        let mut reports = Vec::with_capacity(self.config.domains.len());

        for domain in &self.config.domains {
            let security = ConnectionSecurity::from_settings(self.config.tls_for(domain));
            let candidates = match self.discovery.discover(domain, security).await {
                Ok(candidates) => candidates,
                Err(err) => {
                    reports.push(DomainDiagnostics {
                        domain: domain.name.clone(),
                        probes: Vec::new(),
                        discovery_error: Some(err.to_string()),
                    });
                    continue;
                }
            };

            let upn = format!("{name}@{}", domain.name);
            let mut probes = Vec::with_capacity(candidates.len());
            for candidate in &candidates {
                probes.push(ServerProbe {
                    server: candidate.to_string(),
                    outcome: self.probe_server(candidate, security, &upn, secret).await,
                });
            }
            reports.push(DomainDiagnostics {
                domain: domain.name.clone(),
                probes,
                discovery_error: None,
            });
        }
        reports
    }

    async fn probe_server(
        &self,
        candidate: &ServerCandidate,
        security: ConnectionSecurity,
        upn: &str,
        secret: &SecretString,
    ) -> ProbeOutcome {
        let mut session = match TlsNegotiator
            .establish(self.connector.as_ref(), candidate, security)
            .await
        {
            Ok(session) => session,
            Err(err) => {
                return ProbeOutcome::Unreachable {
                    cause: err.to_string(),
                }
            }
        };

        let password = secret.expose_secret();
        let bind = if password.is_empty() {
            session.simple_bind("", "").await
        } else {
            session.simple_bind(upn, password).await
        };
        let _ = session.unbind().await;

        match bind {
            Ok(BindStatus::Bound) => ProbeOutcome::Success,
            Ok(BindStatus::InvalidCredentials(reason)) => ProbeOutcome::Rejected { reason },
            Err(err) => ProbeOutcome::Unreachable {
                cause: err.to_string(),
            },
        }
    }

    /// Drops all cached lookup results.
    pub fn invalidate_caches(&self) {
        self.user_cache.invalidate_all();
        self.group_cache.invalidate_all();
    }

    fn select_domains(&self, hint: Option<&str>) -> Result<Vec<&DomainConfig>> {
        match hint {
            None => Ok(self.config.domains.iter().collect()),
            Some(hint) => self
                .config
                .domain(hint)
                .map(|domain| vec![domain])
                .ok_or_else(|| Error::AuthenticationRejected {
                    domain: Some(hint.to_string()),
                    reason: "domain is not configured".to_string(),
                }),
        }
    }

    async fn bind_as_user(
        &self,
        domain: &DomainConfig,
        upn: &str,
        secret: &SecretString,
    ) -> Result<BoundSession> {
        let security = ConnectionSecurity::from_settings(self.config.tls_for(domain));
        let candidates = self.discovery.discover(domain, security).await?;
        self.binder
            .bind(
                self.connector.as_ref(),
                &domain.name,
                &candidates,
                security,
                Some(upn),
                Some(secret),
            )
            .await
    }

    /// Binds with the domain's service credentials, or anonymously when none
    /// are configured.
    async fn bind_as_service(&self, domain: &DomainConfig) -> Result<BoundSession> {
        let security = ConnectionSecurity::from_settings(self.config.tls_for(domain));
        let candidates = self.discovery.discover(domain, security).await?;
        self.binder
            .bind(
                self.connector.as_ref(),
                &domain.name,
                &candidates,
                security,
                domain.bind_dn.as_deref(),
                domain.bind_password.as_ref(),
            )
            .await
    }

    async fn authenticate_in_domain(
        &self,
        domain: &DomainConfig,
        name: &str,
        upn: &str,
        secret: &SecretString,
    ) -> Result<UserRecord> {
        if secret.expose_secret().is_empty() {
            // An empty password would turn into an anonymous bind that
            // succeeds for any account name. Reject it outright.
            return Err(Error::AuthenticationRejected {
                domain: Some(domain.name.clone()),
                reason: "empty password".to_string(),
            });
        }

        let mut bound = self.bind_as_user(domain, upn, secret).await?;
        let result = self
            .fetch_user(bound.session.as_mut(), domain, name, upn)
            .await;
        let _ = bound.session.unbind().await;
        result
    }

    async fn fetch_user(
        &self,
        session: &mut dyn DirectorySession,
        domain: &DomainConfig,
        name: &str,
        upn: &str,
    ) -> Result<UserRecord> {
        let filter = format!(
            "(&(objectClass=user)(|(sAMAccountName={})(userPrincipalName={})))",
            escape_filter_value(name),
            escape_filter_value(upn),
        );
        let entries = session
            .search(
                &domain.base_dn(),
                SearchScope::Subtree,
                &filter,
                USER_ATTRIBUTES,
            )
            .await?;
        let Some(entry) = entries.first() else {
            return Err(Error::UserNotFound(name.to_string()));
        };

        let record = UserRecord::from_entry(entry, &domain.name);
        let member_of = entry.values("memberOf").to_vec();
        let groups = self
            .resolve_groups(session, domain, &record.dn, &member_of)
            .await?;
        Ok(record.with_groups(groups))
    }

    async fn resolve_groups(
        &self,
        session: &mut dyn DirectorySession,
        domain: &DomainConfig,
        user_dn: &str,
        member_of: &[String],
    ) -> Result<Vec<String>> {
        let strategy = self.effective_strategy(&domain.name);
        debug!(
            domain = %domain.name,
            strategy = strategy.as_str(),
            "resolving group membership"
        );
        match strategy {
            GroupLookupStrategy::Recursive => self.groups.recursive(session, member_of).await,
            GroupLookupStrategy::TokenGroups => {
                match self
                    .groups
                    .token_groups(session, &domain.base_dn(), user_dn)
                    .await?
                {
                    TokenGroupsOutcome::Resolved(names) => Ok(names),
                    TokenGroupsOutcome::Unsupported => {
                        warn!(
                            domain = %domain.name,
                            "tokenGroups unsupported but explicitly configured; returning no groups"
                        );
                        Ok(Vec::new())
                    }
                }
            }
            GroupLookupStrategy::Auto => {
                match self
                    .groups
                    .token_groups(session, &domain.base_dn(), user_dn)
                    .await?
                {
                    TokenGroupsOutcome::Resolved(names) => Ok(names),
                    TokenGroupsOutcome::Unsupported => {
                        self.downgrade(&domain.name);
                        self.groups.recursive(session, member_of).await
                    }
                }
            }
        }
    }

    /// The strategy in force for a domain: the configured one, except that an
    /// `Auto` domain already downgraded runs recursive directly.
    fn effective_strategy(&self, domain: &str) -> GroupLookupStrategy {
        let configured = self.config.group_lookup;
        if configured == GroupLookupStrategy::Auto && self.is_downgraded(domain) {
            GroupLookupStrategy::Recursive
        } else {
            configured
        }
    }

    fn is_downgraded(&self, domain: &str) -> bool {
        self.downgraded
            .read()
            .is_ok_and(|set| set.contains(&domain.to_ascii_lowercase()))
    }

    fn downgrade(&self, domain: &str) {
        if let Ok(mut set) = self.downgraded.write() {
            if set.insert(domain.to_ascii_lowercase()) {
                warn!(
                    domain = %domain,
                    "tokenGroups unsupported; using recursive group resolution from now on"
                );
            }
        }
    }

    async fn lookup_user_live(&self, name: &str, hint: Option<&str>) -> Result<UserRecord> {
        let not_found = Error::UserNotFound(name.to_string());
        let domains = self.select_lookup_domains(hint, not_found.clone())?;
        let mut outcomes = FailureAggregate::default();

        for domain in domains {
            match self.lookup_user_in_domain(domain, name).await {
                Ok(record) => return Ok(record),
                Err(err) => outcomes.record(err),
            }
        }
        Err(outcomes.into_lookup_error(not_found))
    }

    async fn lookup_user_in_domain(
        &self,
        domain: &DomainConfig,
        name: &str,
    ) -> Result<UserRecord> {
        let mut bound = self.bind_as_service(domain).await?;
        let upn = format!("{name}@{}", domain.name);
        let result = self
            .fetch_user(bound.session.as_mut(), domain, name, &upn)
            .await;
        let _ = bound.session.unbind().await;
        result
    }

    async fn lookup_group_live(&self, name: &str, hint: Option<&str>) -> Result<GroupRecord> {
        let not_found = Error::GroupNotFound(name.to_string());
        let domains = self.select_lookup_domains(hint, not_found.clone())?;
        let mut outcomes = FailureAggregate::default();

        for domain in domains {
            match self.lookup_group_in_domain(domain, name).await {
                Ok(record) => return Ok(record),
                Err(err) => outcomes.record(err),
            }
        }
        Err(outcomes.into_lookup_error(not_found))
    }

    async fn lookup_group_in_domain(
        &self,
        domain: &DomainConfig,
        name: &str,
    ) -> Result<GroupRecord> {
        let mut bound = self.bind_as_service(domain).await?;
        let filter = format!(
            "(&(objectClass=group)(|(cn={})(sAMAccountName={})))",
            escape_filter_value(name),
            escape_filter_value(name),
        );
        let result = bound
            .session
            .search(
                &domain.base_dn(),
                SearchScope::Subtree,
                &filter,
                GROUP_ATTRIBUTES,
            )
            .await;
        let _ = bound.session.unbind().await;

        let entries = result?;
        entries
            .first()
            .map(|entry| GroupRecord::from_entry(entry, &domain.name))
            .ok_or_else(|| Error::GroupNotFound(name.to_string()))
    }

    /// Domains to search for a lookup. Unlike authentication, an unknown
    /// domain hint maps to not-found rather than a rejection.
    fn select_lookup_domains(
        &self,
        hint: Option<&str>,
        not_found: Error,
    ) -> Result<Vec<&DomainConfig>> {
        match hint {
            None => Ok(self.config.domains.iter().collect()),
            Some(hint) => self
                .config
                .domain(hint)
                .map(|domain| vec![domain])
                .ok_or(not_found),
        }
    }
}

/// Splits `name@domain` into its parts. Splits on the last `@` so names
/// containing one survive intact.
fn split_principal(input: &str) -> (&str, Option<&str>) {
    match input.rsplit_once('@') {
        Some((name, domain)) if !name.is_empty() && !domain.is_empty() => (name, Some(domain)),
        _ => (input, None),
    }
}

/// Collects per-domain failures and reduces them to a single error with
/// fixed precedence: rejection, then not-found, then unreachable.
#[derive(Default)]
struct FailureAggregate {
    rejection: Option<Error>,
    not_found: Option<Error>,
    unreachable: Option<Error>,
}

impl FailureAggregate {
    fn record(&mut self, err: Error) {
        let slot = match err {
            Error::AuthenticationRejected { .. } => &mut self.rejection,
            Error::UserNotFound(_) | Error::GroupNotFound(_) => &mut self.not_found,
            _ => &mut self.unreachable,
        };
        *slot = Some(err);
    }

    fn into_error(self) -> Error {
        self.rejection
            .or(self.not_found)
            .or(self.unreachable)
            .unwrap_or(Error::NoDomainsConfigured)
    }

    /// Like [`Self::into_error`], but lookups never authenticate end users,
    /// so a service credential rejection still wins (it is a configuration
    /// problem worth surfacing over not-found).
    fn into_lookup_error(self, fallback: Error) -> Error {
        self.rejection
            .or(self.not_found)
            .or(self.unreachable)
            .unwrap_or(fallback)
    }
}
