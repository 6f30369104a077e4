//! Active Directory client for the adrealm authentication core.
//!
//! This crate locates domain controllers through DNS SRV discovery, secures
//! connections per the configured TLS policy, binds with failover across the
//! candidate servers, and resolves users, groups, and effective memberships
//! across one or more domains with a bounded lookup cache.

#![deny(missing_docs)]

mod binder;
mod cache;
mod discovery;
mod dn;
mod dns;
mod group;
mod groups;
mod realm;
mod session;
mod tls;
mod user;

pub use binder::{BoundSession, FailoverBinder};
pub use cache::{LookupCache, LookupKey};
pub use discovery::{ServerCandidate, ServerDiscovery};
pub use dn::{escape_filter_bytes, escape_filter_value, DistinguishedName, DnError};
pub use dns::{SrvRecord, SrvResolver, SystemSrvResolver};
pub use group::{GroupRecord, GROUP_ATTRIBUTES};
pub use groups::{GroupResolver, TokenGroupsOutcome};
pub use realm::{DirectoryRealm, DomainDiagnostics, ProbeOutcome, ServerProbe};
pub use session::{
    BindStatus, DirectoryConnector, DirectoryEntry, DirectorySession, LdapDirectoryConnector,
    SearchScope, Transport, PROP_CONNECT_TIMEOUT_SECS, PROP_OPERATION_TIMEOUT_SECS,
};
pub use tls::{CertificateTrust, ConnectionSecurity, TlsNegotiator};
pub use user::{UserRecord, USER_ATTRIBUTES};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = adrealm_core::Result<T>;
