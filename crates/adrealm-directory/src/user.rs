//! User account records materialized from directory entries.

use serde::Serialize;
use uuid::Uuid;

use adrealm_core::sid::SecurityIdentifier;

use crate::session::DirectoryEntry;

/// Attributes requested when searching for a user account.
pub const USER_ATTRIBUTES: &[&str] = &[
    "distinguishedName",
    "sAMAccountName",
    "userPrincipalName",
    "displayName",
    "mail",
    "givenName",
    "sn",
    "objectGUID",
    "objectSid",
    "memberOf",
];

/// A resolved user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    /// Logon name (`sAMAccountName`).
    pub username: String,
    /// User principal name (`user@domain`), when set on the account.
    pub principal: Option<String>,
    /// Distinguished name of the account entry.
    pub dn: String,
    /// Domain the account was found in.
    pub domain: String,
    /// Display name, when set.
    pub display_name: Option<String>,
    /// Mail address, when set.
    pub mail: Option<String>,
    /// Given name, when set.
    pub given_name: Option<String>,
    /// Surname, when set.
    pub surname: Option<String>,
    /// The account's `objectGUID`.
    pub object_guid: Option<Uuid>,
    /// The account's security identifier.
    pub sid: Option<SecurityIdentifier>,
    /// Effective group names, per the configured resolution strategy.
    pub groups: Vec<String>,
}

impl UserRecord {
    /// Builds a record from a directory search entry.
    ///
    /// The `groups` field starts empty; group resolution runs as a separate
    /// step and fills it in afterwards.
    #[must_use]
    pub fn from_entry(entry: &DirectoryEntry, domain: &str) -> Self {
        let object_guid = entry
            .first_bin("objectGUID")
            .filter(|raw| raw.len() == 16)
            .map(|raw| {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(raw);
                // AD stores GUIDs in mixed-endian layout.
                Uuid::from_bytes_le(bytes)
            });
        let sid = entry
            .first_bin("objectSid")
            .and_then(|raw| SecurityIdentifier::from_bytes(raw).ok());

        Self {
            username: entry.first("sAMAccountName").unwrap_or_default().to_string(),
            principal: entry.first("userPrincipalName").map(ToString::to_string),
            dn: entry.dn.clone(),
            domain: domain.to_string(),
            display_name: entry.first("displayName").map(ToString::to_string),
            mail: entry.first("mail").map(ToString::to_string),
            given_name: entry.first("givenName").map(ToString::to_string),
            surname: entry.first("sn").map(ToString::to_string),
            object_guid,
            sid,
            groups: Vec::new(),
        }
    }

    /// Replaces the resolved group list.
    #[must_use]
    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    /// Whether the account belongs to `group`, case-insensitively.
    #[must_use]
    pub fn is_member_of(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g.eq_ignore_ascii_case(group))
    }
}
