//! Group records materialized from directory entries.

use serde::Serialize;

use adrealm_core::sid::SecurityIdentifier;

use crate::session::DirectoryEntry;

/// Attributes requested when searching for a group.
pub const GROUP_ATTRIBUTES: &[&str] = &[
    "distinguishedName",
    "cn",
    "sAMAccountName",
    "description",
    "objectSid",
    "member",
];

/// A resolved security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRecord {
    /// Common name of the group.
    pub name: String,
    /// Distinguished name of the group entry.
    pub dn: String,
    /// Domain the group was found in.
    pub domain: String,
    /// The group's security identifier.
    pub sid: Option<SecurityIdentifier>,
    /// Description, when set.
    pub description: Option<String>,
    /// Distinguished names of direct members.
    pub members: Vec<String>,
}

impl GroupRecord {
    /// Builds a record from a directory search entry.
    #[must_use]
    pub fn from_entry(entry: &DirectoryEntry, domain: &str) -> Self {
        let name = entry
            .first("cn")
            .or_else(|| entry.first("sAMAccountName"))
            .unwrap_or_default()
            .to_string();
        let sid = entry
            .first_bin("objectSid")
            .and_then(|raw| SecurityIdentifier::from_bytes(raw).ok());

        Self {
            name,
            dn: entry.dn.clone(),
            domain: domain.to_string(),
            sid,
            description: entry.first("description").map(ToString::to_string),
            members: entry.values("member").to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn maps_group_attributes() {
        let mut attrs = HashMap::new();
        attrs.insert("cn".to_string(), vec!["Domain Admins".to_string()]);
        attrs.insert(
            "description".to_string(),
            vec!["Designated administrators".to_string()],
        );
        attrs.insert(
            "member".to_string(),
            vec![
                "CN=Fred Bloggs,CN=Users,DC=corp,DC=example,DC=com".to_string(),
                "CN=Joe Bloggs,CN=Users,DC=corp,DC=example,DC=com".to_string(),
            ],
        );
        let entry = DirectoryEntry {
            dn: "CN=Domain Admins,CN=Users,DC=corp,DC=example,DC=com".to_string(),
            attrs,
            bin_attrs: HashMap::new(),
        };

        let record = GroupRecord::from_entry(&entry, "corp.example.com");
        assert_eq!(record.name, "Domain Admins");
        assert_eq!(record.members.len(), 2);
        assert!(record.sid.is_none());
        assert_eq!(
            record.description.as_deref(),
            Some("Designated administrators")
        );
    }

    #[test]
    fn falls_back_to_sam_account_name() {
        let mut attrs = HashMap::new();
        attrs.insert("sAMAccountName".to_string(), vec!["ops-team".to_string()]);
        let entry = DirectoryEntry {
            dn: "CN=ops-team,OU=Groups,DC=corp,DC=example,DC=com".to_string(),
            attrs,
            bin_attrs: HashMap::new(),
        };
        let record = GroupRecord::from_entry(&entry, "corp.example.com");
        assert_eq!(record.name, "ops-team");
    }
}
