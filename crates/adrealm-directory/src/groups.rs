//! Group membership resolution strategies.
//!
//! Two strategies are supported. Token-groups reads the server-computed
//! `tokenGroups` attribute (one round trip per SID batch, transitive closure
//! included). Recursive walks `memberOf` edges breadth-first, which works on
//! any server but costs one query per group and needs cycle suppression.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use adrealm_core::error::Result;

use crate::dn::{escape_filter_bytes, DistinguishedName};
use crate::session::{DirectorySession, SearchScope};

/// Number of SID equality terms packed into one OR filter. Keeps the filter
/// well under server-side length limits for large token sets.
const SID_FILTER_BATCH: usize = 50;

/// Outcome of a token-groups read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenGroupsOutcome {
    /// The attribute was present; these are the resolved group names.
    Resolved(Vec<String>),
    /// The server did not return `tokenGroups`; the caller should fall back
    /// to recursive traversal.
    Unsupported,
}

/// Resolves effective group memberships over a bound session.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupResolver;

impl GroupResolver {
    /// Reads the user's `tokenGroups` SIDs and translates them to group
    /// names with batched `objectSid` searches.
    ///
    /// # Errors
    ///
    /// Propagates directory errors from the underlying searches. A missing
    /// attribute is not an error; it reports [`TokenGroupsOutcome::Unsupported`].
    pub async fn token_groups(
        &self,
        session: &mut dyn DirectorySession,
        base_dn: &str,
        user_dn: &str,
    ) -> Result<TokenGroupsOutcome> {
        let entries = session
            .search(user_dn, SearchScope::Base, "(objectClass=*)", &["tokenGroups"])
            .await?;

        let sids: Vec<Vec<u8>> = entries
            .first()
            .map(|entry| entry.bin_values("tokenGroups").to_vec())
            .unwrap_or_default();
        if sids.is_empty() {
            debug!(user = %user_dn, "tokenGroups absent, server does not support it");
            return Ok(TokenGroupsOutcome::Unsupported);
        }

        let mut names = Vec::with_capacity(sids.len());
        for batch in sids.chunks(SID_FILTER_BATCH) {
            let mut filter = String::from("(|");
            for sid in batch {
                filter.push_str("(objectSid=");
                filter.push_str(&escape_filter_bytes(sid));
                filter.push(')');
            }
            filter.push(')');

            let groups = session
                .search(base_dn, SearchScope::Subtree, &filter, &["cn"])
                .await?;
            for group in &groups {
                if let Some(cn) = group.first("cn") {
                    names.push(cn.to_string());
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(TokenGroupsOutcome::Resolved(names))
    }

    /// Walks `memberOf` edges breadth-first from the user's direct groups,
    /// suppressing cycles by comparing DNs case-insensitively.
    ///
    /// # Errors
    ///
    /// Propagates directory errors from the per-group reads.
    pub async fn recursive(
        &self,
        session: &mut dyn DirectorySession,
        direct_member_of: &[String],
    ) -> Result<Vec<String>> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut names = Vec::new();

        for dn in direct_member_of {
            if visited.insert(dn.to_ascii_lowercase()) {
                queue.push_back(dn.clone());
            }
        }

        while let Some(group_dn) = queue.pop_front() {
            let entries = session
                .search(
                    &group_dn,
                    SearchScope::Base,
                    "(objectClass=*)",
                    &["cn", "memberOf"],
                )
                .await?;
            let Some(entry) = entries.first() else {
                // Tombstoned or foreign-domain reference; skip it.
                continue;
            };

            let name = entry
                .first("cn")
                .map(ToString::to_string)
                .or_else(|| dn_common_name(&group_dn));
            if let Some(name) = name {
                names.push(name);
            }

            for parent in entry.values("memberOf") {
                if visited.insert(parent.to_ascii_lowercase()) {
                    queue.push_back(parent.clone());
                }
            }
        }

        names.sort();
        names.dedup();
        Ok(names)
    }
}

fn dn_common_name(dn: &str) -> Option<String> {
    DistinguishedName::parse(dn)
        .ok()
        .and_then(|parsed| parsed.get("cn").map(ToString::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{DirectoryEntry, MockDirectorySession};
    use mockall::predicate::{always, eq};

    fn entry(dn: &str, attrs: &[(&str, &[&str])], bins: &[(&str, &[&[u8]])]) -> DirectoryEntry {
        DirectoryEntry {
            dn: dn.to_string(),
            attrs: attrs
                .iter()
                .map(|(k, vs)| ((*k).to_string(), vs.iter().map(|v| (*v).to_string()).collect()))
                .collect(),
            bin_attrs: bins
                .iter()
                .map(|(k, vs)| ((*k).to_string(), vs.iter().map(|v| v.to_vec()).collect()))
                .collect(),
        }
    }

    const USER_DN: &str = "CN=Fred,CN=Users,DC=corp,DC=example,DC=com";
    const BASE_DN: &str = "DC=corp,DC=example,DC=com";

    #[tokio::test]
    async fn token_groups_translates_sids_to_names() {
        let mut session = MockDirectorySession::new();
        let sid: &[u8] = &[
            0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x20, 0x00, 0x00, 0x00, 0x20, 0x02,
            0x00, 0x00,
        ];
        let sid_owned = sid.to_vec();

        session
            .expect_search()
            .with(eq(USER_DN), eq(SearchScope::Base), always(), always())
            .times(1)
            .returning(move |_, _, _, _| {
                Ok(vec![entry(USER_DN, &[], &[("tokenGroups", &[sid])])])
            });
        session
            .expect_search()
            .times(1)
            .withf(move |base, scope, filter, _| {
                base == BASE_DN
                    && *scope == SearchScope::Subtree
                    && filter.contains(&escape_filter_bytes(&sid_owned))
            })
            .returning(|_, _, _, _| {
                Ok(vec![entry(
                    "CN=Administrators,CN=Builtin,DC=corp,DC=example,DC=com",
                    &[("cn", &["Administrators"])],
                    &[],
                )])
            });

        let outcome = GroupResolver
            .token_groups(&mut session, BASE_DN, USER_DN)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TokenGroupsOutcome::Resolved(vec!["Administrators".to_string()])
        );
    }

    #[tokio::test]
    async fn missing_token_groups_reports_unsupported() {
        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .times(1)
            .returning(|_, _, _, _| Ok(vec![entry(USER_DN, &[], &[])]));

        let outcome = GroupResolver
            .token_groups(&mut session, BASE_DN, USER_DN)
            .await
            .unwrap();
        assert_eq!(outcome, TokenGroupsOutcome::Unsupported);
    }

    #[tokio::test]
    async fn recursive_walk_suppresses_cycles() {
        // admins and ops reference each other; the walk must terminate.
        let admins = "CN=Admins,OU=Groups,DC=corp,DC=example,DC=com";
        let ops = "CN=Ops,OU=Groups,DC=corp,DC=example,DC=com";

        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .with(eq(admins), eq(SearchScope::Base), always(), always())
            .times(1)
            .returning(move |_, _, _, _| {
                Ok(vec![entry(
                    admins,
                    &[("cn", &["Admins"]), ("memberOf", &[ops])],
                    &[],
                )])
            });
        session
            .expect_search()
            .with(eq(ops), eq(SearchScope::Base), always(), always())
            .times(1)
            .returning(move |_, _, _, _| {
                // Mixed-case back-reference exercises the case folding.
                Ok(vec![entry(
                    ops,
                    &[
                        ("cn", &["Ops"]),
                        ("memberOf", &["cn=admins,ou=groups,dc=corp,dc=example,dc=com"]),
                    ],
                    &[],
                )])
            });

        let names = GroupResolver
            .recursive(&mut session, &[admins.to_string()])
            .await
            .unwrap();
        assert_eq!(names, vec!["Admins".to_string(), "Ops".to_string()]);
    }

    #[tokio::test]
    async fn recursive_skips_unreadable_groups() {
        let gone = "CN=Gone,OU=Groups,DC=corp,DC=example,DC=com";
        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .times(1)
            .returning(|_, _, _, _| Ok(vec![]));

        let names = GroupResolver
            .recursive(&mut session, &[gone.to_string()])
            .await
            .unwrap();
        assert!(names.is_empty());
    }
}
