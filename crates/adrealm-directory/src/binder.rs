//! Failover bind across a prioritized candidate list.
//!
//! Candidates are attempted strictly in the order provided, one at a time. A
//! credential rejection halts the whole operation immediately: retrying the
//! same credentials against the remaining controllers can push an account
//! over an external lockout threshold.

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use adrealm_core::error::{Error, Result};

use crate::discovery::ServerCandidate;
use crate::session::{BindStatus, DirectoryConnector, DirectorySession};
use crate::tls::{ConnectionSecurity, TlsNegotiator};

/// A successful bind: the live session plus the server that accepted it.
///
/// `Debug` shows only the accepting server; the session handle itself is
/// opaque.
pub struct BoundSession {
    /// The authenticated (or anonymous) session.
    pub session: Box<dyn DirectorySession>,
    /// The candidate that accepted the bind, for diagnostics.
    pub server: ServerCandidate,
}

impl std::fmt::Debug for BoundSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundSession")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

/// Binds against a candidate list with per-server retry semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailoverBinder {
    negotiator: TlsNegotiator,
}

impl FailoverBinder {
    /// Attempts to bind as `principal` against the candidates in order.
    ///
    /// An empty or absent secret requests an anonymous bind; per LDAP
    /// convention an empty password signals anonymous authentication and is
    /// never treated as a credential.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthenticationRejected`] as soon as any server
    /// rejects the credentials, without contacting further candidates, or
    /// [`Error::AllServersUnreachable`] when every candidate fails
    /// transiently. A non-transient failure (per [`Error::is_transient`])
    /// aborts the walk and is returned as-is.
    pub async fn bind(
        &self,
        connector: &dyn DirectoryConnector,
        domain: &str,
        candidates: &[ServerCandidate],
        security: ConnectionSecurity,
        principal: Option<&str>,
        secret: Option<&SecretString>,
    ) -> Result<BoundSession> {
        let mut last_cause: Option<Error> = None;

        for candidate in candidates {
            let mut session = match self.negotiator.establish(connector, candidate, security).await
            {
                Ok(session) => session,
                Err(err) if err.is_transient() => {
                    warn!(server = %candidate, error = %err, "failed to connect");
                    last_cause = Some(err);
                    continue;
                }
                Err(err) => return Err(err),
            };

            match authenticate(session.as_mut(), principal, secret).await {
                Ok(BindStatus::Bound) => {
                    debug!(server = %candidate, "bound to directory server");
                    return Ok(BoundSession {
                        session,
                        server: candidate.clone(),
                    });
                }
                Ok(BindStatus::InvalidCredentials(reason)) => {
                    warn!(server = %candidate, "authentication rejected");
                    let _ = session.unbind().await;
                    return Err(Error::AuthenticationRejected {
                        domain: Some(domain.to_string()),
                        reason,
                    });
                }
                Err(err) if err.is_transient() => {
                    warn!(server = %candidate, error = %err, "bind attempt failed");
                    last_cause = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(Error::AllServersUnreachable {
            domain: domain.to_string(),
            last_cause: last_cause
                .map_or_else(|| "no candidate servers".to_string(), |err| err.to_string()),
        })
    }
}

async fn authenticate(
    session: &mut dyn DirectorySession,
    principal: Option<&str>,
    secret: Option<&SecretString>,
) -> Result<BindStatus> {
    let password = secret.map(ExposeSecret::expose_secret).unwrap_or_default();
    if principal.is_none() || password.is_empty() {
        debug!("binding anonymously");
        return session.simple_bind("", "").await;
    }
    session
        .simple_bind(principal.unwrap_or_default(), password)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MockDirectoryConnector, MockDirectorySession, Transport};
    use mockall::predicate::{always, eq};

    fn candidates() -> Vec<ServerCandidate> {
        vec![
            ServerCandidate::new("dc1.example.com", 389),
            ServerCandidate::new("dc2.example.com", 389),
            ServerCandidate::new("dc3.example.com", 389),
        ]
    }

    fn transient(server: &str) -> Error {
        Error::DirectoryError {
            server: server.to_string(),
            message: "connection refused".to_string(),
        }
    }

    #[test]
    fn bound_session_debug_names_the_server_only() {
        let bound = BoundSession {
            session: Box::new(MockDirectorySession::new()),
            server: ServerCandidate::new("dc1.example.com", 389),
        };
        let rendered = format!("{bound:?}");
        assert!(rendered.contains("dc1.example.com"));
        assert!(!rendered.contains("session"));
    }

    #[tokio::test]
    async fn advances_past_transient_failures() {
        let mut connector = MockDirectoryConnector::new();
        let mut sequence = mockall::Sequence::new();

        connector
            .expect_open()
            .with(eq(ServerCandidate::new("dc1.example.com", 389)), always())
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Err(transient("dc1.example.com:389")));
        connector
            .expect_open()
            .with(eq(ServerCandidate::new("dc2.example.com", 389)), always())
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Err(transient("dc2.example.com:389")));
        connector
            .expect_open()
            .with(eq(ServerCandidate::new("dc3.example.com", 389)), always())
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| {
                let mut session = MockDirectorySession::new();
                session
                    .expect_simple_bind()
                    .returning(|_, _| Ok(BindStatus::Bound));
                Ok(Box::new(session))
            });

        let secret = SecretString::from("password".to_string());
        let bound = FailoverBinder::default()
            .bind(
                &connector,
                "example.com",
                &candidates(),
                ConnectionSecurity::Plaintext,
                Some("fred@example.com"),
                Some(&secret),
            )
            .await
            .unwrap();

        assert_eq!(bound.server, ServerCandidate::new("dc3.example.com", 389));
    }

    #[tokio::test]
    async fn rejection_stops_immediately() {
        let mut connector = MockDirectoryConnector::new();
        connector
            .expect_open()
            .with(eq(ServerCandidate::new("dc1.example.com", 389)), always())
            .times(1)
            .returning(|_, _| {
                let mut session = MockDirectorySession::new();
                session.expect_simple_bind().returning(|_, _| {
                    Ok(BindStatus::InvalidCredentials("code 49".to_string()))
                });
                session.expect_unbind().returning(|| Ok(()));
                Ok(Box::new(session))
            });
        // No expectation for dc2/dc3: contacting them would amplify lockouts.

        let secret = SecretString::from("wrong".to_string());
        let err = FailoverBinder::default()
            .bind(
                &connector,
                "example.com",
                &candidates(),
                ConnectionSecurity::Plaintext,
                Some("fred@example.com"),
                Some(&secret),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AuthenticationRejected { .. }));
    }

    #[tokio::test]
    async fn non_transient_failure_aborts_the_walk() {
        let mut connector = MockDirectoryConnector::new();
        connector
            .expect_open()
            .with(eq(ServerCandidate::new("dc1.example.com", 389)), always())
            .times(1)
            .returning(|_, _| Err(Error::ConfigError("bad TLS material".to_string())));
        // dc2/dc3 must not be contacted: the failure would repeat there.

        let err = FailoverBinder::default()
            .bind(
                &connector,
                "example.com",
                &candidates(),
                ConnectionSecurity::Plaintext,
                None,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[tokio::test]
    async fn empty_secret_binds_anonymously() {
        let mut connector = MockDirectoryConnector::new();
        connector.expect_open().times(1).returning(|_, _| {
            let mut session = MockDirectorySession::new();
            session
                .expect_simple_bind()
                .with(eq(""), eq(""))
                .times(1)
                .returning(|_, _| Ok(BindStatus::Bound));
            Ok(Box::new(session))
        });

        let secret = SecretString::from(String::new());
        let bound = FailoverBinder::default()
            .bind(
                &connector,
                "example.com",
                &candidates()[..1],
                ConnectionSecurity::Plaintext,
                Some("fred@example.com"),
                Some(&secret),
            )
            .await;
        assert!(bound.is_ok());
    }

    #[tokio::test]
    async fn exhausted_candidates_carry_last_cause() {
        let mut connector = MockDirectoryConnector::new();
        connector
            .expect_open()
            .times(3)
            .returning(|candidate, _| Err(transient(&candidate.to_string())));

        let err = FailoverBinder::default()
            .bind(
                &connector,
                "example.com",
                &candidates(),
                ConnectionSecurity::Plaintext,
                None,
                None,
            )
            .await
            .unwrap_err();

        match err {
            Error::AllServersUnreachable { domain, last_cause } => {
                assert_eq!(domain, "example.com");
                assert!(last_cause.contains("dc3.example.com"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn starttls_candidate_gets_plaintext_redial_before_advancing() {
        let mut connector = MockDirectoryConnector::new();
        let mut sequence = mockall::Sequence::new();

        connector
            .expect_open()
            .with(eq(ServerCandidate::new("dc1.example.com", 389)), eq(Transport::StartTls))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| {
                Err(Error::TlsNegotiationFailed {
                    server: "dc1.example.com:389".to_string(),
                    message: "upgrade rejected".to_string(),
                })
            });
        connector
            .expect_open()
            .with(eq(ServerCandidate::new("dc1.example.com", 389)), eq(Transport::Plain))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| {
                let mut session = MockDirectorySession::new();
                session
                    .expect_simple_bind()
                    .returning(|_, _| Ok(BindStatus::Bound));
                Ok(Box::new(session))
            });

        let bound = FailoverBinder::default()
            .bind(
                &connector,
                "example.com",
                &candidates()[..1],
                ConnectionSecurity::StartTls,
                None,
                None,
            )
            .await;
        assert!(bound.is_ok());
    }
}
