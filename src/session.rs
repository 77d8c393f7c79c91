//! IMAP-backed [`MailConnector`] and [`MailSession`].
//!
//! Every network step runs under its own timeout from [`TimeoutConfig`](crate::TimeoutConfig).

use crate::config::FetcherConfig;
use crate::connection::{self, TlsStream};
use crate::credential::{mask_email, MailCredential};
use crate::error::{Error, Result, APP_PASSWORD_HINT};
use crate::fetcher::{MailConnector, MailSession};
use crate::providers::ProviderEntry;
use async_imap::Session;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, instrument};

/// Connects to real IMAP servers over TLS, optionally through a SOCKS5 proxy.
#[derive(Debug, Clone, Default)]
pub struct ImapConnector {
    config: FetcherConfig,
}

impl ImapConnector {
    /// Creates a connector with the given connection settings.
    #[must_use]
    pub fn new(config: FetcherConfig) -> Self {
        Self { config }
    }

    /// Returns the connection settings.
    #[must_use]
    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }
}

#[async_trait]
impl MailConnector for ImapConnector {
    type Session = ImapMailSession;

    #[instrument(
        name = "ImapConnector::open",
        skip_all,
        fields(imap_host = %provider.host, port = provider.port)
    )]
    async fn open(
        &self,
        provider: &ProviderEntry,
        credential: &MailCredential,
    ) -> Result<ImapMailSession> {
        let timeouts = &self.config.timeouts;

        let tls_stream = tokio::time::timeout(
            timeouts.connect,
            connection::establish_tls_connection(
                &provider.host,
                provider.port,
                self.config.proxy.as_ref(),
            ),
        )
        .await
        .map_err(|_| Error::ConnectTimeout {
            target: provider.server_address(),
            timeout: timeouts.connect,
        })??;

        debug!("TLS connection established");

        let masked = mask_email(credential.address());
        let client = async_imap::Client::new(tls_stream);
        let session = tokio::time::timeout(
            timeouts.auth,
            client.login(credential.address(), credential.secret()),
        )
        .await
        .map_err(|_| Error::AuthTimeout {
            email: masked.clone(),
            timeout: timeouts.auth,
        })?
        .map_err(|(source, _client)| Error::AuthenticationFailed {
            email: masked,
            hint: APP_PASSWORD_HINT,
            source,
        })?;

        debug!("Authenticated");

        Ok(ImapMailSession {
            session,
            timeouts: SessionTimeouts {
                select: timeouts.select,
                search: timeouts.search,
                message_fetch: timeouts.message_fetch,
                logout: timeouts.logout,
            },
        })
    }

    fn mailbox(&self) -> &str {
        &self.config.mailbox
    }

    fn logout_timeout(&self) -> Duration {
        self.config.timeouts.logout
    }
}

#[derive(Debug, Clone, Copy)]
struct SessionTimeouts {
    select: Duration,
    search: Duration,
    message_fetch: Duration,
    logout: Duration,
}

/// An authenticated IMAP session over TLS.
pub struct ImapMailSession {
    session: Session<TlsStream>,
    timeouts: SessionTimeouts,
}

impl std::fmt::Debug for ImapMailSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapMailSession")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MailSession for ImapMailSession {
    #[instrument(name = "ImapMailSession::examine", skip(self))]
    async fn examine(&mut self, mailbox: &str) -> Result<()> {
        let timeout = self.timeouts.select;

        tokio::time::timeout(timeout, self.session.examine(mailbox))
            .await
            .map_err(|_| Error::SelectTimeout {
                mailbox: mailbox.to_string(),
                timeout,
            })?
            .map_err(|source| Error::SelectMailbox {
                mailbox: mailbox.to_string(),
                source,
            })?;

        Ok(())
    }

    #[instrument(name = "ImapMailSession::search", skip(self))]
    async fn search(&mut self, query: &str) -> Result<Vec<u32>> {
        let timeout = self.timeouts.search;

        let uids = tokio::time::timeout(timeout, self.session.uid_search(query))
            .await
            .map_err(|_| Error::SearchTimeout { timeout })?
            .map_err(|source| Error::ImapSearch { source })?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();

        debug!(uid_count = uids.len(), "Search complete");

        Ok(uids)
    }

    #[instrument(name = "ImapMailSession::fetch_raw", skip(self))]
    async fn fetch_raw(&mut self, uid: u32) -> Result<Option<Vec<u8>>> {
        let timeout = self.timeouts.message_fetch;
        let uid_set = uid.to_string();

        let fetch = async {
            let stream = self
                .session
                .uid_fetch(&uid_set, "BODY.PEEK[]")
                .await
                .map_err(|source| Error::ImapFetch { uid, source })?;
            let mut stream = std::pin::pin!(stream);

            let mut body = None;
            while let Some(message) = stream.next().await {
                let message = message.map_err(|source| Error::FetchMessage { source })?;
                if body.is_none() {
                    body = message.body().map(<[u8]>::to_vec);
                }
            }
            Ok(body)
        };

        tokio::time::timeout(timeout, fetch)
            .await
            .map_err(|_| Error::FetchTimeout { uid, timeout })?
    }

    #[instrument(name = "ImapMailSession::logout", skip(self))]
    async fn logout(&mut self) -> Result<()> {
        let timeout = self.timeouts.logout;

        tokio::time::timeout(timeout, self.session.logout())
            .await
            .map_err(|_| Error::LogoutTimeout { timeout })?
            .map_err(|source| Error::ImapLogout { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutConfig;

    #[test]
    fn test_connector_uses_configured_mailbox_and_logout() {
        let config = FetcherConfig::builder()
            .mailbox("Archive")
            .logout_timeout(Duration::from_secs(2))
            .build();
        let connector = ImapConnector::new(config);

        assert_eq!(connector.mailbox(), "Archive");
        assert_eq!(connector.logout_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_default_connector() {
        let connector = ImapConnector::default();
        assert_eq!(connector.mailbox(), "INBOX");
        assert_eq!(
            connector.config().timeouts.connect,
            TimeoutConfig::default().connect
        );
    }

    #[tokio::test]
    async fn test_invalid_host_fails_before_connecting() {
        let connector = ImapConnector::default();
        let provider = ProviderEntry::new("Broken", "broken.test", "", 993);
        let credential = MailCredential::new("user@broken.test", "secret").unwrap();

        let err = connector.open(&provider, &credential).await.unwrap_err();
        assert!(matches!(err, Error::InvalidDnsName { .. }));
    }
}
