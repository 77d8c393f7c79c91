//! Verification code retrieval from a mailbox.
//!
//! [`MailboxCodeFetcher`] opens a session through a [`MailConnector`], searches for mail
//! from the expected senders, reads the newest match and runs the [`CodeExtractor`] on
//! it. The session is logged out on every exit path: the normal path awaits the logout,
//! and if the fetch future is dropped mid-flight (for example by an outer
//! `tokio::time::timeout`) the logout is spawned onto the runtime instead.
//!
//! Fetching is read-only. The mailbox is opened with `EXAMINE` and bodies are read with
//! `BODY.PEEK[]`, so two fetches against an unchanged mailbox return the same code.
//!
//! # Example
//!
//! ```no_run
//! use inbox_verify::{
//!     FetcherConfig, ImapConnector, MailCredential, MailboxCodeFetcher, ProviderDirectory,
//!     RetrievalQuery,
//! };
//!
//! # async fn example() -> inbox_verify::Result<()> {
//! let credential = MailCredential::new("user@gmx.net", "app-password")?;
//! let provider = ProviderDirectory::with_defaults().lookup(credential.address())?;
//! let query = RetrievalQuery::from_senders(["verify@x.com", "info@x.com"])?;
//!
//! let fetcher = MailboxCodeFetcher::new(ImapConnector::new(FetcherConfig::default()));
//! let code = fetcher.fetch(&credential, &provider, &query).await?;
//! println!("{} (from {})", code.value, code.source_from);
//! # Ok(())
//! # }
//! ```

use crate::credential::{mask_email, MailCredential};
use crate::error::{Error, Result};
use crate::extractor::CodeExtractor;
use crate::parser::{self, SkippedPart};
use crate::providers::ProviderEntry;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// An authenticated mailbox session.
#[async_trait]
pub trait MailSession: Send {
    /// Opens a mailbox read-only.
    async fn examine(&mut self, mailbox: &str) -> Result<()>;

    /// Runs a UID search and returns the matching UIDs.
    async fn search(&mut self, query: &str) -> Result<Vec<u32>>;

    /// Returns the raw RFC 822 bytes of a message without marking it seen.
    async fn fetch_raw(&mut self, uid: u32) -> Result<Option<Vec<u8>>>;

    /// Ends the session.
    async fn logout(&mut self) -> Result<()>;
}

/// Opens authenticated sessions.
#[async_trait]
pub trait MailConnector: Send + Sync {
    /// Session type produced by this connector.
    type Session: MailSession + 'static;

    /// Connects to the provider and logs in.
    ///
    /// A refused login must be reported as [`Error::AuthenticationFailed`].
    async fn open(
        &self,
        provider: &ProviderEntry,
        credential: &MailCredential,
    ) -> Result<Self::Session>;

    /// Mailbox to examine.
    fn mailbox(&self) -> &str {
        "INBOX"
    }

    /// How long a logout may take.
    fn logout_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

/// Which messages qualify as verification mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalQuery {
    senders: BTreeSet<String>,
    since: Option<NaiveDate>,
}

impl RetrievalQuery {
    /// Builds a query matching mail from any of `senders` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Misconfiguration`] if no non-blank sender is given.
    pub fn from_senders<I, S>(senders: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let senders: BTreeSet<String> = senders
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        if senders.is_empty() {
            return Err(Error::misconfiguration(
                "at least one sender address is required",
            ));
        }

        Ok(Self {
            senders,
            since: None,
        })
    }

    /// Restricts the search to mail received on or after `date`.
    #[must_use]
    pub fn since(mut self, date: NaiveDate) -> Self {
        self.since = Some(date);
        self
    }

    /// Restricts the search to mail newer than `max_age` (day granularity, as IMAP).
    ///
    /// An age reaching back before year 1 leaves the query unbounded.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.since = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .map(|cutoff| cutoff.date_naive())
            .filter(|date| date.year() >= 1);
        self
    }

    /// Sender addresses, sorted.
    pub fn senders(&self) -> impl Iterator<Item = &str> {
        self.senders.iter().map(String::as_str)
    }

    /// IMAP search criteria, e.g. `SINCE 07-Dec-2025 OR FROM "a" FROM "b"`.
    #[must_use]
    pub fn to_imap_criteria(&self) -> String {
        let mut senders = self.senders.iter().rev();
        let mut criteria = senders
            .next()
            .map(|last| from_key(last))
            .unwrap_or_else(|| "ALL".to_string());
        for sender in senders {
            criteria = format!("OR {} {criteria}", from_key(sender));
        }

        match self.since {
            Some(date) => format!("SINCE {} {criteria}", date.format("%d-%b-%Y")),
            None => criteria,
        }
    }
}

fn from_key(address: &str) -> String {
    let escaped = address.replace('\\', "\\\\").replace('"', "\\\"");
    format!("FROM \"{escaped}\"")
}

/// A code pulled from the newest qualifying message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedCode {
    /// The 6-8 digit code.
    pub value: String,
    /// Decoded `Subject` header of the message.
    pub source_subject: String,
    /// Decoded `From` header of the message.
    pub source_from: String,
    /// UID of the message.
    pub uid: u32,
    /// Parts that were left out because they could not be decoded.
    pub skipped_parts: Vec<SkippedPart>,
}

/// Finds the newest verification message and extracts its code.
#[derive(Debug)]
pub struct MailboxCodeFetcher<C> {
    connector: C,
    extractor: CodeExtractor,
}

impl<C: MailConnector> MailboxCodeFetcher<C> {
    /// Creates a fetcher with the default extraction rules.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self::with_extractor(connector, CodeExtractor::new())
    }

    /// Creates a fetcher with custom extraction rules.
    #[must_use]
    pub fn with_extractor(connector: C, extractor: CodeExtractor) -> Self {
        Self {
            connector,
            extractor,
        }
    }

    /// Returns the underlying connector.
    #[must_use]
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Retrieves the code from the newest message matching `query`.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthenticationFailed`] if the login is refused (never retried)
    /// - [`Error::NoMatchingMessage`] if the search finds nothing
    /// - [`Error::CodeNotFound`] if the newest message has no code
    /// - protocol, timeout and network errors from the session
    #[instrument(
        name = "MailboxCodeFetcher::fetch",
        skip_all,
        fields(
            email = %mask_email(credential.address()),
            imap_host = %provider.host,
            port = provider.port
        )
    )]
    pub async fn fetch(
        &self,
        credential: &MailCredential,
        provider: &ProviderEntry,
        query: &RetrievalQuery,
    ) -> Result<ExtractedCode> {
        let session = self.connector.open(provider, credential).await?;
        debug!("Session opened");

        let mut guard = SessionGuard::new(session, self.connector.logout_timeout());
        let outcome = self.retrieve(guard.session(), query).await;
        guard.close().await;

        outcome
    }

    async fn retrieve(
        &self,
        session: &mut C::Session,
        query: &RetrievalQuery,
    ) -> Result<ExtractedCode> {
        session.examine(self.connector.mailbox()).await?;

        let criteria = query.to_imap_criteria();
        let uids = session.search(&criteria).await?;
        debug!(criteria = %criteria, matches = uids.len(), "Searched mailbox");

        // UIDs ascend with arrival, so the largest is the newest
        let uid = uids.into_iter().max().ok_or(Error::NoMatchingMessage)?;

        let raw = session
            .fetch_raw(uid)
            .await?
            .ok_or(Error::NoMatchingMessage)?;

        let message = parser::parse_message(&raw)?;

        let (value, rule) = self
            .extractor
            .extract_with_rule(&message.body)
            .ok_or(Error::CodeNotFound { uid })?;

        debug!(uid, rule, "Extracted verification code");

        Ok(ExtractedCode {
            value: value.to_string(),
            source_subject: message.subject,
            source_from: message.from,
            uid,
            skipped_parts: message.skipped,
        })
    }
}

/// Owns a session and guarantees exactly one logout.
struct SessionGuard<S: MailSession + 'static> {
    session: Option<S>,
    logout_timeout: Duration,
}

impl<S: MailSession + 'static> SessionGuard<S> {
    fn new(session: S, logout_timeout: Duration) -> Self {
        Self {
            session: Some(session),
            logout_timeout,
        }
    }

    fn session(&mut self) -> &mut S {
        self.session.as_mut().expect("guard already closed")
    }

    /// Logs out. Failures are logged; they never replace the fetch result.
    async fn close(mut self) {
        if let Some(mut session) = self.session.take() {
            logout_with_timeout(&mut session, self.logout_timeout).await;
        }
    }
}

impl<S: MailSession + 'static> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let logout_timeout = self.logout_timeout;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Fetch cancelled, scheduling logout");
                handle.spawn(async move {
                    logout_with_timeout(&mut session, logout_timeout).await;
                });
            }
            Err(_) => warn!(
                "Mailbox session dropped outside of a tokio runtime; \
                 connection closes without IMAP logout"
            ),
        }
    }
}

async fn logout_with_timeout<S: MailSession>(session: &mut S, logout_timeout: Duration) {
    match tokio::time::timeout(logout_timeout, session.logout()).await {
        Ok(Ok(())) => debug!("Logged out"),
        Ok(Err(e)) => warn!(error = %e, "Logout failed"),
        Err(_) => warn!(
            timeout_ms = u64::try_from(logout_timeout.as_millis()).unwrap_or(u64::MAX),
            "Logout timed out"
        ),
    }
}
