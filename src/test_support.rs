//! In-memory collaborators for unit tests.

use crate::account::{AccountService, CodeVerdict};
use crate::credential::{mask_email, AccountHandle, MailCredential};
use crate::error::{Error, Result, APP_PASSWORD_HINT};
use crate::fetcher::{MailConnector, MailSession};
use crate::providers::ProviderEntry;
use crate::solver::{PollReply, Sleeper, SolverBackend, SubmitReply};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn io_error(message: &str) -> async_imap::error::Error {
    async_imap::error::Error::Io(io::Error::new(io::ErrorKind::Other, message.to_string()))
}

/// A minimal single-part message from `verify@x.com`.
pub(crate) fn sample_message(subject: &str, body: &str) -> Vec<u8> {
    format!("From: X <verify@x.com>\r\nSubject: {subject}\r\nContent-Type: text/plain\r\n\r\n{body}\r\n")
        .into_bytes()
}

/// Where a [`MockConnector`] session misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    Login,
    Examine,
    Search,
    Fetch,
    Parse,
    Logout,
    HangOnFetch,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct LogoutCounter(Arc<AtomicUsize>);

impl LogoutCounter {
    pub(crate) fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Mailbox backed by a UID -> raw message map.
#[derive(Debug, Default)]
pub(crate) struct MockConnector {
    messages: Arc<BTreeMap<u32, Vec<u8>>>,
    fault: Option<Fault>,
    logouts: LogoutCounter,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_message(mut self, uid: u32, raw: Vec<u8>) -> Self {
        Arc::make_mut(&mut self.messages).insert(uid, raw);
        self
    }

    pub(crate) fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub(crate) fn logouts(&self) -> LogoutCounter {
        self.logouts.clone()
    }
}

#[async_trait]
impl MailConnector for MockConnector {
    type Session = MockSession;

    async fn open(
        &self,
        _provider: &ProviderEntry,
        credential: &MailCredential,
    ) -> Result<MockSession> {
        if self.fault == Some(Fault::Login) {
            return Err(Error::AuthenticationFailed {
                email: mask_email(credential.address()),
                hint: APP_PASSWORD_HINT,
                source: io_error("LOGIN failed"),
            });
        }
        Ok(MockSession {
            messages: Arc::clone(&self.messages),
            fault: self.fault,
            logouts: self.logouts.clone(),
        })
    }
}

pub(crate) struct MockSession {
    messages: Arc<BTreeMap<u32, Vec<u8>>>,
    fault: Option<Fault>,
    logouts: LogoutCounter,
}

#[async_trait]
impl MailSession for MockSession {
    async fn examine(&mut self, mailbox: &str) -> Result<()> {
        if self.fault == Some(Fault::Examine) {
            return Err(Error::SelectMailbox {
                mailbox: mailbox.to_string(),
                source: io_error("EXAMINE failed"),
            });
        }
        Ok(())
    }

    async fn search(&mut self, _query: &str) -> Result<Vec<u32>> {
        if self.fault == Some(Fault::Search) {
            return Err(Error::ImapSearch {
                source: io_error("SEARCH failed"),
            });
        }
        Ok(self.messages.keys().copied().collect())
    }

    async fn fetch_raw(&mut self, uid: u32) -> Result<Option<Vec<u8>>> {
        match self.fault {
            Some(Fault::Fetch) => Err(Error::ImapFetch {
                uid,
                source: io_error("FETCH failed"),
            }),
            Some(Fault::HangOnFetch) => std::future::pending().await,
            Some(Fault::Parse) => Ok(Some(b" overhanging: header\r\n\r\n".to_vec())),
            _ => Ok(self.messages.get(&uid).cloned()),
        }
    }

    async fn logout(&mut self) -> Result<()> {
        self.logouts.0.fetch_add(1, Ordering::SeqCst);
        if self.fault == Some(Fault::Logout) {
            return Err(Error::ImapLogout {
                source: io_error("connection reset"),
            });
        }
        Ok(())
    }
}

/// Records requested sleeps and returns immediately.
#[derive(Debug, Default)]
pub(crate) struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub(crate) fn count(&self) -> usize {
        self.slept.lock().unwrap().len()
    }

    pub(crate) fn total(&self) -> Duration {
        self.slept.lock().unwrap().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

/// Solving service that replays a fixed script. Polls past the end report not-ready.
#[derive(Debug)]
pub(crate) struct ScriptedSolver {
    submit: SubmitReply,
    polls: Mutex<VecDeque<PollReply>>,
    polled: Mutex<Vec<String>>,
}

impl ScriptedSolver {
    pub(crate) fn accepting(job_id: &str) -> Self {
        Self::with_submit(SubmitReply::Accepted(job_id.to_string()))
    }

    pub(crate) fn rejecting(reason: &str) -> Self {
        Self::with_submit(SubmitReply::Rejected(reason.to_string()))
    }

    fn with_submit(submit: SubmitReply) -> Self {
        Self {
            submit,
            polls: Mutex::new(VecDeque::new()),
            polled: Mutex::new(Vec::new()),
        }
    }

    fn then(self, reply: PollReply) -> Self {
        self.polls.lock().unwrap().push_back(reply);
        self
    }

    pub(crate) fn then_not_ready(self, times: usize) -> Self {
        (0..times).fold(self, |solver, _| solver.then(PollReply::NotReady))
    }

    pub(crate) fn then_solved(self, token: &str) -> Self {
        self.then(PollReply::Solved(token.to_string()))
    }

    pub(crate) fn then_failed(self, reason: &str) -> Self {
        self.then(PollReply::Failed(reason.to_string()))
    }

    pub(crate) fn polled_ids(&self) -> Vec<String> {
        self.polled.lock().unwrap().clone()
    }
}

#[async_trait]
impl SolverBackend for ScriptedSolver {
    async fn submit(&self, _site_key: &str, _page_url: &str) -> Result<SubmitReply> {
        Ok(self.submit.clone())
    }

    async fn poll(&self, job_id: &str) -> Result<PollReply> {
        self.polled.lock().unwrap().push(job_id.to_string());
        Ok(self
            .polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PollReply::NotReady))
    }
}

#[derive(Debug, Clone)]
enum AccountMode {
    Verifying,
    Rejecting(String),
    Unknown,
}

/// Account service that records what it was sent.
#[derive(Debug)]
pub(crate) struct MockAccounts {
    mode: AccountMode,
    requested: Mutex<Vec<String>>,
    submitted: Mutex<Vec<String>>,
}

impl MockAccounts {
    fn with_mode(mode: AccountMode) -> Self {
        Self {
            mode,
            requested: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn verifying() -> Self {
        Self::with_mode(AccountMode::Verifying)
    }

    pub(crate) fn rejecting(reason: &str) -> Self {
        Self::with_mode(AccountMode::Rejecting(reason.to_string()))
    }

    pub(crate) fn unknown_account() -> Self {
        Self::with_mode(AccountMode::Unknown)
    }

    pub(crate) fn requested_tokens(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    pub(crate) fn submitted_codes(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountService for MockAccounts {
    async fn check_status(&self, _account: &AccountHandle) -> Result<()> {
        match self.mode {
            AccountMode::Unknown => Err(Error::AccountService {
                operation: "check_status",
                reason: "404 Not Found".to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn request_code(
        &self,
        _account: &AccountHandle,
        _email: &str,
        challenge_token: &str,
    ) -> Result<()> {
        self.requested
            .lock()
            .unwrap()
            .push(challenge_token.to_string());
        Ok(())
    }

    async fn submit_code(&self, _account: &AccountHandle, code: &str) -> Result<CodeVerdict> {
        self.submitted.lock().unwrap().push(code.to_string());
        Ok(match &self.mode {
            AccountMode::Rejecting(reason) => CodeVerdict::Rejected(reason.clone()),
            _ => CodeVerdict::Verified,
        })
    }
}
