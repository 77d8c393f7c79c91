//! End-to-end workflow tests through the public API, using in-memory collaborators.

use async_trait::async_trait;
use inbox_verify::{
    AccountHandle, AccountService, ChallengeSolver, ChallengeTarget, CodeVerdict, Error, Gateway,
    GatewayRequest, MailConnector, MailCredential, MailSession, MailboxCodeFetcher, PollReply,
    ProviderDirectory, ProviderEntry, Result, RetrievalQuery, Sleeper, SolverBackend, Stage,
    StepStatus, SubmitReply, VerificationOrchestrator,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// In-memory collaborators
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct InstantSleeper;

#[async_trait]
impl Sleeper for InstantSleeper {
    async fn sleep(&self, _duration: Duration) {}
}

struct Inbox {
    messages: Vec<(u32, Vec<u8>)>,
    searches: Arc<Mutex<Vec<String>>>,
    logouts: Arc<AtomicUsize>,
}

impl Inbox {
    fn with(messages: Vec<(u32, Vec<u8>)>) -> Self {
        Self {
            messages,
            searches: Arc::default(),
            logouts: Arc::default(),
        }
    }
}

struct InboxSession {
    messages: Vec<(u32, Vec<u8>)>,
    searches: Arc<Mutex<Vec<String>>>,
    logouts: Arc<AtomicUsize>,
}

#[async_trait]
impl MailConnector for Inbox {
    type Session = InboxSession;

    async fn open(
        &self,
        _provider: &ProviderEntry,
        _credential: &MailCredential,
    ) -> Result<InboxSession> {
        Ok(InboxSession {
            messages: self.messages.clone(),
            searches: Arc::clone(&self.searches),
            logouts: Arc::clone(&self.logouts),
        })
    }
}

#[async_trait]
impl MailSession for InboxSession {
    async fn examine(&mut self, _mailbox: &str) -> Result<()> {
        Ok(())
    }

    async fn search(&mut self, query: &str) -> Result<Vec<u32>> {
        self.searches.lock().unwrap().push(query.to_string());
        Ok(self.messages.iter().map(|(uid, _)| *uid).collect())
    }

    async fn fetch_raw(&mut self, uid: u32) -> Result<Option<Vec<u8>>> {
        Ok(self
            .messages
            .iter()
            .find(|(id, _)| *id == uid)
            .map(|(_, raw)| raw.clone()))
    }

    async fn logout(&mut self) -> Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct SolvesAfter {
    not_ready: usize,
    polls: AtomicUsize,
}

impl SolvesAfter {
    fn new(not_ready: usize) -> Self {
        Self {
            not_ready,
            polls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SolverBackend for SolvesAfter {
    async fn submit(&self, _site_key: &str, _page_url: &str) -> Result<SubmitReply> {
        Ok(SubmitReply::Accepted("job-42".to_string()))
    }

    async fn poll(&self, _job_id: &str) -> Result<PollReply> {
        let done = self.polls.fetch_add(1, Ordering::SeqCst);
        if done < self.not_ready {
            Ok(PollReply::NotReady)
        } else {
            Ok(PollReply::Solved("solved-token".to_string()))
        }
    }
}

#[derive(Default)]
struct AcceptingAccounts {
    codes: Mutex<Vec<String>>,
}

#[async_trait]
impl AccountService for AcceptingAccounts {
    async fn check_status(&self, _account: &AccountHandle) -> Result<()> {
        Ok(())
    }

    async fn request_code(
        &self,
        _account: &AccountHandle,
        _email: &str,
        _challenge_token: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn submit_code(&self, _account: &AccountHandle, code: &str) -> Result<CodeVerdict> {
        self.codes.lock().unwrap().push(code.to_string());
        Ok(CodeVerdict::Verified)
    }
}

fn html_message(code: &str) -> Vec<u8> {
    format!(
        "From: X <info@x.com>\r\n\
         Subject: Confirm your email\r\n\
         Content-Type: multipart/alternative; boundary=\"sep\"\r\n\
         \r\n\
         --sep\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         Use the code below.\r\n\
         --sep\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         \r\n\
         <p>Your confirmation code is <strong>{code}</strong></p>\r\n\
         --sep--\r\n"
    )
    .into_bytes()
}

fn solver(not_ready: usize) -> ChallengeSolver<SolvesAfter> {
    ChallengeSolver::new(SolvesAfter::new(not_ready), 20, Duration::from_secs(5))
        .with_sleeper(Arc::new(InstantSleeper))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_orchestrator_end_to_end() {
    let inbox = Inbox::with(vec![(10, html_message("11112222")), (12, html_message("84736251"))]);
    let searches = Arc::clone(&inbox.searches);
    let logouts = Arc::clone(&inbox.logouts);

    let solver = solver(2);
    let fetcher = MailboxCodeFetcher::new(inbox);
    let accounts = AcceptingAccounts::default();
    let directory = ProviderDirectory::with_defaults();
    let query = RetrievalQuery::from_senders(["info@x.com", "verify@x.com"]).unwrap();
    let challenge = ChallengeTarget::default();

    let outcome = VerificationOrchestrator::new(
        &solver, &fetcher, &accounts, &directory, &query, &challenge,
    )
    .with_sleeper(Arc::new(InstantSleeper))
    .run(
        &AccountHandle::new("someone", "token").unwrap(),
        &MailCredential::new("someone@gmx.net", "pw").unwrap(),
    )
    .await;

    assert!(outcome.is_verified(), "{:?}", outcome.failure);
    assert!(outcome
        .steps
        .iter()
        .all(|step| step.status == StepStatus::Completed));
    assert_eq!(*accounts.codes.lock().unwrap(), vec!["84736251"]);
    assert_eq!(
        searches.lock().unwrap().as_slice(),
        [r#"OR FROM "info@x.com" FROM "verify@x.com""#]
    );
    assert_eq!(logouts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_orchestrator_unsupported_provider_stops_at_fetch() {
    let solver = solver(0);
    let fetcher = MailboxCodeFetcher::new(Inbox::with(Vec::new()));
    let accounts = AcceptingAccounts::default();
    let directory = ProviderDirectory::with_defaults();
    let query = RetrievalQuery::from_senders(["verify@x.com"]).unwrap();
    let challenge = ChallengeTarget::default();

    let outcome = VerificationOrchestrator::new(
        &solver, &fetcher, &accounts, &directory, &query, &challenge,
    )
    .with_sleeper(Arc::new(InstantSleeper))
    .run(
        &AccountHandle::new("someone", "token").unwrap(),
        &MailCredential::new("someone@example.org", "pw").unwrap(),
    )
    .await;

    assert_eq!(outcome.failed_stage(), Some(Stage::FetchCode));
    assert_eq!(outcome.steps.len(), 4);
    assert!(matches!(outcome.failure, Some(Error::UnsupportedProvider(_))));
    assert!(accounts.codes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_gateway_verify_round_trip() {
    let gateway = Gateway::new(
        MailboxCodeFetcher::new(Inbox::with(vec![(3, html_message("5566778"))])),
        ProviderDirectory::with_defaults(),
        RetrievalQuery::from_senders(["info@x.com"]).unwrap(),
    )
    .with_solver(solver(1))
    .with_accounts(AcceptingAccounts::default())
    .with_sleeper(Arc::new(InstantSleeper));

    let response = gateway
        .verify(GatewayRequest::post(
            r#"{"username":"someone","authToken":"t","email":"someone@gmx.net","emailPassword":"pw"}"#,
        ))
        .await;

    assert_eq!(response.status, 200);
    let body = response.json_body().unwrap();
    assert_eq!(body["message"], "Account verified successfully");
    assert_eq!(body["steps"][3]["code"], "5566778");
}

#[tokio::test]
async fn test_gateway_fetch_code_from_custom_provider() {
    let mut directory = ProviderDirectory::new();
    directory.register(ProviderEntry::new("Corp", "corp.example", "imap.corp.example", 993));

    let gateway: Gateway<SolvesAfter, Inbox, AcceptingAccounts> = Gateway::new(
        MailboxCodeFetcher::new(Inbox::with(vec![(1, html_message("90817263"))])),
        directory,
        RetrievalQuery::from_senders(["info@x.com"]).unwrap(),
    );

    let response = gateway
        .fetch_code(GatewayRequest::post(
            r#"{"email":"me@corp.example","password":"pw"}"#,
        ))
        .await;

    assert_eq!(response.status, 200);
    let body = response.json_body().unwrap();
    assert_eq!(body["code"], "90817263");
    assert_eq!(body["subject"], "Confirm your email");
}
