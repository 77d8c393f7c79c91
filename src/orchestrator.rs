//! The end-to-end verification workflow.
//!
//! Stages run strictly in order and each leaves one [`StepRecord`] in the ledger:
//!
//! ```text
//! CheckStatus -> SolveChallenge -> RequestCode -> FetchCode -> SubmitCode
//! ```
//!
//! The first failing stage is marked failed and nothing after it runs. The ledger is
//! returned either way so callers can see how far the workflow got.

use crate::account::{AccountService, CodeVerdict};
use crate::config::ChallengeTarget;
use crate::credential::{AccountHandle, MailCredential};
use crate::error::{Error, Result};
use crate::fetcher::{MailConnector, MailboxCodeFetcher, RetrievalQuery};
use crate::providers::ProviderDirectory;
use crate::solver::{ChallengeSolver, Sleeper, SolverBackend, TokioSleeper};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default wait for the code mail to arrive after requesting it.
pub const DEFAULT_DELIVERY_WAIT: Duration = Duration::from_secs(5);

/// Workflow stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Confirm the account and its token.
    CheckStatus,
    /// Obtain a challenge token.
    SolveChallenge,
    /// Ask the site to mail a code.
    RequestCode,
    /// Read the code from the mailbox.
    FetchCode,
    /// Hand the code back to the site.
    SubmitCode,
}

impl Stage {
    /// Stage name as it appears in the ledger.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckStatus => "check_status",
            Self::SolveChallenge => "solve_challenge",
            Self::RequestCode => "request_code",
            Self::FetchCode => "fetch_code",
            Self::SubmitCode => "submit_code",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Started, not finished.
    Pending,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

/// Value produced by a stage, serialized inline as `"token"` or `"code"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPayload {
    /// Solved challenge token.
    Token(String),
    /// Verification code read from the mailbox.
    Code(String),
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// Which stage this is.
    pub step: Stage,
    /// Where it got to.
    pub status: StepStatus,
    /// Error text for failed stages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Stage output, if any.
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub payload: Option<StepPayload>,
}

impl StepRecord {
    fn pending(step: Stage) -> Self {
        Self {
            step,
            status: StepStatus::Pending,
            detail: None,
            payload: None,
        }
    }
}

/// Result of one workflow run.
#[derive(Debug)]
pub struct VerificationOutcome {
    /// Username the workflow ran for.
    pub username: String,
    /// Ledger in execution order.
    pub steps: Vec<StepRecord>,
    /// The error that stopped the workflow, if any.
    pub failure: Option<Error>,
}

impl VerificationOutcome {
    /// Whether every stage completed.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.failure.is_none()
    }

    /// The stage that failed, if any.
    #[must_use]
    pub fn failed_stage(&self) -> Option<Stage> {
        self.steps
            .iter()
            .find(|record| record.status == StepStatus::Failed)
            .map(|record| record.step)
    }
}

/// Drives the verification workflow over borrowed collaborators.
pub struct VerificationOrchestrator<'a, B, C, A> {
    solver: &'a ChallengeSolver<B>,
    fetcher: &'a MailboxCodeFetcher<C>,
    accounts: &'a A,
    directory: &'a ProviderDirectory,
    query: &'a RetrievalQuery,
    challenge: &'a ChallengeTarget,
    delivery_wait: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl<B, C, A> std::fmt::Debug for VerificationOrchestrator<'_, B, C, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationOrchestrator")
            .field("query", &self.query)
            .field("challenge", &self.challenge)
            .field("delivery_wait", &self.delivery_wait)
            .finish_non_exhaustive()
    }
}

impl<'a, B, C, A> VerificationOrchestrator<'a, B, C, A>
where
    B: SolverBackend,
    C: MailConnector,
    A: AccountService,
{
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        solver: &'a ChallengeSolver<B>,
        fetcher: &'a MailboxCodeFetcher<C>,
        accounts: &'a A,
        directory: &'a ProviderDirectory,
        query: &'a RetrievalQuery,
        challenge: &'a ChallengeTarget,
    ) -> Self {
        Self {
            solver,
            fetcher,
            accounts,
            directory,
            query,
            challenge,
            delivery_wait: DEFAULT_DELIVERY_WAIT,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Sets how long to wait for the code mail before reading the mailbox.
    #[must_use]
    pub fn with_delivery_wait(mut self, delivery_wait: Duration) -> Self {
        self.delivery_wait = delivery_wait;
        self
    }

    /// Replaces the sleeper used for the delivery wait.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Runs every stage for `account`, reading the code from `credential`'s mailbox.
    ///
    /// Never fails outright: errors are reported in [`VerificationOutcome::failure`]
    /// next to the partial ledger.
    #[instrument(
        name = "VerificationOrchestrator::run",
        skip_all,
        fields(account = %account.screen_name())
    )]
    pub async fn run(
        &self,
        account: &AccountHandle,
        credential: &MailCredential,
    ) -> VerificationOutcome {
        let mut steps = Vec::with_capacity(5);
        let failure = self.advance(account, credential, &mut steps).await.err();

        match &failure {
            None => info!("Account verified"),
            Some(e) => warn!(error = %e, "Verification stopped"),
        }

        VerificationOutcome {
            username: account.username().to_string(),
            steps,
            failure,
        }
    }

    async fn advance(
        &self,
        account: &AccountHandle,
        credential: &MailCredential,
        steps: &mut Vec<StepRecord>,
    ) -> Result<()> {
        run_stage(
            steps,
            Stage::CheckStatus,
            self.accounts.check_status(account),
            |_| None,
        )
        .await?;

        let solved = run_stage(
            steps,
            Stage::SolveChallenge,
            self.solver
                .solve(&self.challenge.site_key, &self.challenge.page_url),
            |solved| Some(StepPayload::Token(solved.token.clone())),
        )
        .await?;

        run_stage(
            steps,
            Stage::RequestCode,
            self.accounts
                .request_code(account, credential.address(), &solved.token),
            |_| None,
        )
        .await?;

        let code = run_stage(
            steps,
            Stage::FetchCode,
            async {
                let provider = self.directory.lookup(credential.address())?;
                debug!(wait_secs = self.delivery_wait.as_secs(), "Waiting for delivery");
                self.sleeper.sleep(self.delivery_wait).await;
                self.fetcher.fetch(credential, &provider, self.query).await
            },
            |code| Some(StepPayload::Code(code.value.clone())),
        )
        .await?;

        run_stage(
            steps,
            Stage::SubmitCode,
            async {
                match self.accounts.submit_code(account, &code.value).await? {
                    CodeVerdict::Verified => Ok(()),
                    CodeVerdict::Rejected(reason) => Err(Error::CodeRejected { reason }),
                }
            },
            |_| None,
        )
        .await
    }
}

async fn run_stage<T, F>(
    steps: &mut Vec<StepRecord>,
    stage: Stage,
    work: F,
    payload: impl FnOnce(&T) -> Option<StepPayload>,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let index = steps.len();
    steps.push(StepRecord::pending(stage));
    debug!(stage = %stage, "Stage started");

    let result = work.await;
    let record = &mut steps[index];
    match &result {
        Ok(value) => {
            record.status = StepStatus::Completed;
            record.payload = payload(value);
            info!(stage = %stage, "Stage completed");
        }
        Err(e) => {
            record.status = StepStatus::Failed;
            record.detail = Some(e.to_string());
            warn!(stage = %stage, error = %e, "Stage failed");
        }
    }

    result
}
