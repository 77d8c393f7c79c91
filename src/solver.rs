//! Challenge solving through a remote solving service.
//!
//! Solving is two-phase: the challenge is submitted once, then the job is polled at a
//! fixed interval for a bounded number of attempts. Each attempt waits first, so a
//! token returned on attempt `n` took `n * interval` to arrive. Waiting goes through a
//! [`Sleeper`] so tests can run the full loop without wall-clock delay.

use crate::config::SolverConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Non-blocking wait used between poll attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspends the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Reply to a challenge submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitReply {
    /// The job was queued under this id.
    Accepted(String),
    /// The service refused the job.
    Rejected(String),
}

/// Reply to a job status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollReply {
    /// Still being worked on.
    NotReady,
    /// Finished with this token.
    Solved(String),
    /// Finished without a token.
    Failed(String),
}

/// A challenge-solving service.
#[async_trait]
pub trait SolverBackend: Send + Sync {
    /// Submits a challenge for the given site key and page.
    async fn submit(&self, site_key: &str, page_url: &str) -> Result<SubmitReply>;

    /// Queries the status of a submitted job.
    async fn poll(&self, job_id: &str) -> Result<PollReply>;
}

/// Lifecycle of a [`ChallengeJob`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Not yet submitted.
    Pending,
    /// Accepted by the service, awaiting a verdict.
    Submitted,
    /// Token received.
    Solved(String),
    /// Rejected at submission or failed while polling.
    Failed(String),
    /// Poll attempts exhausted.
    TimedOut,
}

impl JobState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Solved(_) | Self::Failed(_) | Self::TimedOut)
    }
}

/// One solving attempt. Terminal states never change.
#[derive(Debug, Clone)]
pub struct ChallengeJob {
    site_key: String,
    page_url: String,
    submission_id: Option<String>,
    attempts_made: u32,
    state: JobState,
}

impl ChallengeJob {
    /// Creates a pending job.
    #[must_use]
    pub fn new(site_key: impl Into<String>, page_url: impl Into<String>) -> Self {
        Self {
            site_key: site_key.into(),
            page_url: page_url.into(),
            submission_id: None,
            attempts_made: 0,
            state: JobState::Pending,
        }
    }

    /// Site key of the challenge.
    #[must_use]
    pub fn site_key(&self) -> &str {
        &self.site_key
    }

    /// Page the challenge is embedded in.
    #[must_use]
    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    /// Id assigned by the service once accepted.
    #[must_use]
    pub fn submission_id(&self) -> Option<&str> {
        self.submission_id.as_deref()
    }

    /// Number of polls issued so far.
    #[must_use]
    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Applies a submission reply. Ignored unless the job is pending.
    pub fn record_submission(&mut self, reply: SubmitReply) {
        if self.state != JobState::Pending {
            return;
        }
        match reply {
            SubmitReply::Accepted(id) => {
                self.submission_id = Some(id);
                self.state = JobState::Submitted;
            }
            SubmitReply::Rejected(reason) => self.state = JobState::Failed(reason),
        }
    }

    /// Applies a poll reply. Ignored unless the job is submitted.
    pub fn record_poll(&mut self, reply: PollReply) {
        if self.state != JobState::Submitted {
            return;
        }
        self.attempts_made += 1;
        match reply {
            PollReply::NotReady => {}
            PollReply::Solved(token) => self.state = JobState::Solved(token),
            PollReply::Failed(reason) => self.state = JobState::Failed(reason),
        }
    }

    /// Marks the job timed out. Ignored if already terminal.
    pub fn expire(&mut self) {
        if !self.state.is_terminal() {
            self.state = JobState::TimedOut;
        }
    }
}

/// A solved challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolvedChallenge {
    /// Token to present to the protected site.
    pub token: String,
    /// Polls issued, including the one that returned the token.
    pub attempts: u32,
    /// `attempts * poll_interval`.
    pub solve_time: Duration,
}

/// Submits challenges and polls until solved, failed or out of attempts.
pub struct ChallengeSolver<B> {
    backend: B,
    max_attempts: u32,
    poll_interval: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl<B> std::fmt::Debug for ChallengeSolver<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeSolver")
            .field("max_attempts", &self.max_attempts)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl<B: SolverBackend> ChallengeSolver<B> {
    /// Creates a solver that polls at most `max_attempts` times, `poll_interval` apart.
    #[must_use]
    pub fn new(backend: B, max_attempts: u32, poll_interval: Duration) -> Self {
        Self {
            backend,
            max_attempts,
            poll_interval,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Creates a solver using the attempt and interval settings of `config`.
    #[must_use]
    pub fn from_config(backend: B, config: &SolverConfig) -> Self {
        Self::new(backend, config.max_attempts, config.poll_interval)
    }

    /// Replaces the sleeper.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Upper bound on time spent polling.
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Solves the challenge on `page_url` identified by `site_key`.
    ///
    /// # Errors
    ///
    /// - [`Error::SubmissionRejected`] if the service refuses the job (no polls issued)
    /// - [`Error::SolveFailed`] if the service reports any status other than not-ready
    /// - [`Error::SolveTimeout`] if every attempt reports not-ready
    /// - [`Error::Transport`] / [`Error::MalformedReply`] from the backend, not retried
    #[instrument(
        name = "ChallengeSolver::solve",
        skip_all,
        fields(page_url = %page_url, max_attempts = self.max_attempts)
    )]
    pub async fn solve(&self, site_key: &str, page_url: &str) -> Result<SolvedChallenge> {
        let mut job = ChallengeJob::new(site_key, page_url);

        let reply = self.backend.submit(job.site_key(), job.page_url()).await?;
        job.record_submission(reply);

        if let JobState::Failed(reason) = job.state() {
            warn!(reason = %reason, "Challenge submission rejected");
            return Err(Error::SubmissionRejected {
                reason: reason.clone(),
            });
        }
        let job_id = job.submission_id().unwrap_or_default().to_string();

        debug!(job_id = %job_id, "Challenge submitted");

        while job.attempts_made() < self.max_attempts {
            self.sleeper.sleep(self.poll_interval).await;

            let reply = self.backend.poll(&job_id).await?;
            job.record_poll(reply);

            match job.state() {
                JobState::Solved(token) => {
                    let solve_time = self.poll_interval * job.attempts_made();
                    debug!(
                        attempts = job.attempts_made(),
                        solve_time_secs = solve_time.as_secs(),
                        "Challenge solved"
                    );
                    return Ok(SolvedChallenge {
                        token: token.clone(),
                        attempts: job.attempts_made(),
                        solve_time,
                    });
                }
                JobState::Failed(reason) => {
                    warn!(reason = %reason, attempt = job.attempts_made(), "Challenge failed");
                    return Err(Error::SolveFailed {
                        reason: reason.clone(),
                    });
                }
                _ => debug!(attempt = job.attempts_made(), "Challenge not ready"),
            }
        }

        job.expire();
        warn!(attempts = job.attempts_made(), "Challenge solving timed out");

        Err(Error::SolveTimeout {
            attempts: job.attempts_made(),
            waited: self.poll_interval * job.attempts_made(),
        })
    }
}
