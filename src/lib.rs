//! # inbox-verify
//!
//! Async account-verification workflow: solve a challenge, have a code mailed, read it
//! back over IMAP and submit it.
//!
//! This crate provides:
//! - A directory of known IMAP providers keyed by email domain
//! - Verification code extraction from message bodies
//! - A read-only mailbox fetcher that always logs out, even when cancelled
//! - A bounded poll loop against a remote challenge-solving service
//! - An orchestrator that runs the whole workflow and keeps a step ledger
//! - A transport-agnostic request/response gateway over all of the above, including a
//!   standalone endpoint that only asks the site to mail a code
//!
//! ## Fetching a Code
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
//! println!("Got code: {}", code.value);
//! # Ok(())
//! # }
//! ```
//!
//! ## Solving a Challenge
//!
//! ```no_run
//! use inbox_verify::{ChallengeSolver, HttpSolverBackend, SolverConfig};
//!
//! # async fn example() -> inbox_verify::Result<()> {
//! let config = SolverConfig::builder().api_key("service-key").build()?;
//! let solver = ChallengeSolver::from_config(HttpSolverBackend::new(&config)?, &config);
//!
//! let solved = solver.solve("site-key", "https://example.com/login").await?;
//! println!("token after {:?}", solved.solve_time);
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Extraction Rules
//!
//! ```
//! use inbox_verify::extractor::{CodeExtractor, Matcher, RegexMatcher};
//!
//! let rules: Vec<Box<dyn Matcher>> = vec![
//!     Box::new(RegexMatcher::new(r"PIN:\s*([0-9]{6})").unwrap()),
//! ];
//! let extractor = CodeExtractor::from_matchers(rules);
//! assert_eq!(extractor.extract("Your PIN: 123456"), Some("123456"));
//! ```
//!
//! ## Error Handling
//!
//! All errors implement `std::error::Error` and provide context. Use [`Error::category`]
//! to decide what to tell the user and [`Error::is_retryable`] to decide whether to try
//! again later:
//!
//! ```
//! use inbox_verify::{Error, ErrorCategory};
//!
//! fn describe(error: &Error) -> &'static str {
//!     match error.category() {
//!         ErrorCategory::Authentication => "check the mailbox password",
//!         ErrorCategory::NotFound if error.is_retryable() => "no code yet, try again",
//!         _ => "verification failed",
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation. Network-facing operations emit spans
//! named `Type::method`, for example `MailboxCodeFetcher::fetch`,
//! `ChallengeSolver::solve`, `VerificationOrchestrator::run` and
//! `connection::establish_tls`. Email addresses are masked in span fields and secrets
//! never appear.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod account;
pub mod config;
pub mod credential;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod gateway;
pub mod orchestrator;
pub mod providers;
pub mod proxy;
pub mod solver;
pub mod solving_service;

// Internal modules
mod connection;
mod parser;
mod session;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for ergonomic API
pub use account::{AccountService, CodeVerdict, HttpAccountService};
pub use config::{
    ChallengeTarget, FetcherConfig, FetcherConfigBuilder, ServiceConfig, SolverConfig,
    SolverConfigBuilder, TimeoutConfig,
};
pub use credential::{AccountHandle, MailCredential};
pub use email_address::EmailAddress;
pub use error::{Error, ErrorCategory, Result};
pub use extractor::CodeExtractor;
pub use fetcher::{ExtractedCode, MailConnector, MailSession, MailboxCodeFetcher, RetrievalQuery};
pub use gateway::{Gateway, GatewayRequest, GatewayResponse};
pub use orchestrator::{
    Stage, StepPayload, StepRecord, StepStatus, VerificationOrchestrator, VerificationOutcome,
};
pub use parser::SkippedPart;
pub use providers::{ProviderDirectory, ProviderEntry, UnsupportedProvider};
pub use proxy::{ProxyAuth, Socks5Proxy};
pub use session::{ImapConnector, ImapMailSession};
pub use solver::{
    ChallengeJob, ChallengeSolver, JobState, PollReply, Sleeper, SolvedChallenge, SolverBackend,
    SubmitReply, TokioSleeper,
};
pub use solving_service::HttpSolverBackend;
