//! HTTP-style request/response adapter over the core components.
//!
//! The adapter owns every envelope concern: CORS pre-flight, method checks, JSON body
//! parsing and mapping [`Error`]s to status codes. The core types never see any of it.
//! It is transport-agnostic; hosting code converts its own request type into a
//! [`GatewayRequest`] and writes the [`GatewayResponse`] back.

use crate::account::{AccountService, HttpAccountService};
use crate::config::{ChallengeTarget, ServiceConfig};
use crate::credential::{mask_email, AccountHandle, MailCredential};
use crate::error::{Error, ErrorCategory, Result};
use crate::fetcher::{MailConnector, MailboxCodeFetcher, RetrievalQuery};
use crate::orchestrator::{VerificationOrchestrator, DEFAULT_DELIVERY_WAIT};
use crate::providers::ProviderDirectory;
use crate::session::ImapConnector;
use crate::solver::{ChallengeSolver, Sleeper, SolverBackend, TokioSleeper};
use crate::solving_service::HttpSolverBackend;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const ACCOUNT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRequest {
    /// HTTP method, e.g. `POST`.
    pub method: String,
    /// Raw body, if any.
    pub body: Option<String>,
}

impl GatewayRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(method: impl Into<String>, body: Option<String>) -> Self {
        Self {
            method: method.into(),
            body,
        }
    }

    /// A `POST` with the given body.
    #[must_use]
    pub fn post(body: impl Into<String>) -> Self {
        Self::new("POST", Some(body.into()))
    }

    /// A CORS pre-flight request.
    #[must_use]
    pub fn preflight() -> Self {
        Self::new("OPTIONS", None)
    }
}

/// An outgoing response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(&'static str, String)>,
    /// Response body; empty for pre-flight.
    pub body: String,
}

impl GatewayResponse {
    fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            headers: vec![
                ("Content-Type", "application/json".to_string()),
                ("Access-Control-Allow-Origin", "*".to_string()),
            ],
            body: body.to_string(),
        }
    }

    fn preflight() -> Self {
        Self {
            status: 200,
            headers: vec![
                ("Access-Control-Allow-Origin", "*".to_string()),
                ("Access-Control-Allow-Methods", "POST, OPTIONS".to_string()),
                ("Access-Control-Allow-Headers", "Content-Type".to_string()),
                ("Access-Control-Max-Age", "86400".to_string()),
            ],
            body: String::new(),
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, &json!({ "error": message.into() }))
    }

    /// Returns the first header with this name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Parses the body as JSON; `None` for the empty pre-flight body.
    #[must_use]
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FetchCodeRequest {
    email: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SolveChallengeRequest {
    sitekey: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RequestCodeRequest {
    username: String,
    #[serde(rename = "authToken")]
    auth_token: String,
    email: String,
    #[serde(rename = "challengeToken")]
    challenge_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VerifyRequest {
    username: String,
    #[serde(rename = "authToken")]
    auth_token: String,
    email: String,
    #[serde(rename = "emailPassword")]
    email_password: String,
}

/// Handles pre-flight and method checks, then decodes the JSON body.
fn open_envelope<T: DeserializeOwned>(
    request: &GatewayRequest,
) -> std::result::Result<T, GatewayResponse> {
    if request.method.eq_ignore_ascii_case("OPTIONS") {
        return Err(GatewayResponse::preflight());
    }
    if !request.method.eq_ignore_ascii_case("POST") {
        return Err(GatewayResponse::error(405, "Method not allowed"));
    }

    let body = request
        .body
        .as_deref()
        .map(str::trim)
        .filter(|body| !body.is_empty())
        .unwrap_or("{}");

    serde_json::from_str(body).map_err(|e| {
        debug!(error = %e, "Rejecting unparseable body");
        GatewayResponse::error(400, format!("Invalid JSON body: {e}"))
    })
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Maps a core error to a response.
fn error_response(err: &Error) -> GatewayResponse {
    match err {
        Error::UnsupportedProvider(unsupported) => GatewayResponse::json(
            400,
            &json!({
                "error": format!("Unsupported email provider: {}", unsupported.domain),
                "supported": unsupported.supported,
            }),
        ),
        Error::AuthenticationFailed { hint, .. } => GatewayResponse::json(
            401,
            &json!({
                "error": err.to_string(),
                "hint": hint,
            }),
        ),
        Error::SolveTimeout { .. } => GatewayResponse::error(408, err.to_string()),
        _ => {
            let status = match err.category() {
                ErrorCategory::InvalidRequest | ErrorCategory::Solver => 400,
                ErrorCategory::NotFound => 404,
                _ => 500,
            };
            GatewayResponse::error(status, err.to_string())
        }
    }
}

/// Request handlers for the four endpoints.
pub struct Gateway<B, C, A> {
    solver: Option<ChallengeSolver<B>>,
    fetcher: MailboxCodeFetcher<C>,
    accounts: Option<A>,
    directory: ProviderDirectory,
    query: RetrievalQuery,
    challenge: ChallengeTarget,
    delivery_wait: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl<B, C, A> std::fmt::Debug for Gateway<B, C, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("solver_configured", &self.solver.is_some())
            .field("accounts_configured", &self.accounts.is_some())
            .field("providers", &self.directory.len())
            .field("query", &self.query)
            .field("challenge", &self.challenge)
            .finish_non_exhaustive()
    }
}

impl Gateway<HttpSolverBackend, ImapConnector, HttpAccountService> {
    /// Builds a gateway backed by the real mail, solving and account services.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Misconfiguration`] if no sender is configured, or
    /// [`Error::Transport`] if an HTTP client cannot be built.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let solver = config
            .solver
            .as_ref()
            .map(|solver_config| {
                HttpSolverBackend::new(solver_config)
                    .map(|backend| ChallengeSolver::from_config(backend, solver_config))
            })
            .transpose()?;

        let accounts = config
            .account_service_url
            .as_ref()
            .map(|url| HttpAccountService::new(url.as_str(), ACCOUNT_REQUEST_TIMEOUT))
            .transpose()?;

        let mut query = RetrievalQuery::from_senders(&config.senders)?;
        if let Some(max_age) = config.max_age {
            query = query.with_max_age(max_age);
        }

        let mut gateway = Self::new(
            MailboxCodeFetcher::new(ImapConnector::new(config.fetcher.clone())),
            ProviderDirectory::with_defaults(),
            query,
        )
        .with_challenge(config.challenge.clone())
        .with_delivery_wait(config.delivery_wait);
        gateway.solver = solver;
        gateway.accounts = accounts;

        Ok(gateway)
    }
}

impl<B, C, A> Gateway<B, C, A>
where
    B: SolverBackend,
    C: MailConnector,
    A: AccountService,
{
    /// Creates a gateway with mailbox access only. Solving and verification answer
    /// "not configured" until [`with_solver`](Self::with_solver) and
    /// [`with_accounts`](Self::with_accounts) are called.
    #[must_use]
    pub fn new(
        fetcher: MailboxCodeFetcher<C>,
        directory: ProviderDirectory,
        query: RetrievalQuery,
    ) -> Self {
        Self {
            solver: None,
            fetcher,
            accounts: None,
            directory,
            query,
            challenge: ChallengeTarget::default(),
            delivery_wait: DEFAULT_DELIVERY_WAIT,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Enables the solve-challenge endpoint and the solving stage of verification.
    #[must_use]
    pub fn with_solver(mut self, solver: ChallengeSolver<B>) -> Self {
        self.solver = Some(solver);
        self
    }

    /// Enables the verify endpoint.
    #[must_use]
    pub fn with_accounts(mut self, accounts: A) -> Self {
        self.accounts = Some(accounts);
        self
    }

    /// Sets the challenge used when a request names none.
    #[must_use]
    pub fn with_challenge(mut self, challenge: ChallengeTarget) -> Self {
        self.challenge = challenge;
        self
    }

    /// Sets the wait between requesting and fetching a code.
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

    /// `fetch-code`: `{email, password}` -> `{code, email, subject, from, success}`.
    #[instrument(name = "Gateway::fetch_code", skip_all, fields(method = %request.method))]
    pub async fn fetch_code(&self, request: GatewayRequest) -> GatewayResponse {
        let body: FetchCodeRequest = match open_envelope(&request) {
            Ok(body) => body,
            Err(response) => return response,
        };

        if is_blank(&body.email) || is_blank(&body.password) {
            return GatewayResponse::error(400, "Email and password required");
        }

        let outcome = async {
            let credential = MailCredential::new(body.email.trim(), body.password.as_str())?;
            let provider = self.directory.lookup(credential.address())?;
            self.fetcher.fetch(&credential, &provider, &self.query).await
        }
        .await;

        match outcome {
            Ok(code) => GatewayResponse::json(
                200,
                &json!({
                    "code": code.value,
                    "email": body.email.trim(),
                    "subject": code.source_subject,
                    "from": code.source_from,
                    "success": true,
                }),
            ),
            Err(e) => {
                warn!(email = %mask_email(&body.email), error = %e, "fetch-code failed");
                error_response(&e)
            }
        }
    }

    /// `solve-challenge`: `{sitekey?, url?}` -> `{token, success, solveTime}`.
    #[instrument(name = "Gateway::solve_challenge", skip_all, fields(method = %request.method))]
    pub async fn solve_challenge(&self, request: GatewayRequest) -> GatewayResponse {
        let body: SolveChallengeRequest = match open_envelope(&request) {
            Ok(body) => body,
            Err(response) => return response,
        };

        let Some(solver) = &self.solver else {
            return error_response(&Error::misconfiguration("CAPTCHA_API_KEY not configured"));
        };

        let site_key = body
            .sitekey
            .filter(|value| !is_blank(value))
            .unwrap_or_else(|| self.challenge.site_key.clone());
        let page_url = body
            .url
            .filter(|value| !is_blank(value))
            .unwrap_or_else(|| self.challenge.page_url.clone());

        match solver.solve(&site_key, &page_url).await {
            Ok(solved) => GatewayResponse::json(
                200,
                &json!({
                    "token": solved.token,
                    "success": true,
                    "solveTime": solved.solve_time.as_secs(),
                }),
            ),
            Err(e) => {
                warn!(error = %e, "solve-challenge failed");
                error_response(&e)
            }
        }
    }

    /// `request-code`: `{username, authToken, email, challengeToken?}` ->
    /// `{success, message, username, email, status}`.
    #[instrument(name = "Gateway::request_code", skip_all, fields(method = %request.method))]
    pub async fn request_code(&self, request: GatewayRequest) -> GatewayResponse {
        let body: RequestCodeRequest = match open_envelope(&request) {
            Ok(body) => body,
            Err(response) => return response,
        };

        if [&body.username, &body.auth_token, &body.email]
            .iter()
            .any(|value| is_blank(value))
        {
            return GatewayResponse::error(400, "Username, authToken, and email required");
        }

        let Some(accounts) = &self.accounts else {
            return error_response(&Error::misconfiguration(
                "ACCOUNT_SERVICE_URL not configured",
            ));
        };

        let email = body.email.trim();
        let outcome = async {
            let account = AccountHandle::new(body.username.trim(), body.auth_token.as_str())?;
            let challenge_token = body.challenge_token.as_deref().unwrap_or_default().trim();
            accounts
                .request_code(&account, email, challenge_token)
                .await
        }
        .await;

        match outcome {
            Ok(()) => GatewayResponse::json(
                200,
                &json!({
                    "success": true,
                    "message": format!("Verification code sent to {email}"),
                    "username": body.username.trim(),
                    "email": email,
                    "status": "pending_verification",
                }),
            ),
            Err(e) => {
                warn!(email = %mask_email(email), error = %e, "request-code failed");
                error_response(&e)
            }
        }
    }

    /// `verify`: `{username, authToken, email, emailPassword}` -> step ledger.
    #[instrument(name = "Gateway::verify", skip_all, fields(method = %request.method))]
    pub async fn verify(&self, request: GatewayRequest) -> GatewayResponse {
        let body: VerifyRequest = match open_envelope(&request) {
            Ok(body) => body,
            Err(response) => return response,
        };

        if [
            &body.username,
            &body.auth_token,
            &body.email,
            &body.email_password,
        ]
        .iter()
        .any(|value| is_blank(value))
        {
            return GatewayResponse::error(400, "Missing required fields");
        }

        let inputs = AccountHandle::new(body.username.trim(), body.auth_token.as_str()).and_then(
            |account| {
                MailCredential::new(body.email.trim(), body.email_password.as_str())
                    .map(|credential| (account, credential))
            },
        );
        let (account, credential) = match inputs {
            Ok(inputs) => inputs,
            Err(e) => return error_response(&e),
        };

        let (Some(solver), Some(accounts)) = (&self.solver, &self.accounts) else {
            let missing = if self.solver.is_none() {
                "CAPTCHA_API_KEY not configured"
            } else {
                "ACCOUNT_SERVICE_URL not configured"
            };
            return GatewayResponse::json(
                500,
                &json!({
                    "error": Error::misconfiguration(missing).to_string(),
                    "steps": [],
                }),
            );
        };

        let outcome = VerificationOrchestrator::new(
            solver,
            &self.fetcher,
            accounts,
            &self.directory,
            &self.query,
            &self.challenge,
        )
        .with_delivery_wait(self.delivery_wait)
        .with_sleeper(Arc::clone(&self.sleeper))
        .run(&account, &credential)
        .await;

        match &outcome.failure {
            None => GatewayResponse::json(
                200,
                &json!({
                    "success": true,
                    "verified": true,
                    "username": outcome.username,
                    "steps": outcome.steps,
                    "message": "Account verified successfully",
                }),
            ),
            Some(e) => GatewayResponse::json(
                500,
                &json!({
                    "error": format!("Verification failed: {e}"),
                    "steps": outcome.steps,
                }),
            ),
        }
    }
}
