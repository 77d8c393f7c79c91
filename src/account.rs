//! The remote account service that sends and checks verification codes.

use crate::credential::{mask_email, AccountHandle};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const SERVICE: &str = "account service";

/// Answer to a submitted verification code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeVerdict {
    /// The account is now verified.
    Verified,
    /// The code was not accepted.
    Rejected(String),
}

/// Operations the verification workflow needs from the account's home site.
///
/// Both requests are safe for the caller to retry; nothing here retries on its own.
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Confirms the account exists and the token is accepted.
    async fn check_status(&self, account: &AccountHandle) -> Result<()>;

    /// Asks the site to mail a verification code to `email`.
    ///
    /// An empty `challenge_token` means the caller has no solved challenge to attach.
    async fn request_code(
        &self,
        account: &AccountHandle,
        email: &str,
        challenge_token: &str,
    ) -> Result<()>;

    /// Submits the code read from the mailbox.
    async fn submit_code(&self, account: &AccountHandle, code: &str) -> Result<CodeVerdict>;
}

#[derive(Debug, Serialize)]
struct CodeRequest<'a> {
    email: &'a str,
    screen_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    challenge_token: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CodeSubmission<'a> {
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerificationReply {
    verified: bool,
    #[serde(default)]
    reason: Option<String>,
}

impl From<VerificationReply> for CodeVerdict {
    fn from(reply: VerificationReply) -> Self {
        if reply.verified {
            Self::Verified
        } else {
            Self::Rejected(
                reply
                    .reason
                    .unwrap_or_else(|| "code not accepted".to_string()),
            )
        }
    }
}

/// [`AccountService`] over a bearer-authenticated JSON API.
///
/// Endpoints, relative to the base URL:
/// - `GET accounts/{name}/status`
/// - `POST accounts/{name}/verification-code` with `{email, screen_name, challenge_token}`
/// - `POST accounts/{name}/verification` with `{code}`, answering `{verified, reason?}`
#[derive(Debug, Clone)]
pub struct HttpAccountService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAccountService {
    /// Creates a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|source| Error::Transport {
                service: SERVICE,
                source,
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, account: &AccountHandle, path: &str) -> String {
        format!(
            "{}/accounts/{}/{path}",
            self.base_url,
            account.screen_name()
        )
    }

    async fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
        account: &AccountHandle,
    ) -> Result<reqwest::Response> {
        let response = request
            .bearer_auth(account.auth_token())
            .send()
            .await
            .map_err(|source| Error::Transport {
                service: SERVICE,
                source,
            })?;

        let status = response.status();
        debug!(operation, status = status.as_u16(), "Account service replied");

        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::AccountService {
                operation,
                reason: if body.is_empty() {
                    status.to_string()
                } else {
                    format!("{status}: {body}")
                },
            })
        }
    }
}

#[async_trait]
impl AccountService for HttpAccountService {
    #[instrument(
        name = "HttpAccountService::check_status",
        skip_all,
        fields(account = %account.screen_name())
    )]
    async fn check_status(&self, account: &AccountHandle) -> Result<()> {
        let request = self.client.get(self.endpoint(account, "status"));
        self.send("check_status", request, account).await?;
        Ok(())
    }

    #[instrument(
        name = "HttpAccountService::request_code",
        skip_all,
        fields(account = %account.screen_name(), email = %mask_email(email))
    )]
    async fn request_code(
        &self,
        account: &AccountHandle,
        email: &str,
        challenge_token: &str,
    ) -> Result<()> {
        let request = self
            .client
            .post(self.endpoint(account, "verification-code"))
            .json(&CodeRequest {
                email,
                screen_name: account.screen_name(),
                challenge_token: Some(challenge_token).filter(|token| !token.is_empty()),
            });
        self.send("request_code", request, account).await?;
        Ok(())
    }

    #[instrument(
        name = "HttpAccountService::submit_code",
        skip_all,
        fields(account = %account.screen_name())
    )]
    async fn submit_code(&self, account: &AccountHandle, code: &str) -> Result<CodeVerdict> {
        let request = self
            .client
            .post(self.endpoint(account, "verification"))
            .json(&CodeSubmission { code });
        let response = self.send("submit_code", request, account).await?;

        let text = response.text().await.map_err(|source| Error::Transport {
            service: SERVICE,
            source,
        })?;
        parse_verdict(&text)
    }
}

fn parse_verdict(text: &str) -> Result<CodeVerdict> {
    serde_json::from_str::<VerificationReply>(text)
        .map(CodeVerdict::from)
        .map_err(|e| Error::MalformedReply {
            service: SERVICE,
            message: e.to_string(),
        })
}
