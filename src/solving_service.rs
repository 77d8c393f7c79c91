//! HTTP client for in.php/res.php style challenge-solving services.

use crate::config::SolverConfig;
use crate::error::{Error, Result};
use crate::solver::{PollReply, SolverBackend, SubmitReply};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};

const SERVICE: &str = "solving service";

/// Status value the service uses while a job is still in progress.
pub const NOT_READY: &str = "CAPCHA_NOT_READY";

/// `{"status": 1, "request": "..."}` envelope shared by both endpoints.
#[derive(Debug, Deserialize)]
struct ServiceReply {
    status: i64,
    #[serde(default)]
    request: String,
}

/// [`SolverBackend`] talking to a remote solving service over HTTPS.
pub struct HttpSolverBackend {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

impl std::fmt::Debug for HttpSolverBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSolverBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpSolverBackend {
    /// Creates a backend from solver settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the HTTP client cannot be built.
    pub fn new(config: &SolverConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| Error::Transport {
                service: SERVICE,
                source,
            })?;

        Ok(Self {
            client,
            api_key: SecretString::from(config.api_key().to_owned()),
            base_url: config.service_url.clone(),
        })
    }

    async fn read_reply(response: reqwest::Response) -> Result<ServiceReply> {
        let text = response.text().await.map_err(|source| Error::Transport {
            service: SERVICE,
            source,
        })?;
        parse_reply(&text)
    }
}

#[async_trait]
impl SolverBackend for HttpSolverBackend {
    #[instrument(name = "HttpSolverBackend::submit", skip_all, fields(page_url = %page_url))]
    async fn submit(&self, site_key: &str, page_url: &str) -> Result<SubmitReply> {
        let response = self
            .client
            .post(format!("{}/in.php", self.base_url))
            .form(&[
                ("key", self.api_key.expose_secret()),
                ("method", "userrecaptcha"),
                ("googlekey", site_key),
                ("pageurl", page_url),
                ("json", "1"),
            ])
            .send()
            .await
            .map_err(|source| Error::Transport {
                service: SERVICE,
                source,
            })?;

        let reply = Self::read_reply(response).await?;
        debug!(status = reply.status, "Submission reply");
        Ok(interpret_submit(reply))
    }

    #[instrument(name = "HttpSolverBackend::poll", skip_all, fields(job_id = %job_id))]
    async fn poll(&self, job_id: &str) -> Result<PollReply> {
        let response = self
            .client
            .get(format!("{}/res.php", self.base_url))
            .query(&[
                ("key", self.api_key.expose_secret()),
                ("action", "get"),
                ("id", job_id),
                ("json", "1"),
            ])
            .send()
            .await
            .map_err(|source| Error::Transport {
                service: SERVICE,
                source,
            })?;

        let reply = Self::read_reply(response).await?;
        debug!(status = reply.status, "Poll reply");
        Ok(interpret_poll(reply))
    }
}

fn parse_reply(text: &str) -> Result<ServiceReply> {
    serde_json::from_str(text).map_err(|e| Error::MalformedReply {
        service: SERVICE,
        message: format!("{e}: {}", truncate(text, 120)),
    })
}

fn interpret_submit(reply: ServiceReply) -> SubmitReply {
    if reply.status == 1 {
        SubmitReply::Accepted(reply.request)
    } else {
        SubmitReply::Rejected(reply.request)
    }
}

fn interpret_poll(reply: ServiceReply) -> PollReply {
    if reply.status == 1 {
        PollReply::Solved(reply.request)
    } else if reply.request == NOT_READY {
        PollReply::NotReady
    } else {
        PollReply::Failed(reply.request)
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_accepted() {
        let reply = parse_reply(r#"{"status":1,"request":"2122988149"}"#).unwrap();
        assert_eq!(
            interpret_submit(reply),
            SubmitReply::Accepted("2122988149".into())
        );
    }

    #[test]
    fn test_submit_rejected_carries_reason() {
        let reply = parse_reply(r#"{"status":0,"request":"ERROR_ZERO_BALANCE"}"#).unwrap();
        assert_eq!(
            interpret_submit(reply),
            SubmitReply::Rejected("ERROR_ZERO_BALANCE".into())
        );
    }

    #[test]
    fn test_poll_outcomes() {
        let not_ready = parse_reply(r#"{"status":0,"request":"CAPCHA_NOT_READY"}"#).unwrap();
        assert_eq!(interpret_poll(not_ready), PollReply::NotReady);

        let solved = parse_reply(r#"{"status":1,"request":"03AGdBq2"}"#).unwrap();
        assert_eq!(interpret_poll(solved), PollReply::Solved("03AGdBq2".into()));

        let failed = parse_reply(r#"{"status":0,"request":"ERROR_CAPTCHA_UNSOLVABLE"}"#).unwrap();
        assert_eq!(
            interpret_poll(failed),
            PollReply::Failed("ERROR_CAPTCHA_UNSOLVABLE".into())
        );
    }

    #[test]
    fn test_non_json_reply_is_malformed() {
        let err = parse_reply("OK|2122988149").unwrap_err();
        assert!(matches!(err, Error::MalformedReply { .. }));
    }

    #[test]
    fn test_backend_debug_hides_key() {
        let config = SolverConfig::builder()
            .api_key("super-secret-key")
            .build()
            .unwrap();
        let backend = HttpSolverBackend::new(&config).unwrap();
        let debug = format!("{backend:?}");
        assert!(!debug.contains("super-secret-key"));
        assert!(debug.contains("2captcha.com"));
    }
}
