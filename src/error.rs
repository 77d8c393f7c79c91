//! Error types for the inbox-verify crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Errors are grouped by [`ErrorCategory`]; see [`Error::is_retryable`] for which ones a
//! caller may reasonably try again. Nothing in this crate retries on its own except the
//! challenge poll loop.

use crate::providers::UnsupportedProvider;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Hint attached to [`Error::AuthenticationFailed`].
pub const APP_PASSWORD_HINT: &str =
    "some providers (Gmail, Yahoo, iCloud, Outlook) require an app-specific password instead of the account password";

/// Errors that can occur while verifying an account.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Request / configuration errors (NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// Missing or malformed request fields.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// Invalid email address format.
    #[error("invalid email format: {email}")]
    InvalidEmailFormat {
        /// The invalid email address.
        email: String,
    },

    /// The email domain has no known IMAP server.
    #[error(transparent)]
    UnsupportedProvider(#[from] UnsupportedProvider),

    /// A required service credential or setting is missing.
    #[error("not configured: {message}")]
    Misconfiguration {
        /// Description of the missing setting.
        message: String,
    },

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Network / transport errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to connect via SOCKS5 proxy.
    #[error("failed to connect via SOCKS5 proxy {proxy_host} to {target}")]
    Socks5Connect {
        /// The SOCKS5 proxy hostname.
        proxy_host: String,
        /// The target address.
        target: String,
        /// The underlying SOCKS5 error.
        #[source]
        source: tokio_socks::Error,
    },

    /// HTTP request to an outbound service failed.
    #[error("request to {service} failed")]
    Transport {
        /// Which service was being called.
        service: &'static str,
        /// The underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Timeout errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Authentication timeout.
    #[error("authentication timeout for {email} after {timeout:?}")]
    AuthTimeout {
        /// The email address used for authentication.
        email: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Mailbox selection timeout.
    #[error("mailbox selection timeout for '{mailbox}' after {timeout:?}")]
    SelectTimeout {
        /// The mailbox name.
        mailbox: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// UID search timeout.
    #[error("mailbox search timeout after {timeout:?}")]
    SearchTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Message fetch timeout.
    #[error("message fetch timeout for UID {uid} after {timeout:?}")]
    FetchTimeout {
        /// The UID being fetched.
        uid: u32,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Logout timeout (not critical).
    #[error("logout timeout after {timeout:?}")]
    LogoutTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Mailbox errors
    // ─────────────────────────────────────────────────────────────────────────
    /// IMAP login was refused. Never retried automatically.
    #[error("email authentication failed for {email}: {source}")]
    AuthenticationFailed {
        /// The email address used for login.
        email: String,
        /// Advice for the user.
        hint: &'static str,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Failed to select mailbox.
    #[error("failed to select mailbox '{mailbox}'")]
    SelectMailbox {
        /// The mailbox name.
        mailbox: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP search failed.
    #[error("IMAP search failed")]
    ImapSearch {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP fetch failed.
    #[error("IMAP fetch failed for UID {uid}")]
    ImapFetch {
        /// The UID that failed.
        uid: u32,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Failed to read a message from the fetch stream.
    #[error("failed to fetch message from stream")]
    FetchMessage {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP logout failed.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Failed to parse email message.
    #[error("failed to parse email")]
    ParseEmail {
        /// The underlying parse error.
        #[source]
        source: mailparse::MailParseError,
    },

    /// The search matched no message.
    #[error("no verification emails found from the expected senders")]
    NoMatchingMessage,

    /// The newest matching message contained no code.
    #[error("verification code not found in email (UID {uid})")]
    CodeNotFound {
        /// UID of the message that was inspected.
        uid: u32,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Solving service / account service outcomes
    // ─────────────────────────────────────────────────────────────────────────
    /// The solving service refused the job.
    #[error("challenge submission failed: {reason}")]
    SubmissionRejected {
        /// Reason string reported by the service.
        reason: String,
    },

    /// The solving service gave up on the job.
    #[error("challenge solving failed: {reason}")]
    SolveFailed {
        /// Reason string reported by the service.
        reason: String,
    },

    /// Poll attempts exhausted without a verdict.
    #[error("challenge solving timeout after {attempts} attempts ({waited:?})")]
    SolveTimeout {
        /// Number of polls made.
        attempts: u32,
        /// Total time spent waiting between polls.
        waited: Duration,
    },

    /// An outbound service answered with something that is not its protocol.
    #[error("malformed reply from {service}: {message}")]
    MalformedReply {
        /// Which service replied.
        service: &'static str,
        /// What was wrong.
        message: String,
    },

    /// The account service refused an operation.
    #[error("account service {operation} failed: {reason}")]
    AccountService {
        /// Which operation failed.
        operation: &'static str,
        /// Reason reported by the service.
        reason: String,
    },

    /// The account service rejected the submitted code.
    #[error("verification code rejected: {reason}")]
    CodeRejected {
        /// Reason reported by the service.
        reason: String,
    },
}

impl Error {
    /// Shorthand for [`Error::InvalidRequest`].
    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        Error::InvalidRequest {
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::Misconfiguration`].
    pub(crate) fn misconfiguration(message: impl Into<String>) -> Self {
        Error::Misconfiguration {
            message: message.into(),
        }
    }

    /// Returns `true` if this error represents a transient failure that a caller
    /// might retry after a delay.
    ///
    /// Authentication failures are never retryable: repeated failed logins risk
    /// locking the mailbox account.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::Socks5Connect { .. }
            | Error::Transport { .. }
            | Error::ConnectTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::NoMatchingMessage
            | Error::CodeNotFound { .. } => true,

            Error::InvalidRequest { .. }
            | Error::InvalidEmailFormat { .. }
            | Error::UnsupportedProvider(_)
            | Error::Misconfiguration { .. }
            | Error::InvalidDnsName { .. }
            | Error::AuthTimeout { .. }
            | Error::LogoutTimeout { .. }
            | Error::AuthenticationFailed { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::FetchMessage { .. }
            | Error::ImapLogout { .. }
            | Error::ParseEmail { .. }
            | Error::SubmissionRejected { .. }
            | Error::SolveFailed { .. }
            | Error::SolveTimeout { .. }
            | Error::MalformedReply { .. }
            | Error::AccountService { .. }
            | Error::CodeRejected { .. } => false,
        }
    }

    /// Returns the error category for logging and status mapping.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidRequest { .. } | Error::InvalidEmailFormat { .. } => {
                ErrorCategory::InvalidRequest
            }

            Error::UnsupportedProvider(_)
            | Error::Misconfiguration { .. }
            | Error::InvalidDnsName { .. } => ErrorCategory::Configuration,

            Error::AuthenticationFailed { .. } => ErrorCategory::Authentication,

            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::Socks5Connect { .. }
            | Error::Transport { .. } => ErrorCategory::Network,

            Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::LogoutTimeout { .. } => ErrorCategory::Timeout,

            Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::FetchMessage { .. }
            | Error::ImapLogout { .. }
            | Error::MalformedReply { .. }
            | Error::AccountService { .. } => ErrorCategory::Protocol,

            Error::ParseEmail { .. } => ErrorCategory::Parse,

            Error::NoMatchingMessage | Error::CodeNotFound { .. } => ErrorCategory::NotFound,

            Error::SubmissionRejected { .. }
            | Error::SolveFailed { .. }
            | Error::SolveTimeout { .. }
            | Error::CodeRejected { .. } => ErrorCategory::Solver,
        }
    }
}

/// Error categories for logging and response mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or malformed input.
    InvalidRequest,
    /// Configuration errors, including unsupported providers.
    Configuration,
    /// Mailbox credentials refused.
    Authentication,
    /// Network connectivity errors.
    Network,
    /// Timeout errors.
    Timeout,
    /// IMAP or service protocol errors.
    Protocol,
    /// Email parsing errors.
    Parse,
    /// No message or no code found.
    NotFound,
    /// Verdicts from the solving or account service.
    Solver,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::InvalidRequest => write!(f, "invalid_request"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Authentication => write!(f, "authentication"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Parse => write!(f, "parse"),
            ErrorCategory::NotFound => write!(f, "not_found"),
            ErrorCategory::Solver => write!(f, "solver"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imap_io_error() -> async_imap::error::Error {
        async_imap::error::Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ))
    }

    #[test]
    fn test_retryable_classification() {
        let err = Error::InvalidEmailFormat {
            email: "bad".into(),
        };
        assert!(!err.is_retryable());

        let err = Error::TcpConnect {
            target: "imap.example.com:993".into(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(err.is_retryable());

        // Repeated logins risk lockout
        let err = Error::AuthenticationFailed {
            email: "user@gmail.com".into(),
            hint: APP_PASSWORD_HINT,
            source: imap_io_error(),
        };
        assert!(!err.is_retryable());

        // Mail may simply not have arrived yet
        assert!(Error::NoMatchingMessage.is_retryable());

        let err = Error::SolveTimeout {
            attempts: 20,
            waited: Duration::from_secs(100),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            Error::invalid_request("email and password required").category(),
            ErrorCategory::InvalidRequest
        );

        let err = Error::ConnectTimeout {
            target: "imap.example.com:993".into(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(err.category(), ErrorCategory::Timeout);

        let err = Error::ImapSearch {
            source: imap_io_error(),
        };
        assert_eq!(err.category(), ErrorCategory::Protocol);

        assert_eq!(
            Error::CodeNotFound { uid: 7 }.category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            Error::misconfiguration("CAPTCHA_API_KEY").category(),
            ErrorCategory::Configuration
        );
    }

    #[test]
    fn test_authentication_message_carries_address() {
        let err = Error::AuthenticationFailed {
            email: "user@yahoo.com".into(),
            hint: APP_PASSWORD_HINT,
            source: imap_io_error(),
        };
        assert!(err.to_string().contains("user@yahoo.com"));
    }
}
