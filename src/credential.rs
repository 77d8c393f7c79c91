//! Credentials supplied per call.
//!
//! Secrets are held as [`SecretString`], which zeroizes on drop and never shows up in
//! `Debug` output. Nothing here is persisted.

use crate::error::{Error, Result};
use email_address::EmailAddress;
use secrecy::{ExposeSecret, SecretString};

/// Mailbox login: address plus password or app password.
#[derive(Clone)]
pub struct MailCredential {
    address: EmailAddress,
    secret: SecretString,
}

impl MailCredential {
    /// Validates the address and wraps the secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEmailFormat`] if the address does not parse, or
    /// [`Error::InvalidRequest`] if the secret is empty.
    pub fn new(address: &str, secret: impl Into<String>) -> Result<Self> {
        let address = EmailAddress::parse_with_options(address, email_address::Options::default())
            .map_err(|_| Error::InvalidEmailFormat {
                email: address.to_string(),
            })?;

        let secret: String = secret.into();
        if secret.is_empty() {
            return Err(Error::invalid_request("email password is required"));
        }

        Ok(Self {
            address,
            secret: SecretString::from(secret),
        })
    }

    /// Returns the email address.
    #[must_use]
    pub fn address(&self) -> &str {
        self.address.as_str()
    }

    /// Returns the secret for handing to the IMAP login.
    #[must_use]
    pub fn secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl std::fmt::Debug for MailCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailCredential")
            .field("address", &self.address.as_str())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// The account being verified on the remote site.
#[derive(Clone)]
pub struct AccountHandle {
    username: String,
    auth_token: SecretString,
}

impl AccountHandle {
    /// Creates a handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if either value is blank.
    pub fn new(username: impl Into<String>, auth_token: impl Into<String>) -> Result<Self> {
        let username: String = username.into();
        let auth_token: String = auth_token.into();
        if username.trim().is_empty() || auth_token.trim().is_empty() {
            return Err(Error::invalid_request("username and authToken are required"));
        }
        Ok(Self {
            username,
            auth_token: SecretString::from(auth_token),
        })
    }

    /// The username as supplied by the caller.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The username without a leading `@`.
    #[must_use]
    pub fn screen_name(&self) -> &str {
        self.username.trim().trim_start_matches('@')
    }

    /// The bearer token for the account service.
    #[must_use]
    pub fn auth_token(&self) -> &str {
        self.auth_token.expose_secret()
    }
}

impl std::fmt::Debug for AccountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountHandle")
            .field("username", &self.username)
            .field("auth_token", &"[REDACTED]")
            .finish()
    }
}

/// Masks the local part of an address for log fields: `u***@gmail.com`.
#[must_use]
pub fn mask_email(email: &str) -> String {
    match email.rsplit_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        }
        None => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_validates_address() {
        assert!(MailCredential::new("user@gmail.com", "app-pass").is_ok());
        assert!(matches!(
            MailCredential::new("not-an-address", "app-pass"),
            Err(Error::InvalidEmailFormat { .. })
        ));
        assert!(matches!(
            MailCredential::new("user@gmail.com", ""),
            Err(Error::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_secret_not_in_debug() {
        let credential = MailCredential::new("user@gmail.com", "super-secret-password").unwrap();
        let debug_str = format!("{credential:?}");
        assert!(!debug_str.contains("super-secret-password"));
        assert!(debug_str.contains("[REDACTED]"));

        let account = AccountHandle::new("@someone", "bearer-token-value").unwrap();
        assert!(!format!("{account:?}").contains("bearer-token-value"));
    }

    #[test]
    fn test_screen_name_strips_at() {
        let account = AccountHandle::new("@someone", "t").unwrap();
        assert_eq!(account.screen_name(), "someone");
        assert_eq!(account.username(), "@someone");
        assert!(AccountHandle::new(" ", "t").is_err());
    }

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("user@gmail.com"), "u***@gmail.com");
        assert_eq!(mask_email("@gmail.com"), "***@gmail.com");
        assert_eq!(mask_email("nothing"), "***");
    }
}
