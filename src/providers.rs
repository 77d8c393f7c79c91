//! IMAP server lookup from email domains.
//!
//! [`ProviderDirectory`] maps the domain of an email address to the IMAP host and
//! port of its provider. Unknown domains are reported as an [`UnsupportedProvider`]
//! value carrying the list of supported providers, suitable for showing to a user.
//!
//! # Example
//!
//! ```
//! use inbox_verify::ProviderDirectory;
//!
//! let directory = ProviderDirectory::with_defaults();
//! let entry = directory.lookup("someone@GMAIL.com").unwrap();
//! assert_eq!(entry.host, "imap.gmail.com");
//! assert_eq!(entry.port, 993);
//!
//! let missing = directory.lookup("someone@example.org").unwrap_err();
//! assert_eq!(missing.domain, "example.org");
//! assert!(missing.supported.iter().any(|name| name == "Gmail"));
//! ```

use std::collections::HashMap;
use std::sync::LazyLock;

/// Connection parameters for one mail provider domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEntry {
    /// User-facing provider name, e.g. `"Gmail"`.
    pub name: String,
    /// Lowercased email domain.
    pub domain: String,
    /// IMAP server hostname.
    pub host: String,
    /// IMAP server port (implicit TLS).
    pub port: u16,
}

impl ProviderEntry {
    /// Creates an entry; the domain is lowercased.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        domain: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            domain: domain.into().to_lowercase(),
            host: host.into(),
            port,
        }
    }

    /// Returns the server address as "host:port".
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Lookup failure: the domain has no known IMAP server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported email provider: {domain}")]
pub struct UnsupportedProvider {
    /// The domain that was looked up.
    pub domain: String,
    /// Names of the providers that are supported.
    pub supported: Vec<String>,
}

struct BuiltinProvider {
    name: &'static str,
    domain: &'static str,
    host: &'static str,
    port: u16,
}

const IMAPS_PORT: u16 = 993;

const fn imaps(
    name: &'static str,
    domain: &'static str,
    host: &'static str,
) -> BuiltinProvider {
    BuiltinProvider {
        name,
        domain,
        host,
        port: IMAPS_PORT,
    }
}

/// Built-in table, in the order provider names are reported.
const BUILTIN: &[BuiltinProvider] = &[
    imaps("Gmail", "gmail.com", "imap.gmail.com"),
    imaps("Gmail", "googlemail.com", "imap.gmail.com"),
    imaps("Yahoo", "yahoo.com", "imap.mail.yahoo.com"),
    imaps("Outlook", "outlook.com", "outlook.office365.com"),
    imaps("Hotmail", "hotmail.com", "outlook.office365.com"),
    imaps("Outlook", "live.com", "outlook.office365.com"),
    imaps("GMX", "gmx.com", "imap.gmx.com"),
    imaps("GMX", "gmx.net", "imap.gmx.net"),
    imaps("Mail.ru", "mail.ru", "imap.mail.ru"),
    imaps("Yandex", "yandex.ru", "imap.yandex.ru"),
    imaps("Yandex", "yandex.com", "imap.yandex.com"),
    imaps("iCloud", "icloud.com", "imap.mail.me.com"),
    imaps("iCloud", "me.com", "imap.mail.me.com"),
    imaps("AOL", "aol.com", "imap.aol.com"),
    imaps("Zoho", "zoho.com", "imap.zoho.com"),
    imaps("ProtonMail", "protonmail.com", "imap.protonmail.com"),
];

static BUILTIN_BY_DOMAIN: LazyLock<HashMap<&'static str, &'static BuiltinProvider>> =
    LazyLock::new(|| BUILTIN.iter().map(|p| (p.domain, p)).collect());

/// Extracts the lowercased domain: everything after the last `@`.
///
/// An input without `@` is treated as a bare domain.
#[must_use]
pub fn email_domain(email: &str) -> String {
    email
        .rsplit_once('@')
        .map_or(email, |(_, domain)| domain)
        .trim()
        .to_lowercase()
}

/// Domain-to-server directory.
///
/// Start from [`ProviderDirectory::with_defaults`] for the built-in providers, and
/// [`register`](Self::register) extra domains (which override the built-ins).
#[derive(Debug, Clone, Default)]
pub struct ProviderDirectory {
    custom: HashMap<String, ProviderEntry>,
    custom_order: Vec<String>,
    use_defaults: bool,
}

impl ProviderDirectory {
    /// Creates an empty directory without built-in defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory containing the built-in provider table.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            use_defaults: true,
            ..Self::default()
        }
    }

    /// Registers a custom entry, replacing any existing mapping for its domain.
    pub fn register(&mut self, entry: ProviderEntry) {
        if !self.custom.contains_key(&entry.domain) {
            self.custom_order.push(entry.domain.clone());
        }
        self.custom.insert(entry.domain.clone(), entry);
    }

    /// Looks up the provider for an email address.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedProvider`] when neither a custom entry nor (if enabled)
    /// a built-in entry exists for the domain.
    pub fn lookup(&self, email: &str) -> Result<ProviderEntry, UnsupportedProvider> {
        let domain = email_domain(email);

        if let Some(entry) = self.custom.get(&domain) {
            return Ok(entry.clone());
        }

        if self.use_defaults {
            if let Some(builtin) = BUILTIN_BY_DOMAIN.get(domain.as_str()) {
                return Ok(ProviderEntry::new(
                    builtin.name,
                    builtin.domain,
                    builtin.host,
                    builtin.port,
                ));
            }
        }

        Err(UnsupportedProvider {
            domain,
            supported: self.supported_providers(),
        })
    }

    /// Returns `true` if the domain resolves.
    #[must_use]
    pub fn is_supported(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        self.custom.contains_key(&domain)
            || (self.use_defaults && BUILTIN_BY_DOMAIN.contains_key(domain.as_str()))
    }

    /// Supported provider names, de-duplicated, built-ins first.
    #[must_use]
    pub fn supported_providers(&self) -> Vec<String> {
        let mut candidates: Vec<&str> = Vec::new();
        if self.use_defaults {
            candidates.extend(BUILTIN.iter().map(|p| p.name));
        }
        candidates.extend(
            self.custom_order
                .iter()
                .filter_map(|domain| self.custom.get(domain))
                .map(|entry| entry.name.as_str()),
        );

        let mut names: Vec<String> = Vec::new();
        for name in candidates {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Number of resolvable domains.
    #[must_use]
    pub fn len(&self) -> usize {
        let builtin = if self.use_defaults {
            BUILTIN
                .iter()
                .filter(|p| !self.custom.contains_key(p.domain))
                .count()
        } else {
            0
        };
        self.custom.len() + builtin
    }

    /// Returns `true` if no domain resolves.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
