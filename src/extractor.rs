//! Verification code extraction from email bodies.
//!
//! [`CodeExtractor`] applies an ordered list of [`Matcher`]s to decoded mail text and
//! returns the first capture. Rule order is precedence order: a labelled code anywhere
//! in the text beats a bare number that happens to appear earlier.
//!
//! # Example
//!
//! ```
//! use inbox_verify::CodeExtractor;
//!
//! let extractor = CodeExtractor::new();
//! let text = "Order 111111 shipped.\nYour verification code: 482913";
//! assert_eq!(extractor.extract(text), Some("482913"));
//! ```

use regex::Regex;
use std::sync::LazyLock;

/// Trait for extracting a value from email text.
///
/// Implement this trait to plug custom rules into a [`CodeExtractor`].
pub trait Matcher: Send + Sync {
    /// Returns the extracted value, borrowed from `text`, if the rule matches.
    fn find_match<'a>(&self, text: &'a str) -> Option<&'a str>;

    /// Returns a human-readable description of what this matcher looks for.
    ///
    /// Used in logging.
    fn description(&self) -> &str;
}

/// Regex-based matcher that extracts the first capture group.
///
/// # Example
///
/// ```
/// use inbox_verify::extractor::{Matcher, RegexMatcher};
///
/// let matcher = RegexMatcher::with_description(r"(?i)pin[:\s]+([0-9]{4})", "pin").unwrap();
/// assert_eq!(matcher.find_match("Your PIN: 4821"), Some("4821"));
/// ```
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
    description: String,
}

impl RegexMatcher {
    /// Creates a new regex matcher; the pattern should have one capture group.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Self::with_description(pattern, format!("regex pattern: {pattern}"))
    }

    /// Creates a new regex matcher with a custom description.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn with_description(
        pattern: &str,
        description: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            description: description.into(),
        })
    }
}

impl Matcher for RegexMatcher {
    fn find_match<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Default rules, highest priority first.
const DEFAULT_RULES: [(&str, &str); 5] = [
    (r"(?i)verification code[:\s]+([0-9]{6,8})", "verification code"),
    (r"(?i)confirmation code[:\s]+([0-9]{6,8})", "confirmation code"),
    (r"(?i)your code[:\s]+([0-9]{6,8})", "your code"),
    (r"(?i)code[:\s]+([0-9]{6,8})", "code"),
    (r"\b([0-9]{6,8})\b", "bare 6-8 digit number"),
];

static DEFAULT_MATCHERS: LazyLock<Vec<RegexMatcher>> = LazyLock::new(|| {
    DEFAULT_RULES
        .iter()
        .map(|(pattern, description)| {
            RegexMatcher::with_description(pattern, *description).expect("valid built-in regex")
        })
        .collect()
});

enum Rules {
    Default,
    Custom(Vec<Box<dyn Matcher>>),
}

/// Ordered set of extraction rules.
pub struct CodeExtractor {
    rules: Rules,
}

impl std::fmt::Debug for CodeExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rules = match &self.rules {
            Rules::Default => DEFAULT_RULES.len(),
            Rules::Custom(matchers) => matchers.len(),
        };
        f.debug_struct("CodeExtractor")
            .field("custom", &matches!(self.rules, Rules::Custom(_)))
            .field("rules", &rules)
            .finish()
    }
}

impl Default for CodeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeExtractor {
    /// Creates an extractor with the built-in verification code rules.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: Rules::Default,
        }
    }

    /// Creates an extractor from custom rules, tried in the given order.
    #[must_use]
    pub fn from_matchers(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self {
            rules: Rules::Custom(matchers),
        }
    }

    /// Returns the capture of the highest-priority rule that matches.
    #[must_use]
    pub fn extract<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.extract_with_rule(text).map(|(value, _)| value)
    }

    /// Like [`extract`](Self::extract), also returning the winning rule's description.
    #[must_use]
    pub fn extract_with_rule<'a>(&self, text: &'a str) -> Option<(&'a str, &str)> {
        match &self.rules {
            Rules::Default => first_match(DEFAULT_MATCHERS.iter(), text),
            Rules::Custom(matchers) => first_match(matchers.iter().map(|m| &**m), text),
        }
    }
}

fn first_match<'a, 'm, M>(
    matchers: impl Iterator<Item = &'m M>,
    text: &'a str,
) -> Option<(&'a str, &'m str)>
where
    M: Matcher + ?Sized + 'm,
{
    for matcher in matchers {
        if let Some(value) = matcher.find_match(text) {
            return Some((value, matcher.description()));
        }
    }
    None
}
