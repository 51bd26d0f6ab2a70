//! Connection-string normalization and redaction.
//!
//! Operators hand us URLs in whatever shape their platform exports:
//! `postgres://`, `postgresql://`, JDBC strings, or a bare `host:port/db`.
//! Each driver owns a [`UrlNormalizer`] that rewrites them into the form
//! its sqlx driver parses.

use regex::Regex;
use std::sync::LazyLock;

static CREDENTIALS_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"://.*@").expect("credential redaction pattern is valid"));

/// One `(prefix, replacement)` rewrite, applied when the raw URL starts with `prefix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteRule {
    pub prefix: &'static str,
    pub replacement: &'static str,
}

/// Ordered rewrite table plus the canonical prefix of one driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrlNormalizer {
    pub canonical: &'static str,
    pub rules: &'static [RewriteRule],
}

pub const POSTGRES_CANONICAL: &str = "postgres://";
pub const SQLITE_CANONICAL: &str = "sqlite:";

const POSTGRES_RULES: &[RewriteRule] = &[
    RewriteRule {
        prefix: "postgres://",
        replacement: POSTGRES_CANONICAL,
    },
    RewriteRule {
        prefix: "postgresql://",
        replacement: POSTGRES_CANONICAL,
    },
    RewriteRule {
        prefix: "jdbc:postgresql://",
        replacement: POSTGRES_CANONICAL,
    },
];

impl UrlNormalizer {
    pub const POSTGRES: UrlNormalizer = UrlNormalizer {
        canonical: POSTGRES_CANONICAL,
        rules: POSTGRES_RULES,
    };

    pub const SQLITE: UrlNormalizer = UrlNormalizer {
        canonical: SQLITE_CANONICAL,
        rules: &[],
    };

    /// Rewrite `raw` into the canonical form.
    ///
    /// The first matching rule wins. Without a match, the canonical prefix is
    /// prepended unless `raw` already carries it. `raw` must be non-empty;
    /// [`Config::validate`](crate::config::Config::validate) enforces that upstream.
    pub fn normalize(&self, raw: &str) -> String {
        if let Some((rule, rest)) = self
            .rules
            .iter()
            .find_map(|rule| raw.strip_prefix(rule.prefix).map(|rest| (rule, rest)))
        {
            return format!("{}{}", rule.replacement, rest);
        }
        if raw.starts_with(self.canonical) {
            raw.to_string()
        } else {
            format!("{}{}", self.canonical, raw)
        }
    }
}

/// Mask embedded credentials: `postgres://user:pw@host/db` becomes `postgres://***@host/db`.
pub fn redact(url: &str) -> String {
    CREDENTIALS_SEGMENT.replace(url, "://***@").into_owned()
}
