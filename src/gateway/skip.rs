// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Routes that bypass authentication.
//!
//! Rules are written `[METHOD=]/path/prefix`, e.g. `GET=/public` or
//! `/healthz`. A prefix matches at segment boundaries only, so `/public`
//! covers `/public` and `/public/x` but not `/publicity`.
//!
//! Paths are percent-decoded once before matching. A path a backend could
//! resolve differently (dot segments, backslashes, anything still encoded
//! after decoding) never matches a rule, so `/public/../admin` needs a token.

use std::borrow::Cow;
use std::str::FromStr;

use axum::http::Method;
use percent_encoding::percent_decode_str;

/// A rule could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid skip route '{rule}': {reason}")]
pub struct InvalidSkipRule {
    rule: String,
    reason: &'static str,
}

/// One bypass rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipRule {
    method: Option<Method>,
    prefix: String,
}

impl SkipRule {
    /// `path` must already be canonical.
    fn covers(&self, method: &Method, path: &str) -> bool {
        if self.method.as_ref().is_some_and(|m| m != method) {
            return false;
        }
        let prefix = self.prefix.trim_end_matches('/');
        if prefix.is_empty() {
            // Rule "/" covers everything.
            return true;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

impl FromStr for SkipRule {
    type Err = InvalidSkipRule;

    fn from_str(rule: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| InvalidSkipRule {
            rule: rule.to_string(),
            reason,
        };

        let (method, prefix) = match rule.split_once('=') {
            Some((method, prefix)) => {
                let method = Method::from_str(&method.trim().to_ascii_uppercase())
                    .map_err(|_| invalid("unknown method"))?;
                (Some(method), prefix.trim())
            }
            None => (None, rule.trim()),
        };

        if !prefix.starts_with('/') {
            return Err(invalid("path must start with '/'"));
        }

        if canonical_path(prefix).as_deref() != Some(prefix) {
            return Err(invalid("path must be plain (no dot segments or escapes)"));
        }

        Ok(Self {
            method,
            prefix: prefix.to_string(),
        })
    }
}

/// Decoded path without query or fragment, or `None` if it is ambiguous.
fn canonical_path(raw: &str) -> Option<Cow<'_, str>> {
    let raw = raw.split(['?', '#']).next().unwrap_or(raw);
    let decoded = percent_decode_str(raw).decode_utf8().ok()?;
    if !decoded.starts_with('/')
        || decoded.contains(['%', '\\'])
        || decoded.chars().any(char::is_control)
        || decoded.split('/').any(|segment| segment == "." || segment == "..")
    {
        return None;
    }
    Some(decoded)
}

/// Ordered set of bypass rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipRules(Vec<SkipRule>);

impl SkipRules {
    /// Parse a comma-separated list; blank entries are ignored.
    pub fn parse(list: &str) -> Result<Self, InvalidSkipRule> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(SkipRule::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        let Some(path) = canonical_path(path) else {
            return false;
        };
        self.0.iter().any(|rule| rule.covers(method, &path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(list: &str) -> SkipRules {
        SkipRules::parse(list).unwrap()
    }

    #[test]
    fn prefix_matches_on_segment_boundary() {
        let rules = rules("/public");
        assert!(rules.matches(&Method::GET, "/public"));
        assert!(rules.matches(&Method::POST, "/public/assets/app.js"));
        assert!(rules.matches(&Method::GET, "/public?page=2"));
        assert!(!rules.matches(&Method::GET, "/publicity"));
        assert!(!rules.matches(&Method::GET, "/api/public"));
    }

    #[test]
    fn trailing_slash_in_rule_is_ignored() {
        let rules = rules("/public/");
        assert!(rules.matches(&Method::GET, "/public"));
        assert!(rules.matches(&Method::GET, "/public/x"));
    }

    #[test]
    fn method_restricted_rule() {
        let rules = rules("get=/docs");
        assert!(rules.matches(&Method::GET, "/docs/index.html"));
        assert!(!rules.matches(&Method::POST, "/docs/index.html"));
    }

    #[test]
    fn traversal_never_matches() {
        let rules = rules("GET=/public");
        for path in [
            "/public/../admin/secrets",
            "/public/./x",
            "/public/%2e%2e/admin",
            "/public/%2E%2E/admin",
            "/public%2f..%2fadmin",
            "/public/%252e%252e/admin",
            "/public\\..\\admin",
            "/public/%00",
            "/public/%ff",
        ] {
            assert!(!rules.matches(&Method::GET, path), "{path} must not be skipped");
        }
    }

    #[test]
    fn encoded_plain_path_still_matches() {
        let rules = rules("/public");
        assert!(rules.matches(&Method::GET, "/public/logo%20dark.png"));
        assert!(rules.matches(&Method::GET, "/%70ublic/app.js"));
        assert!(rules.matches(&Method::GET, "/public/a..b"));
    }

    #[test]
    fn rejects_bad_rules() {
        assert!("/public/../admin".parse::<SkipRule>().is_err());
        assert!("/p%75blic".parse::<SkipRule>().is_err());
        assert!("public".parse::<SkipRule>().is_err());
        assert!("GET=public".parse::<SkipRule>().is_err());
        assert!("G ET=/x".parse::<SkipRule>().is_err());
    }

    #[test]
    fn parses_lists() {
        let rules = rules("GET=/healthz, /public,,");
        assert!(rules.matches(&Method::GET, "/healthz"));
        assert!(!rules.matches(&Method::DELETE, "/healthz"));
        assert!(rules.matches(&Method::DELETE, "/public/1"));
        assert!(!rules.matches(&Method::GET, "/private"));

        assert_eq!(SkipRules::parse("").unwrap(), SkipRules::default());
        assert!(SkipRules::parse("/ok,bad").is_err());
    }
}
