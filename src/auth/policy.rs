// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access policy applied after a token has been verified.

use std::collections::HashSet;

use super::{AuthError, Identity};

/// Allow/deny rules for verified callers.
///
/// - `allowed_groups` empty: any group (or none) is accepted
/// - `email_domains` empty or containing `*`: any email, or no email
/// - `email_verified: false` is rejected unless `allow_unverified_email`
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    allowed_groups: HashSet<String>,
    email_domains: HashSet<String>,
    allow_unverified_email: bool,
}

impl AccessPolicy {
    /// Policy that lets every verified caller through.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Restrict access to members of at least one of `groups`.
    pub fn with_allowed_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_groups = groups.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict access to emails in `domains` (`*` allows any).
    pub fn with_email_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.email_domains = domains
            .into_iter()
            .map(|d| d.into().trim_start_matches('@').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn with_allow_unverified_email(mut self, allow: bool) -> Self {
        self.allow_unverified_email = allow;
        self
    }

    pub fn restricts_groups(&self) -> bool {
        !self.allowed_groups.is_empty()
    }

    fn restricts_email(&self) -> bool {
        !self.email_domains.is_empty() && !self.email_domains.contains("*")
    }

    /// Decide whether `identity` may proceed.
    pub fn authorize(&self, identity: &Identity) -> Result<(), AuthError> {
        if identity.email_verified == Some(false) && !self.allow_unverified_email {
            return Err(AuthError::EmailNotVerified);
        }

        if self.restricts_email() {
            let allowed = identity
                .email_domain()
                .is_some_and(|domain| self.email_domains.contains(&domain));
            if !allowed {
                return Err(AuthError::EmailDomainNotAllowed);
            }
        }

        if self.restricts_groups()
            && !self.allowed_groups.iter().any(|g| identity.in_group(g))
        {
            return Err(AuthError::GroupNotAllowed);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(groups: &[&str], email: Option<&str>) -> Identity {
        Identity {
            user: "user_123".to_string(),
            email: email.map(str::to_string),
            email_verified: None,
            groups: groups.iter().map(|g| g.to_string()).collect(),
            preferred_username: None,
            issuer: "https://issuer.example.com".to_string(),
            expires_at: 0,
        }
    }

    #[test]
    fn allow_all_accepts_anyone() {
        let policy = AccessPolicy::allow_all();
        assert!(policy.authorize(&identity(&[], None)).is_ok());
        assert!(!policy.restricts_groups());
    }

    #[test]
    fn groups_must_intersect_allow_list() {
        let policy = AccessPolicy::default().with_allowed_groups(["platform", "sre"]);
        assert!(policy.authorize(&identity(&["dev", "sre"], None)).is_ok());
        assert_eq!(
            policy.authorize(&identity(&["dev"], None)),
            Err(AuthError::GroupNotAllowed)
        );
        assert_eq!(
            policy.authorize(&identity(&[], None)),
            Err(AuthError::GroupNotAllowed)
        );
    }

    #[test]
    fn email_domains_are_case_insensitive() {
        let policy = AccessPolicy::default().with_email_domains(["Example.com"]);
        assert!(policy
            .authorize(&identity(&[], Some("ada@EXAMPLE.com")))
            .is_ok());
        assert_eq!(
            policy.authorize(&identity(&[], Some("eve@evil.com"))),
            Err(AuthError::EmailDomainNotAllowed)
        );
        assert_eq!(
            policy.authorize(&identity(&[], None)),
            Err(AuthError::EmailDomainNotAllowed)
        );
    }

    #[test]
    fn wildcard_domain_allows_missing_email() {
        let policy = AccessPolicy::default().with_email_domains(["*"]);
        assert!(policy.authorize(&identity(&[], None)).is_ok());
    }

    #[test]
    fn unverified_email_rejected_by_default() {
        let mut unverified = identity(&[], Some("ada@example.com"));
        unverified.email_verified = Some(false);

        assert_eq!(
            AccessPolicy::default().authorize(&unverified),
            Err(AuthError::EmailNotVerified)
        );
        assert!(AccessPolicy::default()
            .with_allow_unverified_email(true)
            .authorize(&unverified)
            .is_ok());
    }
}
