//! The access decision engine.
//!
//! `check_access` answers "may the bearer of this role token perform this
//! action on this resource?" with one of ten stable status codes. Deny
//! assertions always take precedence over allow assertions, and within the
//! deny and allow passes literal (standard) roles are consulted before
//! wildcard roles.

use std::sync::Arc;

use crate::keystore::KeyStore;
use crate::policy::index::{PolicyIndex, RoleAssertionMap};
use crate::policy::strip_domain_prefix;
use crate::token::{RoleToken, TokenError, ValidationParams};
use crate::token_cache::TokenCache;

/// Wire-visible decision codes. Values are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum AccessStatus {
    Allow = 0,
    Deny = 1,
    DenyRoleTokenExpired = 2,
    DenyRoleTokenInvalid = 3,
    DenyInvalidParameters = 4,
    DenyDomainMismatch = 5,
    DenyDomainNotFound = 6,
    DenyNoMatch = 7,
    DenyDomainEmpty = 8,
    DenyDomainExpired = 9,
}

impl AccessStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<AccessStatus> {
        Some(match code {
            0 => AccessStatus::Allow,
            1 => AccessStatus::Deny,
            2 => AccessStatus::DenyRoleTokenExpired,
            3 => AccessStatus::DenyRoleTokenInvalid,
            4 => AccessStatus::DenyInvalidParameters,
            5 => AccessStatus::DenyDomainMismatch,
            6 => AccessStatus::DenyDomainNotFound,
            7 => AccessStatus::DenyNoMatch,
            8 => AccessStatus::DenyDomainEmpty,
            9 => AccessStatus::DenyDomainExpired,
            _ => return None,
        })
    }
}

/// Errors that surface at the transport level instead of as a status code.
/// Everything here means a cryptographic precondition was missing, not that
/// access was evaluated and denied.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("token validation failed: {0}")]
    Validation(#[from] TokenError),
}

/// Shared state of the decision path, constructed once at startup.
pub struct DecisionContext {
    keystore: Arc<KeyStore>,
    index: Arc<PolicyIndex>,
    token_cache: Arc<TokenCache>,
    params: ValidationParams,
}

impl DecisionContext {
    pub fn new(
        keystore: Arc<KeyStore>,
        index: Arc<PolicyIndex>,
        token_cache: Arc<TokenCache>,
        params: ValidationParams,
    ) -> DecisionContext {
        DecisionContext {
            keystore,
            index,
            token_cache,
            params,
        }
    }

    pub fn token_cache(&self) -> &TokenCache {
        &self.token_cache
    }

    /// Evaluate one access check.
    ///
    /// `Err` is returned only when a cryptographic precondition is missing
    /// (no signature material, no public key for the token's key id); every
    /// evaluated outcome, including rejected tokens, comes back as a status
    /// code.
    pub fn check_access(
        &self,
        signed_token: &str,
        action: &str,
        resource: &str,
    ) -> Result<AccessStatus, EngineError> {
        let role_token = match self.token_cache.get(signed_token) {
            Some(cached) => {
                let now = chrono::Utc::now().timestamp();
                if cached.expiry_time != 0 && cached.expiry_time < now {
                    self.token_cache.remove(signed_token);
                    return Ok(AccessStatus::DenyRoleTokenExpired);
                }
                cached
            }
            None => match self.authenticate(signed_token)? {
                Ok(token) => token,
                Err(status) => return Ok(status),
            },
        };

        Ok(self.allow_action(action, resource, &role_token.domain, &role_token.roles))
    }

    /// Parse and verify a token not present in the cache. On success the
    /// token is cached and returned; evaluated rejections come back as the
    /// status code to answer with.
    fn authenticate(
        &self,
        signed_token: &str,
    ) -> Result<Result<Arc<RoleToken>, AccessStatus>, EngineError> {
        let token = match RoleToken::parse(signed_token) {
            Ok(token) => token,
            Err(e) => {
                tracing::debug!(error = %e, "role token rejected at parse");
                return Ok(Err(AccessStatus::DenyRoleTokenInvalid));
            }
        };

        let public_key = self.keystore.zts_key(&token.key_id);
        match token.validate(public_key, &self.params) {
            Ok(true) => {
                let token = Arc::new(token);
                self.token_cache
                    .insert(signed_token.to_string(), token.clone());
                Ok(Ok(token))
            }
            Ok(false) => Ok(Err(AccessStatus::DenyRoleTokenInvalid)),
            Err(TokenError::Expired { .. }) => Ok(Err(AccessStatus::DenyRoleTokenExpired)),
            Err(e @ (TokenError::FutureGeneration { .. } | TokenError::ExpiresTooFar { .. })) => {
                tracing::debug!(error = %e, "role token rejected at validation");
                Ok(Err(AccessStatus::DenyRoleTokenInvalid))
            }
            Err(e) => Err(EngineError::Validation(e)),
        }
    }

    /// The four-phase table consultation. Order is normative: standard
    /// deny, wildcard deny, standard allow, wildcard allow.
    fn allow_action(
        &self,
        action: &str,
        resource: &str,
        domain: &str,
        roles: &[String],
    ) -> AccessStatus {
        if roles.is_empty() || domain.is_empty() {
            return AccessStatus::DenyRoleTokenInvalid;
        }
        if action.is_empty() || resource.is_empty() {
            return AccessStatus::DenyInvalidParameters;
        }

        let action = action.to_lowercase();
        let resource = resource.to_lowercase();
        // A resource prefixed with some other domain strips to empty: the
        // token cannot speak for it.
        let resource = strip_domain_prefix(&resource, domain, "");
        if resource.is_empty() {
            return AccessStatus::DenyDomainMismatch;
        }

        let Some(rules) = self.index.domain(domain) else {
            return AccessStatus::DenyDomainNotFound;
        };
        let now = chrono::Utc::now().timestamp();
        if rules.expiry < now {
            return AccessStatus::DenyDomainExpired;
        }

        let mut status = AccessStatus::DenyDomainNotFound;

        // Deny assertions take precedence over allow assertions.
        if !rules.standard_deny.is_empty() {
            if match_standard_role(&rules.standard_deny, roles, &action, resource) {
                return AccessStatus::Deny;
            }
            status = AccessStatus::DenyNoMatch;
        } else {
            status = AccessStatus::DenyDomainEmpty;
        }

        if !rules.wildcard_deny.is_empty() {
            if match_wildcard_role(&rules.wildcard_deny, roles, &action, resource) {
                return AccessStatus::Deny;
            }
            status = AccessStatus::DenyNoMatch;
        } else {
            status = AccessStatus::DenyDomainEmpty;
        }

        if !rules.standard_allow.is_empty() {
            if match_standard_role(&rules.standard_allow, roles, &action, resource) {
                return AccessStatus::Allow;
            }
            status = AccessStatus::DenyNoMatch;
        } else {
            status = AccessStatus::DenyDomainEmpty;
        }

        if !rules.wildcard_allow.is_empty() {
            if match_wildcard_role(&rules.wildcard_allow, roles, &action, resource) {
                return AccessStatus::Allow;
            }
            status = AccessStatus::DenyNoMatch;
        } else {
            status = AccessStatus::DenyDomainEmpty;
        }

        status
    }
}

/// Standard-role tables are keyed by literal role name: look each token
/// role up directly and test that bucket's assertions.
fn match_standard_role(
    table: &RoleAssertionMap,
    roles: &[String],
    action: &str,
    resource: &str,
) -> bool {
    roles.iter().any(|role| {
        table
            .get(role)
            .is_some_and(|asserts| match_assertions(asserts, action, resource))
    })
}

/// Wildcard-role tables are keyed by role pattern: every bucket whose role
/// matcher accepts a token role is tested. Keys are visited in sorted order
/// so the walk is deterministic.
fn match_wildcard_role(
    table: &RoleAssertionMap,
    roles: &[String],
    action: &str,
    resource: &str,
) -> bool {
    let mut patterns: Vec<&String> = table.keys().collect();
    patterns.sort();

    for role in roles {
        for pattern in &patterns {
            let asserts = &table[*pattern];
            // All assertions in a bucket share one role pattern.
            let Some(first) = asserts.first() else {
                continue;
            };
            if first.role_match.matches(role) && match_assertions(asserts, action, resource) {
                return true;
            }
        }
    }
    false
}

fn match_assertions(
    asserts: &[crate::policy::index::IndexedAssertion],
    action: &str,
    resource: &str,
) -> bool {
    asserts
        .iter()
        .any(|a| a.action_match.matches(action) && a.resource_match.matches(resource))
}
