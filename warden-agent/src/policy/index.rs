//! Per-domain assertion tables consulted by the decision engine.
//!
//! Each loaded domain is published as a single [`DomainRules`] value that
//! holds all four tables — {standard, wildcard} × {allow, deny} — and the
//! document expiry. Publication swaps one `Arc` under the lock, so readers
//! always observe the four tables of one load together, never a mix of two
//! loads.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::matcher::MatchObject;

/// An indexed assertion with its matchers compiled up front.
#[derive(Debug, Clone)]
pub struct IndexedAssertion {
    /// Name of the policy this assertion came from.
    pub policy_name: String,
    /// Normalized role pattern (domain prefix and `role.` stripped).
    pub role: String,
    /// Normalized resource pattern (matching domain prefix stripped).
    pub resource: String,
    pub role_match: MatchObject,
    pub action_match: MatchObject,
    pub resource_match: MatchObject,
}

/// Role pattern → assertions sharing that pattern.
pub type RoleAssertionMap = HashMap<String, Vec<IndexedAssertion>>;

/// Everything known about one domain, published atomically.
#[derive(Debug, Default)]
pub struct DomainRules {
    /// Document expiry, UNIX seconds. Zero on tombstones, which therefore
    /// read as expired.
    pub expiry: i64,
    pub standard_allow: RoleAssertionMap,
    pub wildcard_allow: RoleAssertionMap,
    pub standard_deny: RoleAssertionMap,
    pub wildcard_deny: RoleAssertionMap,
}

impl DomainRules {
    /// Empty tables left behind when a domain's policy file is removed.
    pub fn tombstone() -> DomainRules {
        DomainRules::default()
    }
}

/// The process-wide policy index. Mutated only by the policy-refresh loop;
/// read concurrently by the decision engine.
#[derive(Debug, Default)]
pub struct PolicyIndex {
    domains: RwLock<HashMap<String, Arc<DomainRules>>>,
}

impl PolicyIndex {
    pub fn new() -> PolicyIndex {
        PolicyIndex::default()
    }

    /// Fetch the current rules for a domain. The returned `Arc` stays
    /// coherent for the whole decision even if a reload publishes a newer
    /// version concurrently.
    pub fn domain(&self, name: &str) -> Option<Arc<DomainRules>> {
        self.domains.read().get(name).cloned()
    }

    /// Atomically replace a domain's rules.
    pub fn publish(&self, name: String, rules: DomainRules) {
        self.domains.write().insert(name, Arc::new(rules));
    }

    /// Reset a domain to empty tables after its policy file disappeared.
    pub fn tombstone(&self, name: &str) {
        self.domains
            .write()
            .insert(name.to_string(), Arc::new(DomainRules::tombstone()));
    }

    pub fn domain_count(&self) -> usize {
        self.domains.read().len()
    }
}
