//! Signed policy documents and the in-memory decision index.
//!
//! - `types` — on-disk JSON shapes (`DomainSignedPolicyData` and friends)
//! - `canonical` — deterministic JSON rendering used as signature input
//! - `index` — per-domain assertion tables consulted by the engine
//! - `loader` — directory watcher that verifies and indexes policy files

pub mod canonical;
pub mod index;
pub mod loader;
pub mod types;

pub use index::{DomainRules, IndexedAssertion, PolicyIndex, RoleAssertionMap};
pub use loader::{PolicyError, PolicyLoader};
pub use types::{Assertion, AssertionEffect, DomainSignedPolicyData, Policy, PolicyData, SignedPolicyData};

/// Strip a `<domain>:` prefix from an assertion or request string.
///
/// No colon at all returns the input unchanged; a matching domain prefix
/// returns the remainder; any other prefix returns `default`.
pub(crate) fn strip_domain_prefix<'a>(value: &'a str, domain: &str, default: &'a str) -> &'a str {
    match value.split_once(':') {
        None => value,
        Some((prefix, rest)) if prefix == domain => rest,
        Some(_) => default,
    }
}
