//! On-disk JSON shapes of signed policy documents.
//!
//! A policy file carries two layers of signing. The ZMS (policy authority)
//! signature covers the canonical rendering of `policyData`; the outer ZTS
//! (token authority) signature covers the canonical rendering of the whole
//! `signedPolicyData` object. Optional fields are skipped when absent so
//! re-serialization reproduces the signed bytes.

use serde::{Deserialize, Serialize};

/// Top-level policy file: the signed payload plus the outer signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainSignedPolicyData {
    #[serde(rename = "signedPolicyData")]
    pub signed_policy_data: SignedPolicyData,
    /// Outer signature over the canonical `signedPolicyData`, y64-encoded.
    #[serde(default)]
    pub signature: String,
    /// Key id of the token authority key that produced `signature`.
    #[serde(rename = "keyId", default)]
    pub key_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignedPolicyData {
    #[serde(rename = "policyData")]
    pub policy_data: PolicyData,
    /// Inner signature over the canonical `policyData`, y64-encoded.
    #[serde(rename = "zmsSignature", default)]
    pub zms_signature: String,
    /// Key id of the policy authority key that produced `zmsSignature`.
    #[serde(rename = "zmsKeyId", default)]
    pub zms_key_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    /// Absolute expiry of this document, RFC 3339. Indexed entries for the
    /// domain are dead after this instant regardless of in-memory presence.
    pub expires: String,
}

impl SignedPolicyData {
    /// The document expiry as UNIX seconds.
    pub fn expires_at(&self) -> Option<i64> {
        chrono::DateTime::parse_from_rfc3339(&self.expires)
            .ok()
            .map(|dt| dt.timestamp())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyData {
    pub domain: String,
    #[serde(default)]
    pub policies: Vec<Policy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub name: String,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

/// A single access rule. Role, action and resource are glob fragments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assertion {
    pub role: String,
    pub action: String,
    pub resource: String,
    /// Absent means ALLOW.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<AssertionEffect>,
}

impl Assertion {
    pub fn is_deny(&self) -> bool {
        self.effect == Some(AssertionEffect::Deny)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssertionEffect {
    Allow,
    Deny,
}
