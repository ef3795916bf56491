//! Shared fixtures: generated authority keys, signed policy documents and
//! role tokens for the `angler` test domain.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, OnceLock};

use rsa::pkcs8::EncodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};

use warden_agent::crypto;
use warden_agent::keystore::{KeyStore, KeyStoreConfig, PublicKeyEntry};
use warden_agent::policy::canonical;
use warden_agent::policy::types::{
    Assertion, AssertionEffect, DomainSignedPolicyData, Policy, PolicyData, SignedPolicyData,
};
use warden_agent::token::ValidationParams;

pub struct Authorities {
    /// Token authority: signs role tokens and the outer policy signature.
    pub zts: RsaPrivateKey,
    /// Policy authority: signs the inner policy payload.
    pub zms: RsaPrivateKey,
}

pub fn authorities() -> &'static Authorities {
    static KEYS: OnceLock<Authorities> = OnceLock::new();
    KEYS.get_or_init(|| {
        let mut rng = rand::thread_rng();
        Authorities {
            zts: RsaPrivateKey::new(&mut rng, 2048).unwrap(),
            zms: RsaPrivateKey::new(&mut rng, 2048).unwrap(),
        }
    })
}

fn y64_pem(key: &RsaPrivateKey) -> String {
    let pem = RsaPublicKey::from(key)
        .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
        .unwrap();
    crypto::y64_encode(pem.as_bytes())
}

/// A key store trusting both test authorities under key id "0".
pub fn keystore() -> Arc<KeyStore> {
    let keys = authorities();
    Arc::new(KeyStore::from_config(KeyStoreConfig {
        zts_url: String::new(),
        zms_url: String::new(),
        zts_public_keys: vec![PublicKeyEntry {
            id: "0".into(),
            key: y64_pem(&keys.zts),
        }],
        zms_public_keys: vec![PublicKeyEntry {
            id: "0".into(),
            key: y64_pem(&keys.zms),
        }],
    }))
}

pub fn validation_params() -> ValidationParams {
    ValidationParams {
        allowed_offset: 300,
        allow_no_expiry: false,
        max_expiry_days: 30,
    }
}

fn assertion(role: &str, action: &str, resource: &str, effect: Option<AssertionEffect>) -> Assertion {
    Assertion {
        role: role.into(),
        action: action.into(),
        resource: resource.into(),
        effect,
    }
}

/// The `angler` domain's rule set.
pub fn angler_policy_data() -> PolicyData {
    use AssertionEffect::Deny;
    PolicyData {
        domain: "angler".into(),
        policies: vec![Policy {
            name: "angler:policy.admin".into(),
            assertions: vec![
                assertion("angler:role.public", "read", "angler:stuff", None),
                assertion("angler:role.public", "fish", "angler:stockedpond*", None),
                assertion("angler:role.public", "throw", "angler:stuff", Some(Deny)),
                assertion(
                    "angler:role.manager*",
                    "manage",
                    "angler:pondsKernCounty",
                    None,
                ),
                assertion(
                    "angler:role.manager*",
                    "manage",
                    "angler:pondsVentura*",
                    Some(Deny),
                ),
                assertion("angler:role.matchall", "*", "*", None),
                assertion(
                    "angler:role.full_regex",
                    "full_regex",
                    "angler:?ore(tech|commit|c|d)",
                    None,
                ),
            ],
            modified: None,
        }],
    }
}

/// Sign a policy payload with both authorities, expiring
/// `expires_in_secs` from now (negative for an already-expired document).
pub fn signed_policy(data: PolicyData, expires_in_secs: i64) -> DomainSignedPolicyData {
    let keys = authorities();
    let expires = chrono::Utc::now() + chrono::Duration::seconds(expires_in_secs);
    let mut signed = SignedPolicyData {
        policy_data: data,
        zms_signature: String::new(),
        zms_key_id: "0".into(),
        modified: None,
        expires: expires.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    };

    let inner = canonical::to_canonical_string(&signed.policy_data).unwrap();
    signed.zms_signature = crypto::sign(&inner, &keys.zms).unwrap();

    let outer = canonical::to_canonical_string(&signed).unwrap();
    let signature = crypto::sign(&outer, &keys.zts).unwrap();

    DomainSignedPolicyData {
        signed_policy_data: signed,
        signature,
        key_id: "0".into(),
    }
}

pub fn write_policy(dir: &Path, name: &str, document: &DomainSignedPolicyData) {
    std::fs::write(dir.join(name), serde_json::to_string(document).unwrap()).unwrap();
}

/// A role token for `role` in `domain`, generated 30 seconds ago and
/// expiring in five minutes, signed by the token authority under key "0".
pub fn role_token(role: &str, domain: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let unsigned = format!(
        "v=S1;d={domain};h=localhost;r={role};t={};e={};k=0",
        now - 30,
        now + 300
    );
    let signature = crypto::sign(&unsigned, &authorities().zts).unwrap();
    format!("{unsigned};s={signature}")
}
