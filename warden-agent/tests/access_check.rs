//! End-to-end decisions: signed policy files on disk, loaded and verified
//! through the real pipeline, consulted with real signed role tokens.

mod common;

use std::sync::Arc;

use warden_agent::engine::{AccessStatus, DecisionContext};
use warden_agent::policy::{PolicyIndex, PolicyLoader};
use warden_agent::token_cache::TokenCache;

/// Load the angler policy (expiring `expires_in_secs` from now) into a
/// fresh decision context.
fn context_with_policy(expires_in_secs: i64) -> (DecisionContext, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let document = common::signed_policy(common::angler_policy_data(), expires_in_secs);
    common::write_policy(dir.path(), "angler.pol", &document);

    let keystore = common::keystore();
    let index = Arc::new(PolicyIndex::new());
    let mut loader = PolicyLoader::new(dir.path().to_path_buf(), keystore.clone(), index.clone());
    loader.refresh().unwrap();

    let ctx = DecisionContext::new(
        keystore,
        index,
        Arc::new(TokenCache::new(0)),
        common::validation_params(),
    );
    (ctx, dir)
}

#[test]
fn test_expired_policy_file_denies_domain_expired() {
    let (ctx, _dir) = context_with_policy(-3600);
    let token = common::role_token("public", "angler");
    assert_eq!(
        ctx.check_access(&token, "read", "angler:stuff").unwrap(),
        AccessStatus::DenyDomainExpired
    );
}

#[test]
fn test_standard_role_allow() {
    let (ctx, _dir) = context_with_policy(48 * 3600);
    let token = common::role_token("public", "angler");
    assert_eq!(
        ctx.check_access(&token, "read", "angler:stuff").unwrap(),
        AccessStatus::Allow
    );
}

#[test]
fn test_standard_role_deny() {
    let (ctx, _dir) = context_with_policy(48 * 3600);
    let token = common::role_token("public", "angler");
    assert_eq!(
        ctx.check_access(&token, "throw", "angler:stuff").unwrap(),
        AccessStatus::Deny
    );
}

#[test]
fn test_prefix_resource_allow() {
    let (ctx, _dir) = context_with_policy(48 * 3600);
    let token = common::role_token("public", "angler");
    assert_eq!(
        ctx.check_access(&token, "fish", "angler:stockedpondBigBassLake")
            .unwrap(),
        AccessStatus::Allow
    );
}

#[test]
fn test_wildcard_role_deny() {
    let (ctx, _dir) = context_with_policy(48 * 3600);
    let token = common::role_token("managerkernco", "angler");
    assert_eq!(
        ctx.check_access(&token, "manage", "angler:pondsVenturaCounty")
            .unwrap(),
        AccessStatus::Deny
    );
}

#[test]
fn test_wildcard_role_allow() {
    let (ctx, _dir) = context_with_policy(48 * 3600);
    let token = common::role_token("managerkernco", "angler");
    assert_eq!(
        ctx.check_access(&token, "manage", "angler:pondsKernCounty")
            .unwrap(),
        AccessStatus::Allow
    );
}

#[test]
fn test_match_all_role_allows_anything() {
    let (ctx, _dir) = context_with_policy(48 * 3600);
    let token = common::role_token("matchall", "angler");
    assert_eq!(
        ctx.check_access(&token, "all", "angler:anything").unwrap(),
        AccessStatus::Allow
    );
}

#[test]
fn test_full_regex_allow() {
    let (ctx, _dir) = context_with_policy(48 * 3600);
    let token = common::role_token("full_regex", "angler");
    assert_eq!(
        ctx.check_access(&token, "full_regex", "angler:coretech")
            .unwrap(),
        AccessStatus::Allow
    );
}

#[test]
fn test_domain_mismatch_never_allows() {
    let (ctx, _dir) = context_with_policy(48 * 3600);
    let token = common::role_token("matchall", "angler");
    assert_eq!(
        ctx.check_access(&token, "read", "weather:stuff").unwrap(),
        AccessStatus::DenyDomainMismatch
    );
}

#[test]
fn test_unknown_domain() {
    let (ctx, _dir) = context_with_policy(48 * 3600);
    let token = common::role_token("public", "deepsea");
    assert_eq!(
        ctx.check_access(&token, "read", "deepsea:stuff").unwrap(),
        AccessStatus::DenyDomainNotFound
    );
}

#[test]
fn test_forged_token_signature_is_invalid() {
    let (ctx, _dir) = context_with_policy(48 * 3600);
    // Valid shape, bad signature bytes for the trusted key.
    let now = chrono::Utc::now().timestamp();
    let forged = format!(
        "v=S1;d=angler;r=public;t={};e={};k=0;s=Zm9yZ2Vk",
        now - 30,
        now + 300
    );
    assert_eq!(
        ctx.check_access(&forged, "read", "angler:stuff").unwrap(),
        AccessStatus::DenyRoleTokenInvalid
    );
}

#[test]
fn test_expired_token() {
    let (ctx, _dir) = context_with_policy(48 * 3600);
    let now = chrono::Utc::now().timestamp();
    let unsigned = format!("v=S1;d=angler;r=public;t={};e={}", now - 600, now - 300);
    let signature =
        warden_agent::crypto::sign(&unsigned, &common::authorities().zts).unwrap();
    let token = format!("{unsigned};s={signature}");
    assert_eq!(
        ctx.check_access(&token, "read", "angler:stuff").unwrap(),
        AccessStatus::DenyRoleTokenExpired
    );
}

#[test]
fn test_verified_token_is_cached_and_reused() {
    let (ctx, _dir) = context_with_policy(48 * 3600);
    let token = common::role_token("public", "angler");
    assert!(ctx.token_cache().is_empty());
    assert_eq!(
        ctx.check_access(&token, "read", "angler:stuff").unwrap(),
        AccessStatus::Allow
    );
    assert_eq!(ctx.token_cache().len(), 1);
    // Second call hits the cache and still decides identically.
    assert_eq!(
        ctx.check_access(&token, "read", "angler:stuff").unwrap(),
        AccessStatus::Allow
    );
    assert_eq!(ctx.token_cache().len(), 1);
}

#[test]
fn test_identical_inputs_decide_identically() {
    let (ctx, _dir) = context_with_policy(48 * 3600);
    let token = common::role_token("managerkernco", "angler");
    let first = ctx
        .check_access(&token, "manage", "angler:pondsVenturaCounty")
        .unwrap();
    for _ in 0..16 {
        assert_eq!(
            ctx.check_access(&token, "manage", "angler:pondsVenturaCounty")
                .unwrap(),
            first
        );
    }
}

#[test]
fn test_reload_after_file_change_switches_decision() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = common::keystore();
    let index = Arc::new(PolicyIndex::new());
    let mut loader = PolicyLoader::new(dir.path().to_path_buf(), keystore.clone(), index.clone());

    common::write_policy(
        dir.path(),
        "angler.pol",
        &common::signed_policy(common::angler_policy_data(), 48 * 3600),
    );
    loader.refresh().unwrap();

    let ctx = DecisionContext::new(
        keystore,
        index,
        Arc::new(TokenCache::new(0)),
        common::validation_params(),
    );
    let token = common::role_token("public", "angler");
    assert_eq!(
        ctx.check_access(&token, "read", "angler:stuff").unwrap(),
        AccessStatus::Allow
    );

    // The allow assertion disappears in the next signed revision.
    std::thread::sleep(std::time::Duration::from_millis(20));
    let mut revised = common::angler_policy_data();
    revised.policies[0].assertions.retain(|a| a.action != "read");
    common::write_policy(
        dir.path(),
        "angler.pol",
        &common::signed_policy(revised, 48 * 3600),
    );
    loader.refresh().unwrap();

    assert_eq!(
        ctx.check_access(&token, "read", "angler:stuff").unwrap(),
        AccessStatus::DenyNoMatch
    );
}
