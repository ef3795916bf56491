//! Sign a policy document the way the two authorities would.
//!
//! Takes an unsigned policy payload (`{"domain": ..., "policies": [...]}`),
//! applies the inner policy-authority signature and the outer
//! token-authority signature, and emits a policy file the agent will
//! accept. Meant for integration environments and fixtures; production
//! policy files come signed from the control plane.
//!
//! Usage:
//!   policy-signer --policy-data angler.json \
//!     --zms-key zms_private.pem --zts-key zts_private.pem \
//!     --expires-in-hours 48 --out angler.pol

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use warden_agent::crypto;
use warden_agent::policy::canonical;
use warden_agent::policy::types::{DomainSignedPolicyData, PolicyData, SignedPolicyData};

#[derive(Parser)]
struct Args {
    /// Unsigned policy payload JSON file.
    #[arg(long)]
    policy_data: PathBuf,

    /// PEM private key of the policy authority (inner signature).
    #[arg(long)]
    zms_key: PathBuf,

    /// PEM private key of the token authority (outer signature).
    #[arg(long)]
    zts_key: PathBuf,

    /// Key id recorded for the inner signature.
    #[arg(long, default_value = "0")]
    zms_key_id: String,

    /// Key id recorded for the outer signature.
    #[arg(long, default_value = "0")]
    zts_key_id: String,

    /// Hours until the document expires.
    #[arg(long, default_value_t = 48)]
    expires_in_hours: i64,

    /// Output file; stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let raw = std::fs::read_to_string(&args.policy_data)
        .with_context(|| format!("unable to read {}", args.policy_data.display()))?;
    let policy_data: PolicyData =
        serde_json::from_str(&raw).context("unable to decode policy payload")?;

    let zms_key = crypto::parse_private_key_pem(
        &std::fs::read_to_string(&args.zms_key)
            .with_context(|| format!("unable to read {}", args.zms_key.display()))?,
    )
    .context("unable to parse policy-authority key")?;
    let zts_key = crypto::parse_private_key_pem(
        &std::fs::read_to_string(&args.zts_key)
            .with_context(|| format!("unable to read {}", args.zts_key.display()))?,
    )
    .context("unable to parse token-authority key")?;

    let now = chrono::Utc::now();
    let expires = now + chrono::Duration::hours(args.expires_in_hours);
    let mut signed = SignedPolicyData {
        policy_data,
        zms_signature: String::new(),
        zms_key_id: args.zms_key_id,
        modified: Some(now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        expires: expires.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    };

    let inner = canonical::to_canonical_string(&signed.policy_data)?;
    signed.zms_signature = crypto::sign(&inner, &zms_key)?;

    let outer = canonical::to_canonical_string(&signed)?;
    let signature = crypto::sign(&outer, &zts_key)?;

    let document = DomainSignedPolicyData {
        signed_policy_data: signed,
        signature,
        key_id: args.zts_key_id,
    };

    let encoded = serde_json::to_string_pretty(&document)?;
    match args.out {
        Some(path) => std::fs::write(&path, encoded)
            .with_context(|| format!("unable to write {}", path.display()))?,
        None => println!("{encoded}"),
    }
    Ok(())
}
