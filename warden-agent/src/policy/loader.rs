//! Directory watcher that verifies and indexes signed policy files.
//!
//! The refresh pass walks the policy directory, skips files that have not
//! changed since their last successful load, and for everything else runs
//! the full pipeline: JSON decode, outer (token authority) signature
//! verification, inner (policy authority) signature verification, assertion
//! compilation, and atomic publication into the [`PolicyIndex`].
//!
//! A file that fails decoding or verification is marked invalid and its
//! previously indexed state is retained untouched; the index is never
//! partially overwritten by unverified content. A file that disappears from
//! the directory tombstones its domain (empty tables, zero expiry).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::crypto;
use crate::keystore::KeyStore;
use crate::matcher::MatchObject;
use crate::policy::canonical;
use crate::policy::index::{DomainRules, IndexedAssertion, PolicyIndex};
use crate::policy::strip_domain_prefix;
use crate::policy::types::{DomainSignedPolicyData, PolicyData};

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("unable to read policy directory {path}: {source}")]
    DirectoryUnreadable {
        path: String,
        source: std::io::Error,
    },
    #[error("unable to read policy file {path}: {source}")]
    Unreadable {
        path: String,
        source: std::io::Error,
    },
    #[error("unable to decode policy file {path}: {source}")]
    Decode {
        path: String,
        source: serde_json::Error,
    },
    #[error("unable to canonicalize policy payload: {0}")]
    Canonical(serde_json::Error),
    #[error("policy file is invalid: {path}")]
    VerifyFailed { path: String },
    #[error("policy file {path} has unparseable expiry '{expires}'")]
    BadExpiry { path: String, expires: String },
}

#[derive(Debug)]
struct FileStatus {
    last_modified: SystemTime,
    valid: bool,
    domain: Option<String>,
}

/// Owned by the policy-refresh loop; publishes into the shared index.
pub struct PolicyLoader {
    dir: PathBuf,
    keystore: Arc<KeyStore>,
    index: Arc<PolicyIndex>,
    file_status: HashMap<String, FileStatus>,
}

impl PolicyLoader {
    pub fn new(dir: PathBuf, keystore: Arc<KeyStore>, index: Arc<PolicyIndex>) -> PolicyLoader {
        PolicyLoader {
            dir,
            keystore,
            index,
            file_status: HashMap::new(),
        }
    }

    /// One refresh pass over the policy directory.
    ///
    /// Per-file problems are logged and retried on the next pass; only an
    /// unreadable directory is reported to the caller.
    pub fn refresh(&mut self) -> Result<(), PolicyError> {
        let entries =
            std::fs::read_dir(&self.dir).map_err(|source| PolicyError::DirectoryUnreadable {
                path: self.dir.display().to_string(),
                source,
            })?;

        let mut listing: Vec<(String, SystemTime)> = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::error!(error = %e, "unreadable policy directory entry");
                    continue;
                }
            };
            let Ok(name) = entry.file_name().into_string() else {
                tracing::error!("skipping policy file with non-UTF-8 name");
                continue;
            };
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            listing.push((name, mtime));
        }

        // Files gone from the directory: drop their status and clear the
        // domain they had populated.
        let gone: Vec<String> = self
            .file_status
            .keys()
            .filter(|known| !listing.iter().any(|(name, _)| name == *known))
            .cloned()
            .collect();
        for name in gone {
            if let Some(status) = self.file_status.remove(&name)
                && status.valid
                && let Some(domain) = status.domain
            {
                tracing::info!(file = %name, domain = %domain, "policy file removed, clearing domain");
                self.index.tombstone(&domain);
            }
        }

        for (name, mtime) in listing {
            if let Some(status) = self.file_status.get(&name)
                && mtime <= status.last_modified
                && status.valid
            {
                continue;
            }
            if let Err(e) = self.load_file(&name, mtime) {
                tracing::error!(file = %name, error = %e, "unable to load policy file");
            }
        }
        Ok(())
    }

    /// Load and verify one policy file, publishing its domain on success.
    fn load_file(&mut self, name: &str, mtime: SystemTime) -> Result<(), PolicyError> {
        let path = self.dir.join(name);
        let result = self.parse_and_verify(&path);

        let status = self
            .file_status
            .entry(name.to_string())
            .or_insert(FileStatus {
                last_modified: mtime,
                valid: false,
                domain: None,
            });
        status.last_modified = mtime;

        match result {
            Ok((domain, rules)) => {
                status.valid = true;
                status.domain = Some(domain.clone());
                tracing::info!(file = %name, domain = %domain, "policy file loaded");
                self.index.publish(domain, rules);
                Ok(())
            }
            Err(e) => {
                // Decode and verification failures invalidate the file; a
                // transient read failure keeps the previous validity. The
                // indexed state is retained either way.
                if !matches!(e, PolicyError::Unreadable { .. }) {
                    status.valid = false;
                }
                Err(e)
            }
        }
    }

    fn parse_and_verify(&self, path: &Path) -> Result<(String, DomainRules), PolicyError> {
        let path_str = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| PolicyError::Unreadable {
            path: path_str.clone(),
            source,
        })?;
        let doc: DomainSignedPolicyData =
            serde_json::from_str(&raw).map_err(|source| PolicyError::Decode {
                path: path_str.clone(),
                source,
            })?;
        let signed = &doc.signed_policy_data;

        // Outer signature: token authority over the whole signed payload.
        let outer_input = canonical::to_canonical_string(signed).map_err(PolicyError::Canonical)?;
        let mut verified = match self.keystore.zts_key(&doc.key_id) {
            Some(key) => match crypto::verify(&outer_input, &doc.signature, key) {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(path = %path_str, key_id = %doc.key_id, error = %e,
                        "invalid outer policy signature");
                    false
                }
            },
            None => {
                tracing::error!(path = %path_str, key_id = %doc.key_id,
                    "no token-authority key for policy file");
                false
            }
        };

        // Inner signature: policy authority over the policy data alone.
        if verified {
            let inner_input =
                canonical::to_canonical_string(&signed.policy_data).map_err(PolicyError::Canonical)?;
            verified = match self.keystore.zms_key(&signed.zms_key_id) {
                Some(key) => match crypto::verify(&inner_input, &signed.zms_signature, key) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::error!(path = %path_str, key_id = %signed.zms_key_id, error = %e,
                            "invalid inner policy signature");
                        false
                    }
                },
                None => {
                    tracing::error!(path = %path_str, key_id = %signed.zms_key_id,
                        "no policy-authority key for policy file");
                    false
                }
            };
        }

        if !verified {
            return Err(PolicyError::VerifyFailed { path: path_str });
        }

        let Some(expiry) = signed.expires_at() else {
            return Err(PolicyError::BadExpiry {
                path: path_str,
                expires: signed.expires.clone(),
            });
        };

        let domain = signed.policy_data.domain.clone();
        let rules = build_domain_rules(&signed.policy_data, expiry);
        Ok((domain, rules))
    }
}

/// Compile a verified policy payload into the four per-role tables.
pub(crate) fn build_domain_rules(data: &PolicyData, expiry: i64) -> DomainRules {
    let mut rules = DomainRules {
        expiry,
        ..DomainRules::default()
    };
    for policy in &data.policies {
        for assertion in &policy.assertions {
            // Action and resource patterns are lowercased to line up with
            // the request-side normalization. A resource with a foreign
            // domain prefix keeps the prefix and can never match a
            // request, whose prefix is stripped.
            let action = assertion.action.to_lowercase();
            let resource = assertion.resource.to_lowercase();
            let resource = strip_domain_prefix(&resource, &data.domain, &resource);
            let role = strip_domain_prefix(&assertion.role, &data.domain, &assertion.role);
            let role = role.strip_prefix("role.").unwrap_or(role);

            let indexed = IndexedAssertion {
                policy_name: policy.name.clone(),
                role: role.to_string(),
                resource: resource.to_string(),
                role_match: MatchObject::compile(role),
                action_match: MatchObject::compile(&action),
                resource_match: MatchObject::compile(resource),
            };

            let table = match (assertion.is_deny(), indexed.role_match.is_equality()) {
                (true, true) => &mut rules.standard_deny,
                (true, false) => &mut rules.wildcard_deny,
                (false, true) => &mut rules.standard_allow,
                (false, false) => &mut rules.wildcard_allow,
            };
            table.entry(role.to_string()).or_default().push(indexed);
        }
    }
    rules
}
