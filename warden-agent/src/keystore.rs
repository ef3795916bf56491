//! Trusted public keys of the two signing authorities.
//!
//! The key-store document is JSON with y64-encoded PEM keys:
//!
//! ```json
//! {
//!   "ztsUrl": "https://zts.example.com:4443/zts",
//!   "zmsUrl": "https://zms.example.com:4443/zms",
//!   "ztsPublicKeys": [{ "id": "0", "key": "LS0tLS1CRUdJTi..." }],
//!   "zmsPublicKeys": [{ "id": "0", "key": "LS0tLS1CRUdJTi..." }]
//! }
//! ```
//!
//! ZTS keys verify role tokens and the outer policy signature; ZMS keys
//! verify the inner `policyData` signature. Keys are decoded and parsed once
//! at startup and the store is read-only afterwards; entries that fail to
//! decode are logged and skipped, which later surfaces as a missing key for
//! that id.

use std::collections::HashMap;
use std::path::Path;

use rsa::RsaPublicKey;
use serde::Deserialize;

use crate::crypto;

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("unable to read key store {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("unable to decode key store {path}: {source}")]
    Decode {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PublicKeyEntry {
    pub id: String,
    /// y64-encoded PEM public key.
    pub key: String,
}

/// On-disk shape of the key-store document.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct KeyStoreConfig {
    #[serde(rename = "ztsUrl", default)]
    pub zts_url: String,
    #[serde(rename = "zmsUrl", default)]
    pub zms_url: String,
    #[serde(rename = "ztsPublicKeys", default)]
    pub zts_public_keys: Vec<PublicKeyEntry>,
    #[serde(rename = "zmsPublicKeys", default)]
    pub zms_public_keys: Vec<PublicKeyEntry>,
}

/// Parsed, lookup-only key store.
#[derive(Debug)]
pub struct KeyStore {
    pub zts_url: String,
    pub zms_url: String,
    zts_keys: HashMap<String, RsaPublicKey>,
    zms_keys: HashMap<String, RsaPublicKey>,
}

impl KeyStore {
    /// Read and parse the key-store document at `path`.
    pub fn load(path: &Path) -> Result<KeyStore, KeyStoreError> {
        let raw = std::fs::read_to_string(path).map_err(|source| KeyStoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: KeyStoreConfig =
            serde_json::from_str(&raw).map_err(|source| KeyStoreError::Decode {
                path: path.display().to_string(),
                source,
            })?;
        Ok(KeyStore::from_config(config))
    }

    pub fn from_config(config: KeyStoreConfig) -> KeyStore {
        KeyStore {
            zts_url: config.zts_url,
            zms_url: config.zms_url,
            zts_keys: parse_entries("zts", config.zts_public_keys),
            zms_keys: parse_entries("zms", config.zms_public_keys),
        }
    }

    /// Key of the token authority, used for role tokens and the outer
    /// policy signature.
    pub fn zts_key(&self, id: &str) -> Option<&RsaPublicKey> {
        self.zts_keys.get(id)
    }

    /// Key of the policy authority, used for the inner `policyData`
    /// signature.
    pub fn zms_key(&self, id: &str) -> Option<&RsaPublicKey> {
        self.zms_keys.get(id)
    }
}

fn parse_entries(authority: &str, entries: Vec<PublicKeyEntry>) -> HashMap<String, RsaPublicKey> {
    let mut keys = HashMap::with_capacity(entries.len());
    for entry in entries {
        let pem = match crypto::y64_decode(&entry.key).map(String::from_utf8) {
            Ok(Ok(pem)) => pem,
            _ => {
                tracing::error!(authority, id = %entry.id, "public key is not y64-encoded PEM, skipping");
                continue;
            }
        };
        match crypto::parse_public_key_pem(&pem) {
            Ok(key) => {
                keys.insert(entry.id, key);
            }
            Err(e) => {
                tracing::error!(authority, id = %entry.id, error = %e, "unparseable public key, skipping");
            }
        }
    }
    keys
}
