//! Agent configuration.
//!
//! Everything is settable as a flag or a `WARDEN_*` environment variable.
//! The key-store document (trusted authority keys, see
//! [`crate::keystore`]) is a separate JSON file pointed at by
//! `--key-store-file`.

use clap::Parser;
use rand::Rng;
use std::path::PathBuf;

use crate::token::ValidationParams;

#[derive(Parser, Debug, Clone)]
#[command(name = "warden-agent", about = "Local authorization sidecar")]
pub struct AgentConfig {
    /// Directory watched for signed policy files.
    #[arg(long, env = "WARDEN_POLICY_FILES_DIR", default_value = "policies")]
    pub policy_files_dir: PathBuf,

    /// Path to the key-store document with the trusted authority keys.
    #[arg(long, env = "WARDEN_KEY_STORE_FILE", default_value = "athenz.json")]
    pub key_store_file: PathBuf,

    /// Seconds between token-cache sweeps and policy-refresh iterations.
    #[arg(long, env = "WARDEN_CLEANUP_TOKEN_INTERVAL", default_value_t = 600)]
    pub cleanup_token_interval: u64,

    /// Seconds between policy download triggers.
    #[arg(long, env = "WARDEN_ZPU_DOWNLOAD_INTERVAL", default_value_t = 1800)]
    pub zpu_download_interval: u64,

    /// Seconds of clock skew tolerated during token validation.
    #[arg(long, env = "WARDEN_ALLOWED_OFFSET", default_value_t = 300)]
    pub allowed_offset: i64,

    /// Accept role tokens that carry no expiry field.
    #[arg(long, env = "WARDEN_ATHENZ_TOKEN_NO_EXPIRY")]
    pub athenz_token_no_expiry: bool,

    /// Maximum days a token expiry may lie in the future.
    #[arg(long, env = "WARDEN_ATHENZ_TOKEN_MAX_EXPIRY", default_value_t = 30)]
    pub athenz_token_max_expiry: i64,

    /// RPC listen port. 0 picks a random port in [10000, 65000).
    #[arg(long, env = "WARDEN_PORT", default_value_t = 0)]
    pub port: u16,

    /// Server certificate chain (PEM). Empty with --key-path empty means
    /// plaintext.
    #[arg(long, env = "WARDEN_CRT_PATH", default_value = "")]
    pub crt_path: String,

    /// Server private key (PEM).
    #[arg(long, env = "WARDEN_KEY_PATH", default_value = "")]
    pub key_path: String,

    /// CA bundle for client-certificate verification. Non-empty enables
    /// mTLS: clients must present a certificate chaining to this bundle.
    #[arg(long, env = "WARDEN_CA_PATH", default_value = "")]
    pub ca_path: String,

    /// Log level directive (e.g. "info", "warden_agent=debug").
    #[arg(long, env = "WARDEN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Client certificate (PEM) presented to the upstream token service.
    #[arg(long, env = "WARDEN_ZTS_CERT_PATH", default_value = "")]
    pub zts_cert_path: String,

    /// Client private key (PEM) for the upstream token service.
    #[arg(long, env = "WARDEN_ZTS_KEY_PATH", default_value = "")]
    pub zts_key_path: String,

    /// Domain this agent's service belongs to; used when proxying token
    /// requests upstream.
    #[arg(long, env = "WARDEN_DOMAIN_NAME", default_value = "")]
    pub domain_name: String,

    /// Comma-separated role names requested from the upstream token
    /// service.
    #[arg(long, env = "WARDEN_ROLE_NAMES", default_value = "")]
    pub role_names: String,

    /// Minimum lifetime, in minutes, of tokens fetched upstream.
    #[arg(long, env = "WARDEN_TOKEN_EXPIRATION_MIN", default_value_t = 10)]
    pub token_expiration_min: i32,

    /// Maximum lifetime, in minutes, of tokens fetched upstream.
    #[arg(long, env = "WARDEN_TOKEN_EXPIRATION_MAX", default_value_t = 120)]
    pub token_expiration_max: i32,
}

impl AgentConfig {
    /// The configured port, or a random one in [10000, 65000) when unset.
    pub fn resolve_port(&self) -> u16 {
        if self.port == 0 {
            rand::thread_rng().gen_range(10000..65000)
        } else {
            self.port
        }
    }

    pub fn validation_params(&self) -> ValidationParams {
        ValidationParams {
            allowed_offset: self.allowed_offset,
            allow_no_expiry: self.athenz_token_no_expiry,
            max_expiry_days: self.athenz_token_max_expiry,
        }
    }

    /// Whether the RPC listener should terminate TLS.
    pub fn tls_enabled(&self) -> bool {
        !self.crt_path.is_empty() && !self.key_path.is_empty()
    }
}
