//! Warden: a local authorization sidecar.
//!
//! Applications ask one question over a small RPC surface: "may the caller
//! bearing this signed role token perform this action on this resource?"
//! The agent keeps the expensive parts — RSA signature verification and
//! policy evaluation — out of the calling process, feeding its decision
//! tables from signed policy files that an external updater drops into a
//! watched directory.
//!
//! # Architecture
//!
//! - `matcher` — glob fragment classification and matching
//! - `crypto` — y64 encoding, RSA-SHA256 verify/sign
//! - `keystore` — trusted authority public keys
//! - `token` — role-token parsing and validation
//! - `token_cache` — memoized verified tokens
//! - `policy` — signed policy documents, loader and decision index
//! - `engine` — the access decision algorithm
//! - `zts` — upstream token-service proxy client
//! - `rpc` — line-JSON RPC surface over TCP/TLS
//! - `daemon` — maintainer loops and lifecycle supervision
//! - `config` — agent options

pub mod config;
pub mod crypto;
pub mod daemon;
pub mod downloader;
pub mod engine;
pub mod keystore;
pub mod matcher;
pub mod policy;
pub mod rpc;
pub mod token;
pub mod token_cache;
pub mod zts;

pub use config::AgentConfig;
pub use daemon::Daemon;
pub use engine::{AccessStatus, DecisionContext};
pub use keystore::KeyStore;
pub use token::{RoleToken, ValidationParams};
