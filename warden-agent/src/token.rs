//! Role-token parsing and validation.
//!
//! A role token is a semicolon-delimited sequence of `key=value` fields
//! asserting that a principal holds one or more roles within a domain, for
//! example:
//!
//! ```text
//! v=S1;d=angler;r=public,member;t=1700000000;e=1700000300;k=0;s=<y64 sig>
//! ```
//!
//! Parsing only checks shape and the required fields (`d`, `r`); the
//! signature is checked later by [`RoleToken::validate`]. The substring up
//! to but not including `;s=` is the canonical unsigned form the signature
//! covers. All timestamps are UNIX seconds.

use rsa::RsaPublicKey;

use crate::crypto;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("signed token must not be empty")]
    Empty,
    #[error("malformed token field '{0}'")]
    MalformedField(String),
    #[error("token does not contain required domain component")]
    MissingDomain,
    #[error("token does not contain required roles component")]
    MissingRoles,
    #[error("missing data/signature component")]
    MissingSignatureMaterial,
    #[error("no public key provided")]
    NoPublicKey,
    #[error("token has future generation time {generation_time}, now {now}, allowed offset {allowed_offset}")]
    FutureGeneration {
        generation_time: i64,
        now: i64,
        allowed_offset: i64,
    },
    #[error("token has expired, expiry {expiry}, now {now}")]
    Expired { expiry: i64, now: i64 },
    #[error("token expires too far in the future, expiry {expiry}, now {now}, max expiry {max_expiry_days} days")]
    ExpiresTooFar {
        expiry: i64,
        now: i64,
        max_expiry_days: i64,
    },
}

/// Knobs applied during validation, taken from the agent configuration.
#[derive(Debug, Clone, Copy)]
pub struct ValidationParams {
    /// Seconds of clock skew tolerated between token issuer and this host.
    pub allowed_offset: i64,
    /// Accept tokens that carry no expiry field.
    pub allow_no_expiry: bool,
    /// How far in the future an expiry may lie, in days.
    pub max_expiry_days: i64,
}

/// A parsed role token. String fields default to empty when the tag is
/// absent; `generation_time` and `expiry_time` default to zero.
#[derive(Debug, Clone, Default)]
pub struct RoleToken {
    pub version: String,
    pub domain: String,
    pub roles: Vec<String>,
    pub complete_role_set: bool,
    pub principal: String,
    pub host: String,
    pub ip: String,
    /// Time the token was generated, UNIX seconds.
    pub generation_time: i64,
    /// Time the token expires, UNIX seconds. Zero means no expiry field.
    pub expiry_time: i64,
    pub key_id: String,
    pub salt: String,
    pub signature: String,
    /// The verbatim input, used as the token-cache key.
    pub signed_token: String,
    /// Everything before the first `;s=`; the signature covers this.
    pub unsigned_token: String,
}

impl RoleToken {
    /// Parse a signed token string.
    pub fn parse(signed_token: &str) -> Result<RoleToken, TokenError> {
        if signed_token.is_empty() {
            return Err(TokenError::Empty);
        }

        let mut token = RoleToken {
            unsigned_token: match signed_token.find(";s=") {
                Some(i) => signed_token[..i].to_string(),
                None => signed_token.to_string(),
            },
            signed_token: signed_token.to_string(),
            ..RoleToken::default()
        };

        let mut role_names = "";
        for part in signed_token.split(';') {
            // Exactly one `=` per field.
            let mut halves = part.split('=');
            let (Some(tag), Some(value), None) = (halves.next(), halves.next(), halves.next())
            else {
                return Err(TokenError::MalformedField(part.to_string()));
            };
            match tag {
                "v" => token.version = value.to_string(),
                "d" => token.domain = value.to_string(),
                "r" => role_names = value,
                "h" => token.host = value.to_string(),
                "i" => token.ip = value.to_string(),
                "k" => token.key_id = value.to_string(),
                "p" => token.principal = value.to_string(),
                "a" => token.salt = value.to_string(),
                "s" => token.signature = value.to_string(),
                "c" => {
                    let flag: i64 = value
                        .parse()
                        .map_err(|_| TokenError::MalformedField(part.to_string()))?;
                    token.complete_role_set = flag == 1;
                }
                "t" => {
                    token.generation_time = value
                        .parse()
                        .map_err(|_| TokenError::MalformedField(part.to_string()))?;
                }
                "e" => {
                    token.expiry_time = value
                        .parse()
                        .map_err(|_| TokenError::MalformedField(part.to_string()))?;
                }
                _ => tracing::debug!(tag, "unknown role token field"),
            }
        }

        if token.domain.is_empty() {
            return Err(TokenError::MissingDomain);
        }
        if role_names.is_empty() {
            return Err(TokenError::MissingRoles);
        }
        token.roles = role_names.split(',').map(str::to_string).collect();

        Ok(token)
    }

    /// Validate a parsed token against a public key.
    ///
    /// Returns `Ok(true)` when the token is fresh and the signature
    /// verifies, `Ok(false)` when the only problem is a signature mismatch,
    /// and `Err` for hard precondition failures (missing material, missing
    /// key, bad timestamps).
    pub fn validate(
        &self,
        public_key: Option<&RsaPublicKey>,
        params: &ValidationParams,
    ) -> Result<bool, TokenError> {
        if self.unsigned_token.is_empty() || self.signature.is_empty() {
            return Err(TokenError::MissingSignatureMaterial);
        }
        let Some(public_key) = public_key else {
            return Err(TokenError::NoPublicKey);
        };

        let now = chrono::Utc::now().timestamp();

        // A generation time in the future means a clock problem somewhere;
        // tolerate the configured offset between servers.
        if self.generation_time > 0 && self.generation_time - params.allowed_offset > now {
            return Err(TokenError::FutureGeneration {
                generation_time: self.generation_time,
                now,
                allowed_offset: params.allowed_offset,
            });
        }

        // Unlimited tokens are only accepted when explicitly enabled.
        if self.expiry_time != 0 || !params.allow_no_expiry {
            if self.expiry_time < now {
                return Err(TokenError::Expired {
                    expiry: self.expiry_time,
                    now,
                });
            }
            let horizon = now + params.max_expiry_days * 24 * 60 * 60 + params.allowed_offset;
            if self.expiry_time > horizon {
                return Err(TokenError::ExpiresTooFar {
                    expiry: self.expiry_time,
                    now,
                    max_expiry_days: params.max_expiry_days,
                });
            }
        }

        match crypto::verify(&self.unsigned_token, &self.signature, public_key) {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::error!(domain = %self.domain, error = %e, "role token signature rejected");
                Ok(false)
            }
        }
    }
}
