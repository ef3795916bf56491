//! Upstream token-service client.
//!
//! `GetServiceToken` is a thin proxy: the agent fetches a role token for
//! its own service identity from the token authority (ZTS) and hands it to
//! the caller. Authentication upstream uses the service identity
//! certificate, so no long-lived secrets pass through the RPC surface.

use serde::Deserialize;

use crate::config::AgentConfig;

#[derive(Debug, thiserror::Error)]
pub enum ZtsError {
    #[error("upstream token service is not configured")]
    NotConfigured,
    #[error("unable to load service identity: {0}")]
    Identity(String),
    #[error("token service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token service returned status {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Deserialize)]
struct RoleTokenResponse {
    token: String,
}

pub struct ZtsClient {
    http: reqwest::Client,
    base_url: String,
    domain: String,
    roles: String,
    min_expiry_secs: i64,
    max_expiry_secs: i64,
}

impl ZtsClient {
    /// Build a client from the agent configuration and the key-store's
    /// upstream URL. Returns `None` when no upstream is configured, in
    /// which case `GetServiceToken` is answered with an error.
    pub fn from_config(config: &AgentConfig, zts_url: &str) -> Result<Option<ZtsClient>, ZtsError> {
        if zts_url.is_empty() || config.domain_name.is_empty() {
            return Ok(None);
        }

        let mut builder = reqwest::Client::builder();
        if !config.zts_cert_path.is_empty() && !config.zts_key_path.is_empty() {
            let mut pem = std::fs::read(&config.zts_cert_path)
                .map_err(|e| ZtsError::Identity(format!("{}: {e}", config.zts_cert_path)))?;
            pem.extend(
                std::fs::read(&config.zts_key_path)
                    .map_err(|e| ZtsError::Identity(format!("{}: {e}", config.zts_key_path)))?,
            );
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| ZtsError::Identity(e.to_string()))?;
            builder = builder.identity(identity);
        }

        Ok(Some(ZtsClient {
            http: builder.build()?,
            base_url: zts_url.trim_end_matches('/').to_string(),
            domain: config.domain_name.clone(),
            roles: config.role_names.clone(),
            min_expiry_secs: i64::from(config.token_expiration_min) * 60,
            max_expiry_secs: i64::from(config.token_expiration_max) * 60,
        }))
    }

    /// Fetch a role token for the configured service identity.
    pub async fn fetch_role_token(&self) -> Result<String, ZtsError> {
        let url = format!("{}/v1/domain/{}/token", self.base_url, self.domain);
        let mut request = self.http.get(&url).query(&[
            ("minExpiryTime", self.min_expiry_secs.to_string()),
            ("maxExpiryTime", self.max_expiry_secs.to_string()),
        ]);
        if !self.roles.is_empty() {
            request = request.query(&[("role", self.roles.as_str())]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ZtsError::Status(response.status()));
        }
        Ok(response.json::<RoleTokenResponse>().await?.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_unconfigured_upstream_is_none() {
        let config = AgentConfig::try_parse_from(["warden-agent"]).unwrap();
        assert!(ZtsClient::from_config(&config, "").unwrap().is_none());
        // A URL without a service domain is still unconfigured.
        assert!(
            ZtsClient::from_config(&config, "https://zts.example.com/zts")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_configured_upstream_builds() {
        let config = AgentConfig::try_parse_from([
            "warden-agent",
            "--domain-name",
            "sports",
            "--role-names",
            "readers,writers",
        ])
        .unwrap();
        let client = ZtsClient::from_config(&config, "https://zts.example.com/zts/")
            .unwrap()
            .unwrap();
        assert_eq!(client.base_url, "https://zts.example.com/zts");
        assert_eq!(client.min_expiry_secs, 600);
        assert_eq!(client.max_expiry_secs, 7200);
    }

    #[test]
    fn test_missing_identity_files_error() {
        let config = AgentConfig::try_parse_from([
            "warden-agent",
            "--domain-name",
            "sports",
            "--zts-cert-path",
            "/nonexistent/cert.pem",
            "--zts-key-path",
            "/nonexistent/key.pem",
        ])
        .unwrap();
        assert!(matches!(
            ZtsClient::from_config(&config, "https://zts.example.com/zts"),
            Err(ZtsError::Identity(_))
        ));
    }
}
