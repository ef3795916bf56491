//! The RPC surface: newline-delimited JSON frames over TCP.
//!
//! Each frame is one request or one response. Requests carry an `id`, a
//! `method` and `params`; responses echo the `id` and carry either `result`
//! or `error`:
//!
//! ```text
//! → {"id":1,"method":"CheckAccessWithToken","params":{"token":"…","access":"read","resource":"angler:stuff"}}
//! ← {"id":1,"result":{"access_check_status":0}}
//! ```
//!
//! Decision outcomes — including rejected tokens — are always in-band
//! status codes; the `error` member appears only when a cryptographic
//! precondition was missing or the upstream proxy failed.
//!
//! The listener is plaintext by default. With a certificate and key it
//! terminates TLS, and with a CA bundle it additionally requires client
//! certificates (mTLS).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls;

use crate::config::AgentConfig;
use crate::engine::DecisionContext;
use crate::zts::ZtsClient;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tls configuration error: {0}")]
    Tls(String),
}

// ── Wire messages ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessCheckRequest {
    pub token: String,
    pub access: String,
    pub resource: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessCheckResponse {
    pub access_check_status: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceTokenRequest {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceTokenResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params")]
pub enum RpcCall {
    CheckAccessWithToken(AccessCheckRequest),
    GetServiceToken(ServiceTokenRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub id: u64,
    #[serde(flatten)]
    pub call: RpcCall,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    fn result<T: Serialize>(id: u64, value: &T) -> RpcResponse {
        match serde_json::to_value(value) {
            Ok(result) => RpcResponse {
                id,
                result: Some(result),
                error: None,
            },
            Err(e) => RpcResponse::error(id, format!("unable to encode response: {e}")),
        }
    }

    fn error(id: u64, message: String) -> RpcResponse {
        RpcResponse {
            id,
            result: None,
            error: Some(message),
        }
    }
}

// ── Server ──────────────────────────────────────────────────────────────

pub struct RpcServer {
    ctx: Arc<DecisionContext>,
    zts: Option<Arc<ZtsClient>>,
    tls: Option<TlsAcceptor>,
}

impl RpcServer {
    pub fn new(
        ctx: Arc<DecisionContext>,
        zts: Option<Arc<ZtsClient>>,
        tls: Option<TlsAcceptor>,
    ) -> RpcServer {
        RpcServer { ctx, zts, tls }
    }

    /// Accept and serve connections until the shutdown signal flips, then
    /// drain in-flight connections.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), RpcError> {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::error!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let server = Arc::clone(&self);
                    let conn_shutdown = shutdown.clone();
                    connections.spawn(async move {
                        match server.tls.clone() {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(tls_stream) => {
                                    server.handle_connection(tls_stream, conn_shutdown).await;
                                }
                                Err(e) => tracing::warn!(%peer, error = %e, "tls handshake failed"),
                            },
                            None => server.handle_connection(stream, conn_shutdown).await,
                        }
                    });
                }
            }
        }

        if !connections.is_empty() {
            tracing::info!(in_flight = connections.len(), "draining rpc connections");
        }
        while connections.join_next().await.is_some() {}
        Ok(())
    }

    /// Serve one connection: requests are handled in arrival order and the
    /// connection closes once the client hangs up or shutdown begins.
    async fn handle_connection<S>(&self, stream: S, mut shutdown: watch::Receiver<bool>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        loop {
            let line = tokio::select! {
                _ = shutdown.changed() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let response = self.dispatch(&line).await;
                    let mut frame = match serde_json::to_string(&response) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::error!(error = %e, "unable to encode rpc response");
                            break;
                        }
                    };
                    frame.push('\n');
                    if writer.write_all(frame.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "rpc read failed");
                    break;
                }
            }
        }
    }

    async fn dispatch(&self, line: &str) -> RpcResponse {
        let request: RpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                // Salvage the id if the frame was at least JSON.
                let id = serde_json::from_str::<serde_json::Value>(line)
                    .ok()
                    .and_then(|v| v.get("id").and_then(serde_json::Value::as_u64))
                    .unwrap_or(0);
                return RpcResponse::error(id, format!("invalid request: {e}"));
            }
        };

        match request.call {
            RpcCall::CheckAccessWithToken(check) => {
                match self
                    .ctx
                    .check_access(&check.token, &check.access, &check.resource)
                {
                    Ok(status) => RpcResponse::result(
                        request.id,
                        &AccessCheckResponse {
                            access_check_status: status.code(),
                        },
                    ),
                    Err(e) => {
                        tracing::error!(error = %e, "access check failed");
                        RpcResponse::error(request.id, format!("unable to check access: {e}"))
                    }
                }
            }
            RpcCall::GetServiceToken(_) => match &self.zts {
                Some(zts) => match zts.fetch_role_token().await {
                    Ok(token) => RpcResponse::result(request.id, &ServiceTokenResponse { token }),
                    Err(e) => {
                        tracing::error!(error = %e, "unable to fetch service token");
                        RpcResponse::error(request.id, format!("unable to get service token: {e}"))
                    }
                },
                None => RpcResponse::error(
                    request.id,
                    "upstream token service is not configured".to_string(),
                ),
            },
        }
    }
}

// ── TLS ─────────────────────────────────────────────────────────────────

/// Build the TLS acceptor described by the configuration, or `None` for a
/// plaintext listener.
pub fn build_tls_acceptor(config: &AgentConfig) -> Result<Option<TlsAcceptor>, RpcError> {
    if !config.tls_enabled() {
        if !config.ca_path.is_empty() {
            tracing::warn!("ca-path is set but crt-path/key-path are not; serving plaintext");
        }
        return Ok(None);
    }

    let certs = load_certs(&config.crt_path)?;
    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(std::fs::File::open(
        &config.key_path,
    )?))?
    .ok_or_else(|| RpcError::Tls(format!("no private key found in {}", config.key_path)))?;

    let builder = rustls::ServerConfig::builder();
    let server_config = if config.ca_path.is_empty() {
        builder.with_no_client_auth().with_single_cert(certs, key)
    } else {
        let mut roots = rustls::RootCertStore::empty();
        for cert in load_certs(&config.ca_path)? {
            roots
                .add(cert)
                .map_err(|e| RpcError::Tls(e.to_string()))?;
        }
        let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| RpcError::Tls(e.to_string()))?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
    }
    .map_err(|e| RpcError::Tls(e.to_string()))?;

    Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
}

fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, RpcError> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(RpcError::Tls(format!("no certificates found in {path}")));
    }
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_request_wire_shape() {
        let frame = r#"{"id":1,"method":"CheckAccessWithToken","params":{"token":"t","access":"read","resource":"angler:stuff"}}"#;
        let request: RpcRequest = serde_json::from_str(frame).unwrap();
        assert_eq!(request.id, 1);
        assert_eq!(
            request.call,
            RpcCall::CheckAccessWithToken(AccessCheckRequest {
                token: "t".into(),
                access: "read".into(),
                resource: "angler:stuff".into(),
            })
        );
        // Round-trips to the same field layout.
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["method"], "CheckAccessWithToken");
        assert_eq!(encoded["params"]["access"], "read");
    }

    #[test]
    fn test_service_token_wire_shape() {
        let frame = r#"{"id":7,"method":"GetServiceToken","params":{}}"#;
        let request: RpcRequest = serde_json::from_str(frame).unwrap();
        assert_eq!(
            request.call,
            RpcCall::GetServiceToken(ServiceTokenRequest {})
        );
    }

    #[test]
    fn test_response_omits_empty_members() {
        let ok = RpcResponse::result(1, &AccessCheckResponse { access_check_status: 0 });
        let encoded = serde_json::to_string(&ok).unwrap();
        assert!(encoded.contains("\"access_check_status\":0"));
        assert!(!encoded.contains("error"));

        let failed = RpcResponse::error(2, "boom".into());
        let encoded = serde_json::to_string(&failed).unwrap();
        assert!(encoded.contains("\"error\":\"boom\""));
        assert!(!encoded.contains("result"));
    }

    #[test]
    fn test_plaintext_when_tls_unconfigured() {
        let config = AgentConfig::try_parse_from(["warden-agent"]).unwrap();
        assert!(build_tls_acceptor(&config).unwrap().is_none());
    }

    #[test]
    fn test_tls_with_missing_files_errors() {
        let config = AgentConfig::try_parse_from([
            "warden-agent",
            "--crt-path",
            "/nonexistent/server.crt",
            "--key-path",
            "/nonexistent/server.key",
        ])
        .unwrap();
        assert!(build_tls_acceptor(&config).is_err());
    }
}
