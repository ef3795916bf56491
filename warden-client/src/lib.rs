//! Client SDK for the warden authorization sidecar.
//!
//! Speaks the agent's line-JSON RPC over TCP or TLS. One request is in
//! flight at a time per client; the sidecar sits on loopback, so the
//! round trip is the cost of a local syscall plus the decision itself.
//!
//! ```no_run
//! # async fn example() -> Result<(), warden_client::ClientError> {
//! let mut client = warden_client::Client::connect("127.0.0.1:10171").await?;
//! let status = client.check_access("v=S1;d=angler;...", "read", "angler:stuff").await?;
//! if status == 0 {
//!     // allowed
//! }
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid server name: {0}")]
    ServerName(String),
    #[error("unable to encode request: {0}")]
    Encode(serde_json::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("server error: {0}")]
    Remote(String),
}

// Wire messages, mirroring the agent's RPC surface.

#[derive(Debug, Serialize)]
struct AccessCheckRequest<'a> {
    token: &'a str,
    access: &'a str,
    resource: &'a str,
}

#[derive(Debug, Deserialize)]
struct AccessCheckResponse {
    access_check_status: i32,
}

#[derive(Debug, Serialize)]
struct ServiceTokenRequest {}

#[derive(Debug, Deserialize)]
struct ServiceTokenResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct RpcRequest<T: Serialize> {
    id: u64,
    method: &'static str,
    params: T,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: u64,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

pub struct Client {
    reader: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    next_id: u64,
}

impl Client {
    /// Connect over plaintext TCP.
    pub async fn connect(addr: &str) -> Result<Client, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Client::from_stream(stream))
    }

    /// Connect over TLS. `server_name` must match the agent's certificate;
    /// the connector carries the trust roots (and a client certificate
    /// when the agent requires mTLS).
    pub async fn connect_tls(
        addr: &str,
        server_name: &str,
        connector: TlsConnector,
    ) -> Result<Client, ClientError> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| ClientError::ServerName(server_name.to_string()))?;
        let stream = TcpStream::connect(addr).await?;
        let stream = connector.connect(name, stream).await?;
        Ok(Client::from_stream(stream))
    }

    /// Wrap an already-connected stream (unix sockets, test doubles).
    pub fn from_stream<S>(stream: S) -> Client
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Client {
            reader: BufReader::new(Box::new(reader)),
            writer: Box::new(writer),
            next_id: 1,
        }
    }

    /// Ask whether the bearer of `token` may perform `access` on
    /// `resource`. Returns the agent's status code; 0 is ALLOW, everything
    /// else is a deny with the reason encoded in the value.
    pub async fn check_access(
        &mut self,
        token: &str,
        access: &str,
        resource: &str,
    ) -> Result<i32, ClientError> {
        let result = self
            .call(
                "CheckAccessWithToken",
                AccessCheckRequest {
                    token,
                    access,
                    resource,
                },
            )
            .await?;
        let response: AccessCheckResponse = serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("malformed response: {e}")))?;
        Ok(response.access_check_status)
    }

    /// Fetch a role token for the agent's own service identity.
    pub async fn get_service_token(&mut self) -> Result<String, ClientError> {
        let result = self.call("GetServiceToken", ServiceTokenRequest {}).await?;
        let response: ServiceTokenResponse = serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("malformed response: {e}")))?;
        Ok(response.token)
    }

    async fn call<T: Serialize>(
        &mut self,
        method: &'static str,
        params: T,
    ) -> Result<serde_json::Value, ClientError> {
        let id = self.next_id;
        self.next_id += 1;

        let mut frame = serde_json::to_string(&RpcRequest { id, method, params })
            .map_err(ClientError::Encode)?;
        frame.push('\n');
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.flush().await?;

        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(ClientError::Protocol("connection closed".to_string()));
        }
        let response: RpcResponse = serde_json::from_str(&line)
            .map_err(|e| ClientError::Protocol(format!("malformed frame: {e}")))?;
        if response.id != id {
            return Err(ClientError::Protocol(format!(
                "response id {} does not match request id {id}",
                response.id
            )));
        }
        if let Some(error) = response.error {
            return Err(ClientError::Remote(error));
        }
        response
            .result
            .ok_or_else(|| ClientError::Protocol("response carries neither result nor error".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = RpcRequest {
            id: 3,
            method: "CheckAccessWithToken",
            params: AccessCheckRequest {
                token: "t",
                access: "read",
                resource: "angler:stuff",
            },
        };
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["id"], 3);
        assert_eq!(encoded["method"], "CheckAccessWithToken");
        assert_eq!(encoded["params"]["resource"], "angler:stuff");
    }

    #[test]
    fn test_response_decoding() {
        let ok: RpcResponse =
            serde_json::from_str(r#"{"id":1,"result":{"access_check_status":7}}"#).unwrap();
        assert_eq!(ok.id, 1);
        assert!(ok.error.is_none());

        let failed: RpcResponse =
            serde_json::from_str(r#"{"id":2,"error":"no such method"}"#).unwrap();
        assert_eq!(failed.error.as_deref(), Some("no such method"));
        assert!(failed.result.is_none());
    }

    #[tokio::test]
    async fn test_call_over_duplex_stream() {
        let (client_side, mut server_side) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            let (reader, mut writer) = tokio::io::split(&mut server_side);
            let mut lines = BufReader::new(reader).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let request: serde_json::Value = serde_json::from_str(&line).unwrap();
            assert_eq!(request["method"], "CheckAccessWithToken");
            let reply = format!(
                "{}\n",
                serde_json::json!({"id": request["id"], "result": {"access_check_status": 0}})
            );
            writer.write_all(reply.as_bytes()).await.unwrap();
        });

        let mut client = Client::from_stream(client_side);
        let status = client.check_access("tok", "read", "angler:stuff").await.unwrap();
        assert_eq!(status, 0);
        server.await.unwrap();
    }
}
