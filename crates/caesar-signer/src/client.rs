//! Client side of the signer's local RPC surface.
//!
//! One request/response in flight per call; the connection is reused
//! across calls and guarded by an async mutex so callers serialize at
//! the socket.

use crate::rpc::{
    RpcCode, RpcPayload, RpcRequest, RpcResponse, SessionStatusResponse, SignOrderRequest,
    SignOrderResponse,
};
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::Mutex as TokioMutex;

#[derive(Debug, Error)]
pub enum SignerClientError {
    #[error("signer unavailable: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("signer refused ({code:?}): {message}")]
    Rpc { code: RpcCode, message: String },
}

/// Connects to the signer daemon over its filesystem socket.
pub struct SignerClient {
    stream: TokioMutex<BufReader<UnixStream>>,
}

impl SignerClient {
    pub async fn connect(socket_path: impl AsRef<Path>) -> Result<Self, SignerClientError> {
        let stream = UnixStream::connect(socket_path).await?;
        Ok(Self {
            stream: TokioMutex::new(BufReader::new(stream)),
        })
    }

    pub async fn sign_order(
        &self,
        request: SignOrderRequest,
    ) -> Result<SignOrderResponse, SignerClientError> {
        match self.call(&RpcRequest::SignOrder(request)).await? {
            RpcPayload::SignOrder(response) => Ok(response),
            RpcPayload::Status(_) => {
                Err(SignerClientError::Protocol("unexpected status payload".into()))
            }
        }
    }

    pub async fn sign_cancel(
        &self,
        request: SignOrderRequest,
    ) -> Result<SignOrderResponse, SignerClientError> {
        match self.call(&RpcRequest::SignCancel(request)).await? {
            RpcPayload::SignOrder(response) => Ok(response),
            RpcPayload::Status(_) => {
                Err(SignerClientError::Protocol("unexpected status payload".into()))
            }
        }
    }

    pub async fn session_status(&self) -> Result<SessionStatusResponse, SignerClientError> {
        match self.call(&RpcRequest::GetSessionStatus).await? {
            RpcPayload::Status(response) => Ok(response),
            RpcPayload::SignOrder(_) => {
                Err(SignerClientError::Protocol("unexpected sign payload".into()))
            }
        }
    }

    async fn call(&self, request: &RpcRequest) -> Result<RpcPayload, SignerClientError> {
        let mut encoded = serde_json::to_string(request)
            .map_err(|e| SignerClientError::Protocol(e.to_string()))?;
        encoded.push('\n');

        let mut stream = self.stream.lock().await;
        stream.write_all(encoded.as_bytes()).await?;
        stream.flush().await?;

        let mut line = String::new();
        let read = stream.read_line(&mut line).await?;
        if read == 0 {
            return Err(SignerClientError::Protocol(
                "connection closed by signer".into(),
            ));
        }

        let response: RpcResponse = serde_json::from_str(line.trim_end())
            .map_err(|e| SignerClientError::Protocol(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(SignerClientError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response
            .ok
            .ok_or_else(|| SignerClientError::Protocol("empty response".into()))
    }
}
