//! Local RPC surface: newline-delimited JSON over a Unix socket.
//!
//! The signer exposes `sign_order`, `sign_cancel`, and
//! `get_session_status` on a filesystem socket with owner-only
//! permissions. There is no network listener. Error mapping:
//! session errors -> `failed_precondition`, limit -> `resource_exhausted`,
//! malformed fields -> `invalid_argument`, everything else -> `internal`.

use crate::eip712::{DomainData, OrderData};
use crate::error::{SignerError, SignerResult};
use crate::session::{SessionManager, SignedOrder};
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Requests understood by the signer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum RpcRequest {
    SignOrder(SignOrderRequest),
    SignCancel(SignOrderRequest),
    GetSessionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignOrderRequest {
    pub domain: DomainPayload,
    pub order: OrderPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainPayload {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPayload {
    /// uint256 decimal string; defaults to zero.
    #[serde(default)]
    pub salt: String,
    pub maker: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub expiration: u64,
    pub nonce: u64,
    pub fee_rate_bps: u32,
    pub side: SidePayload,
    pub signature_type: SigTypePayload,
}

/// Order side on the wire. Unknown values encode as buy (0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidePayload {
    Buy,
    Sell,
    #[serde(other)]
    Unknown,
}

impl SidePayload {
    pub fn as_u8(self) -> u8 {
        match self {
            SidePayload::Sell => 1,
            SidePayload::Buy | SidePayload::Unknown => 0,
        }
    }
}

/// Signature type on the wire. Unknown values encode as EOA (0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigTypePayload {
    Eoa,
    PolyProxy,
    PolyGnosisSafe,
    #[serde(other)]
    Unknown,
}

impl SigTypePayload {
    pub fn as_u8(self) -> u8 {
        match self {
            SigTypePayload::PolyProxy => 1,
            SigTypePayload::PolyGnosisSafe => 2,
            SigTypePayload::Eoa | SigTypePayload::Unknown => 0,
        }
    }
}

/// One response per request line: either `ok` or `error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<RpcPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    fn ok(payload: RpcPayload) -> Self {
        Self {
            ok: Some(payload),
            error: None,
        }
    }

    fn err(code: RpcCode, message: impl Into<String>) -> Self {
        Self {
            ok: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcPayload {
    SignOrder(SignOrderResponse),
    Status(SessionStatusResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignOrderResponse {
    /// 0x-prefixed 65-byte signature.
    pub signature_hex: String,
    pub signer_address: String,
    pub signed_at_ns: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub active: bool,
    pub ttl_seconds: i64,
    pub max_notional: String,
    pub notional_used: String,
    pub signer_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: RpcCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcCode {
    FailedPrecondition,
    ResourceExhausted,
    InvalidArgument,
    Internal,
}

impl From<&SignerError> for RpcCode {
    fn from(err: &SignerError) -> Self {
        match err {
            SignerError::NoSession | SignerError::SessionExpired => RpcCode::FailedPrecondition,
            SignerError::LimitExceeded => RpcCode::ResourceExhausted,
            SignerError::InvalidArgument(_) => RpcCode::InvalidArgument,
            _ => RpcCode::Internal,
        }
    }
}

/// UDS server exposing the signer operations.
pub struct SignerServer {
    socket_path: PathBuf,
    listener: UnixListener,
    session: Arc<SessionManager>,
}

impl SignerServer {
    /// Bind the socket: parent directory 0700, any stale socket from a
    /// previous run removed, socket file chmod 0600.
    pub fn bind(socket_path: impl Into<PathBuf>, session: Arc<SessionManager>) -> SignerResult<Self> {
        let socket_path = socket_path.into();

        if let Some(dir) = socket_path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(dir)?;
            }
        }

        match std::fs::remove_file(&socket_path) {
            Ok(()) => debug!(path = %socket_path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&socket_path)?;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;

        info!(path = %socket_path.display(), "signer listening");
        Ok(Self {
            socket_path,
            listener,
            session,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until cancellation, then drain in-flight
    /// calls and unlink the socket.
    pub async fn serve(&self, shutdown: CancellationToken) -> SignerResult<()> {
        let mut conns = JoinSet::new();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                // Reap finished connection tasks as they complete.
                Some(_) = conns.join_next(), if !conns.is_empty() => {}
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let session = Arc::clone(&self.session);
                            let conn_shutdown = shutdown.clone();
                            conns.spawn(async move {
                                if let Err(e) = handle_conn(stream, session, conn_shutdown).await {
                                    debug!(error = %e, "connection ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }

        // Graceful drain: no new connections, let in-flight ones finish.
        while conns.join_next().await.is_some() {}
        let _ = std::fs::remove_file(&self.socket_path);
        info!("signer stopped");
        Ok(())
    }
}

async fn handle_conn(
    stream: UnixStream,
    session: Arc<SessionManager>,
    shutdown: CancellationToken,
) -> SignerResult<()> {
    let mut stream = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            read = stream.read_line(&mut line) => read?,
        };
        if read == 0 {
            return Ok(());
        }

        let response = match serde_json::from_str::<RpcRequest>(line.trim_end()) {
            Ok(request) => handle_request(&session, request),
            Err(e) => RpcResponse::err(RpcCode::InvalidArgument, format!("malformed request: {e}")),
        };

        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        stream.write_all(encoded.as_bytes()).await?;
        stream.flush().await?;
    }
}

fn handle_request(session: &SessionManager, request: RpcRequest) -> RpcResponse {
    match request {
        RpcRequest::SignOrder(req) => sign(session, &req, SessionManager::sign_order),
        RpcRequest::SignCancel(req) => sign(session, &req, SessionManager::sign_cancel),
        RpcRequest::GetSessionStatus => {
            let status = session.status();
            RpcResponse::ok(RpcPayload::Status(SessionStatusResponse {
                active: status.active,
                ttl_seconds: status.ttl_seconds,
                max_notional: status.max_notional,
                notional_used: status.notional_used,
                signer_address: status.signer_address,
            }))
        }
    }
}

fn sign(
    session: &SessionManager,
    req: &SignOrderRequest,
    op: fn(&SessionManager, &DomainData, &OrderData) -> SignerResult<SignedOrder>,
) -> RpcResponse {
    let (domain, order) = match decode_request(req) {
        Ok(decoded) => decoded,
        Err(e) => return RpcResponse::err(RpcCode::from(&e), e.to_string()),
    };

    match op(session, &domain, &order) {
        Ok(signed) => RpcResponse::ok(RpcPayload::SignOrder(SignOrderResponse {
            signature_hex: format!("0x{}", hex::encode(signed.signature)),
            signer_address: format!("{:?}", signed.signer_address),
            signed_at_ns: signed.signed_at_ns,
        })),
        Err(e) => RpcResponse::err(RpcCode::from(&e), e.to_string()),
    }
}

fn decode_request(req: &SignOrderRequest) -> SignerResult<(DomainData, OrderData)> {
    let domain = DomainData {
        name: req.domain.name.clone(),
        version: req.domain.version.clone(),
        chain_id: U256::from(req.domain.chain_id),
        verifying_contract: parse_address(&req.domain.verifying_contract, "verifying_contract")?,
    };

    let maker = parse_address(&req.order.maker, "maker")?;
    let order = OrderData {
        salt: parse_u256_or_zero(&req.order.salt, "salt")?,
        maker,
        // The signing key acts for the maker.
        signer: maker,
        taker: parse_address(&req.order.taker, "taker")?,
        token_id: parse_u256(&req.order.token_id, "token_id")?,
        maker_amount: parse_u256(&req.order.maker_amount, "maker_amount")?,
        taker_amount: parse_u256(&req.order.taker_amount, "taker_amount")?,
        expiration: U256::from(req.order.expiration),
        nonce: U256::from(req.order.nonce),
        fee_rate_bps: U256::from(req.order.fee_rate_bps),
        side: req.order.side.as_u8(),
        signature_type: req.order.signature_type.as_u8(),
    };

    Ok((domain, order))
}

fn parse_address(s: &str, field: &str) -> SignerResult<Address> {
    s.parse::<Address>()
        .map_err(|_| SignerError::InvalidArgument(format!("invalid {field}: {s}")))
}

fn parse_u256(s: &str, field: &str) -> SignerResult<U256> {
    s.parse::<U256>()
        .map_err(|_| SignerError::InvalidArgument(format!("invalid {field}: {s}")))
}

fn parse_u256_or_zero(s: &str, field: &str) -> SignerResult<U256> {
    if s.is_empty() {
        return Ok(U256::ZERO);
    }
    parse_u256(s, field)
}
