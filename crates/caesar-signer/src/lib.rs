//! Isolated signer for Polymarket orders.
//!
//! Holds a short-lived session key in a sealed memory region, computes
//! EIP-712 digests, signs with secp256k1, and enforces per-session TTL
//! and cumulative notional limits. The only way in is the local RPC
//! surface over a filesystem socket; the signer never listens on a
//! network interface.

pub mod client;
pub mod eip712;
pub mod error;
pub mod rpc;
pub mod sealed;
pub mod session;

pub use client::{SignerClient, SignerClientError};
pub use eip712::{order_digest, DomainData, OrderData};
pub use error::{SignerError, SignerResult};
pub use rpc::{
    DomainPayload, OrderPayload, RpcCode, RpcError, RpcRequest, SidePayload, SigTypePayload,
    SignOrderRequest, SignOrderResponse, SignerServer, SessionStatusResponse,
};
pub use sealed::SealedKey;
pub use session::{SessionManager, SessionStatus, SignedOrder};
