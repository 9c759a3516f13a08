//! Session manager: sealed key, TTL, and cumulative notional limit.
//!
//! At most one session is active per signer process. Every sign
//! operation runs the full check -> open -> sign -> wipe -> commit
//! sequence under one lock, so signer operations are strictly
//! serialized and `notional_used` updates are linearizable.

use crate::eip712::{order_digest, DomainData, OrderData};
use crate::error::{SignerError, SignerResult};
use crate::sealed::SealedKey;
use alloy::primitives::{Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Injectable time source for deterministic tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Result of a successful sign operation.
#[derive(Debug, Clone)]
pub struct SignedOrder {
    /// 65 bytes: r (32) || s (32) || v (1), with v in {27, 28}.
    pub signature: [u8; 65],
    pub signer_address: Address,
    pub signed_at_ns: i64,
}

/// Read-only snapshot of the session state. Zeroed and inactive when
/// no session exists or the TTL has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub active: bool,
    pub ttl_seconds: i64,
    /// USDC atomic units as a decimal string.
    pub max_notional: String,
    pub notional_used: String,
    pub signer_address: String,
}

impl SessionStatus {
    fn inactive() -> Self {
        Self {
            active: false,
            ttl_seconds: 0,
            max_notional: "0".to_string(),
            notional_used: "0".to_string(),
            signer_address: String::new(),
        }
    }
}

struct ActiveSession {
    key: SealedKey,
    address: Address,
    expires_at: DateTime<Utc>,
    /// USDC atomic units (6 decimals).
    max_notional: U256,
    notional_used: U256,
}

/// Holds the decrypted session key in a sealed region and enforces
/// TTL and cumulative notional limits on every sign.
pub struct SessionManager {
    inner: Mutex<Option<ActiveSession>>,
    ttl: Duration,
    now: Clock,
}

impl SessionManager {
    /// Create a manager with the given session TTL. No session is
    /// active until [`SessionManager::activate`].
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(Utc::now))
    }

    pub fn with_clock(ttl: Duration, now: Clock) -> Self {
        Self {
            inner: Mutex::new(None),
            ttl,
            now,
        }
    }

    /// Seal externally-decrypted key bytes, derive the signing address,
    /// set expiry, and reset the notional counter. Replaces any prior
    /// session; the caller must wipe its own copy of `key_bytes`.
    pub fn activate(&self, key_bytes: &[u8], max_notional: U256) -> SignerResult<Address> {
        let signer = PrivateKeySigner::from_slice(key_bytes)
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let address = signer.address();
        drop(signer);

        let ttl = ChronoDuration::from_std(self.ttl)
            .map_err(|e| SignerError::InvalidArgument(format!("ttl out of range: {e}")))?;

        let session = ActiveSession {
            key: SealedKey::seal(key_bytes),
            address,
            expires_at: (self.now)() + ttl,
            max_notional,
            notional_used: U256::ZERO,
        };

        // The displaced session's sealed region zeroizes on drop.
        *self.inner.lock() = Some(session);
        info!(address = %address, "session activated");
        Ok(address)
    }

    /// Sign an order. Enforcement order: session active, TTL,
    /// notional limit, then sign. `notional_used` advances only after
    /// a successful signature; the order notional is its makerAmount
    /// in USDC atomic units.
    pub fn sign_order(&self, domain: &DomainData, order: &OrderData) -> SignerResult<SignedOrder> {
        let mut guard = self.inner.lock();
        let session = guard.as_mut().ok_or(SignerError::NoSession)?;

        let now = (self.now)();
        if now >= session.expires_at {
            warn!("session expired, destroying");
            *guard = None;
            return Err(SignerError::SessionExpired);
        }

        let new_total = session
            .notional_used
            .checked_add(order.maker_amount)
            .ok_or(SignerError::LimitExceeded)?;
        if new_total > session.max_notional {
            return Err(SignerError::LimitExceeded);
        }

        let digest = order_digest(domain, order);
        let signed = sign_digest(&session.key, session.address, digest, now)?;

        session.notional_used = new_total;
        Ok(signed)
    }

    /// Sign the digest of an existing order to authorize its
    /// cancellation. Cancels never add exposure, so the notional
    /// counter is untouched; session-active and TTL still apply.
    pub fn sign_cancel(&self, domain: &DomainData, order: &OrderData) -> SignerResult<SignedOrder> {
        let mut guard = self.inner.lock();
        let session = guard.as_mut().ok_or(SignerError::NoSession)?;

        let now = (self.now)();
        if now >= session.expires_at {
            warn!("session expired, destroying");
            *guard = None;
            return Err(SignerError::SessionExpired);
        }

        let digest = order_digest(domain, order);
        sign_digest(&session.key, session.address, digest, now)
    }

    /// Session status; zero values and `active = false` whenever no
    /// session exists or the TTL has elapsed.
    pub fn status(&self) -> SessionStatus {
        let guard = self.inner.lock();
        let session = match guard.as_ref() {
            Some(session) => session,
            None => return SessionStatus::inactive(),
        };

        let now = (self.now)();
        if now >= session.expires_at {
            return SessionStatus::inactive();
        }

        SessionStatus {
            active: true,
            ttl_seconds: (session.expires_at - now).num_seconds().max(0),
            max_notional: session.max_notional.to_string(),
            notional_used: session.notional_used.to_string(),
            signer_address: format!("{:?}", session.address),
        }
    }

    /// Wipe the session: the sealed key region is zeroized and all
    /// attributes reset.
    pub fn destroy(&self) {
        *self.inner.lock() = None;
        info!("session destroyed");
    }
}

/// The critical section: open the sealed key, sign, wipe the copy.
fn sign_digest(
    key: &SealedKey,
    address: Address,
    digest: B256,
    now: DateTime<Utc>,
) -> SignerResult<SignedOrder> {
    let plaintext = key.open()?;
    let signer = PrivateKeySigner::from_slice(&plaintext)
        .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
    drop(plaintext);

    let sig = signer
        .sign_hash_sync(&digest)
        .map_err(|e| SignerError::Signing(e.to_string()))?;

    let mut out = [0u8; 65];
    out[..32].copy_from_slice(&sig.r().to_be_bytes::<32>());
    out[32..64].copy_from_slice(&sig.s().to_be_bytes::<32>());
    // Raw {0,1} recovery id to Ethereum's {27,28}.
    out[64] = if sig.v() { 28 } else { 27 };

    Ok(SignedOrder {
        signature: out,
        signer_address: address,
        signed_at_ns: now.timestamp_nanos_opt().unwrap_or_default(),
    })
}
