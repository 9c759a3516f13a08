//! EIP-712 digest computation for Polymarket CTF exchange orders.
//!
//! The digest is `keccak256(0x19 || 0x01 || domainSeparator || structHash)`.
//! Addresses and integers are zero-left-padded to 32 bytes; strings are
//! hashed; `side` and `signatureType` are uint8 values widened to 32
//! bytes. Type hashes are precomputed once.

use alloy::primitives::{keccak256, Address, B256, U256};
use once_cell::sync::Lazy;

const DOMAIN_TYPE: &[u8] =
    b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

const ORDER_TYPE: &[u8] = b"Order(uint256 salt,address maker,address signer,address taker,uint256 tokenId,uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,uint256 feeRateBps,uint8 side,uint8 signatureType)";

static DOMAIN_TYPE_HASH: Lazy<B256> = Lazy::new(|| keccak256(DOMAIN_TYPE));
static ORDER_TYPE_HASH: Lazy<B256> = Lazy::new(|| keccak256(ORDER_TYPE));

/// EIP-712 domain separator fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainData {
    pub name: String,
    pub version: String,
    pub chain_id: U256,
    pub verifying_contract: Address,
}

/// Fields of the Order struct in declared order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderData {
    pub salt: U256,
    pub maker: Address,
    pub signer: Address,
    pub taker: Address,
    pub token_id: U256,
    pub maker_amount: U256,
    pub taker_amount: U256,
    pub expiration: U256,
    pub nonce: U256,
    pub fee_rate_bps: U256,
    /// buy = 0, sell = 1.
    pub side: u8,
    /// EOA = 0, PolyProxy = 1, PolyGnosisSafe = 2.
    pub signature_type: u8,
}

/// Domain separator hash.
pub fn hash_domain(domain: &DomainData) -> B256 {
    let mut data = Vec::with_capacity(5 * 32);
    data.extend_from_slice(DOMAIN_TYPE_HASH.as_slice());
    data.extend_from_slice(keccak256(domain.name.as_bytes()).as_slice());
    data.extend_from_slice(keccak256(domain.version.as_bytes()).as_slice());
    data.extend_from_slice(&domain.chain_id.to_be_bytes::<32>());
    data.extend_from_slice(&pad_address(domain.verifying_contract));
    keccak256(&data)
}

/// Struct hash over the order fields in declared order.
pub fn hash_order(order: &OrderData) -> B256 {
    let mut data = Vec::with_capacity(13 * 32);
    data.extend_from_slice(ORDER_TYPE_HASH.as_slice());
    data.extend_from_slice(&order.salt.to_be_bytes::<32>());
    data.extend_from_slice(&pad_address(order.maker));
    data.extend_from_slice(&pad_address(order.signer));
    data.extend_from_slice(&pad_address(order.taker));
    data.extend_from_slice(&order.token_id.to_be_bytes::<32>());
    data.extend_from_slice(&order.maker_amount.to_be_bytes::<32>());
    data.extend_from_slice(&order.taker_amount.to_be_bytes::<32>());
    data.extend_from_slice(&order.expiration.to_be_bytes::<32>());
    data.extend_from_slice(&order.nonce.to_be_bytes::<32>());
    data.extend_from_slice(&order.fee_rate_bps.to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(order.side).to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(order.signature_type).to_be_bytes::<32>());
    keccak256(&data)
}

/// Final signing digest for an order under a domain.
pub fn order_digest(domain: &DomainData, order: &OrderData) -> B256 {
    let domain_separator = hash_domain(domain);
    let struct_hash = hash_order(order);

    let mut data = Vec::with_capacity(2 + 64);
    data.extend_from_slice(&[0x19, 0x01]);
    data.extend_from_slice(domain_separator.as_slice());
    data.extend_from_slice(struct_hash.as_slice());
    keccak256(&data)
}

fn pad_address(addr: Address) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(addr.as_slice());
    out
}
