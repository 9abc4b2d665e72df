//! Chain-appropriate transfer identifiers
//!
//! A transfer is identified by whatever its source chain naturally produces:
//!
//! ```text
//! EVM     0x<64 hex>                 transaction hash
//! TVM     <workchain>:<64 hex>       contract address (0 or -1 workchain)
//! Solana  <base58, 64 bytes>         transaction signature
//! ```
//!
//! Parsing is strict: a route whose identifier does not match the format of
//! its declared network kind is rejected before any pipeline exists.

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::types::NetworkKind;

/// Identifier format errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid EVM transaction hash: {0}")]
    InvalidEvmHash(String),
    #[error("invalid EVM address: {0}")]
    InvalidEvmAddress(String),
    #[error("invalid TVM address: {0}")]
    InvalidTvmAddress(String),
    #[error("invalid Solana signature: {0}")]
    InvalidSolanaSignature(String),
}

// ============================================================================
// TVM Address
// ============================================================================

/// Account address on the TVM hub chain (`workchain:account`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TvmAddress {
    pub workchain: i8,
    pub account: [u8; 32],
}

impl TvmAddress {
    pub const fn new(workchain: i8, account: [u8; 32]) -> Self {
        Self { workchain, account }
    }

    /// Parse `0:<64 hex>` or `-1:<64 hex>`
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let (wc, account_hex) = s
            .split_once(':')
            .ok_or_else(|| AddressError::InvalidTvmAddress(format!("missing workchain in {}", s)))?;

        let workchain: i8 = wc
            .parse()
            .map_err(|_| AddressError::InvalidTvmAddress(format!("bad workchain {}", wc)))?;
        if workchain != 0 && workchain != -1 {
            return Err(AddressError::InvalidTvmAddress(format!(
                "unsupported workchain {}",
                workchain
            )));
        }

        if account_hex.len() != 64 {
            return Err(AddressError::InvalidTvmAddress(format!(
                "account must be 64 hex chars, got {}",
                account_hex.len()
            )));
        }
        let bytes = hex::decode(account_hex)
            .map_err(|e| AddressError::InvalidTvmAddress(e.to_string()))?;

        let mut account = [0u8; 32];
        account.copy_from_slice(&bytes);
        Ok(Self { workchain, account })
    }

    /// Workchain byte followed by the 32-byte account id
    pub fn to_bytes(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        out[0] = self.workchain as u8;
        out[1..].copy_from_slice(&self.account);
        out
    }
}

impl fmt::Display for TvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.workchain, hex::encode(self.account))
    }
}

impl FromStr for TvmAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TvmAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TvmAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Solana Signature
// ============================================================================

/// Solana transaction signature (64 bytes, base58 on the wire)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SolanaSignature(pub [u8; 64]);

impl SolanaSignature {
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| AddressError::InvalidSolanaSignature(e.to_string()))?;
        if bytes.len() != 64 {
            return Err(AddressError::InvalidSolanaSignature(format!(
                "expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        let mut sig = [0u8; 64];
        sig.copy_from_slice(&bytes);
        Ok(Self(sig))
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Display for SolanaSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for SolanaSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SolanaSignature({})", self)
    }
}

impl Serialize for SolanaSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SolanaSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Transfer Identity
// ============================================================================

/// Identifier of the source deposit; immutable idempotency key for polling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferIdentity {
    /// EVM deposit transaction hash
    EvmTransaction(B256),
    /// TVM contract created by the deposit
    TvmContract(TvmAddress),
    /// Solana deposit transaction signature
    SolanaSignature(SolanaSignature),
}

impl TransferIdentity {
    /// Parse an identifier according to the source network kind
    pub fn parse(kind: NetworkKind, s: &str) -> Result<Self, AddressError> {
        match kind {
            NetworkKind::Evm => parse_evm_tx_hash(s).map(Self::EvmTransaction),
            NetworkKind::Tvm => TvmAddress::parse(s).map(Self::TvmContract),
            NetworkKind::Solana => SolanaSignature::parse(s).map(Self::SolanaSignature),
        }
    }

    pub fn kind(&self) -> NetworkKind {
        match self {
            Self::EvmTransaction(_) => NetworkKind::Evm,
            Self::TvmContract(_) => NetworkKind::Tvm,
            Self::SolanaSignature(_) => NetworkKind::Solana,
        }
    }

    /// Raw bytes used when the identity takes part in a hash
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::EvmTransaction(hash) => hash.to_vec(),
            Self::TvmContract(addr) => addr.to_bytes().to_vec(),
            Self::SolanaSignature(sig) => sig.0.to_vec(),
        }
    }
}

impl fmt::Display for TransferIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EvmTransaction(hash) => write!(f, "{}", hash),
            Self::TvmContract(addr) => write!(f, "{}", addr),
            Self::SolanaSignature(sig) => write!(f, "{}", sig),
        }
    }
}

impl Serialize for TransferIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parse a `0x`-prefixed 32-byte transaction hash
pub fn parse_evm_tx_hash(s: &str) -> Result<B256, AddressError> {
    let hex_part = s
        .strip_prefix("0x")
        .ok_or_else(|| AddressError::InvalidEvmHash(format!("missing 0x prefix: {}", s)))?;
    if hex_part.len() != 64 {
        return Err(AddressError::InvalidEvmHash(format!(
            "expected 64 hex chars, got {}",
            hex_part.len()
        )));
    }
    B256::from_str(s).map_err(|e| AddressError::InvalidEvmHash(e.to_string()))
}

/// Parse a `0x`-prefixed 20-byte EVM address
pub fn parse_evm_address(s: &str) -> Result<Address, AddressError> {
    if !s.starts_with("0x") || s.len() != 42 {
        return Err(AddressError::InvalidEvmAddress(format!(
            "must be 42 chars with 0x prefix: {}",
            s
        )));
    }
    Address::from_str(s).map_err(|e| AddressError::InvalidEvmAddress(e.to_string()))
}
