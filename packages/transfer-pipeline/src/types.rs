//! Common types for transfer pipelines
//!
//! Networks, topologies, per-phase state and the resolved route configuration
//! shared by every topology variant.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::address::TvmAddress;
use crate::capability::AssetRoute;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkParseError {
    #[error("unknown network kind: {0}")]
    UnknownKind(String),
    #[error("network id must look like <kind>-<chainId>: {0}")]
    Malformed(String),
}

// ============================================================================
// Networks
// ============================================================================

/// Network family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Evm,
    Tvm,
    Solana,
}

impl NetworkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkKind::Evm => "evm",
            NetworkKind::Tvm => "tvm",
            NetworkKind::Solana => "solana",
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkKind {
    type Err = NetworkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "evm" => Ok(NetworkKind::Evm),
            "tvm" => Ok(NetworkKind::Tvm),
            "solana" => Ok(NetworkKind::Solana),
            other => Err(NetworkParseError::UnknownKind(other.to_string())),
        }
    }
}

/// A concrete network: family plus chain id, rendered as `evm-1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId {
    pub kind: NetworkKind,
    pub chain_id: String,
}

impl NetworkId {
    pub fn new(kind: NetworkKind, chain_id: impl Into<String>) -> Self {
        Self {
            kind,
            chain_id: chain_id.into(),
        }
    }

    pub fn evm(chain_id: impl Into<String>) -> Self {
        Self::new(NetworkKind::Evm, chain_id)
    }

    pub fn tvm(chain_id: impl Into<String>) -> Self {
        Self::new(NetworkKind::Tvm, chain_id)
    }

    pub fn solana(chain_id: impl Into<String>) -> Self {
        Self::new(NetworkKind::Solana, chain_id)
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.chain_id)
    }
}

impl FromStr for NetworkId {
    type Err = NetworkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, chain_id) = s
            .split_once('-')
            .ok_or_else(|| NetworkParseError::Malformed(s.to_string()))?;
        if chain_id.is_empty() {
            return Err(NetworkParseError::Malformed(s.to_string()));
        }
        Ok(Self::new(kind.parse()?, chain_id))
    }
}

impl Serialize for NetworkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NetworkId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Topology
// ============================================================================

/// Shape of a transfer between two networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    EvmTvm,
    TvmEvm,
    /// Two hops through the hub
    EvmEvm,
    SolanaTvm,
    TvmSolana,
    /// EVM to TVM with a credit processor providing instant liquidity
    Credit,
}

impl Topology {
    /// Resolve the topology for a network pair; `credit` only applies to EVM→TVM
    pub fn resolve(from: NetworkKind, to: NetworkKind, credit: bool) -> Option<Self> {
        match (from, to) {
            (NetworkKind::Evm, NetworkKind::Tvm) if credit => Some(Topology::Credit),
            (NetworkKind::Evm, NetworkKind::Tvm) => Some(Topology::EvmTvm),
            (NetworkKind::Tvm, NetworkKind::Evm) => Some(Topology::TvmEvm),
            (NetworkKind::Evm, NetworkKind::Evm) => Some(Topology::EvmEvm),
            (NetworkKind::Solana, NetworkKind::Tvm) => Some(Topology::SolanaTvm),
            (NetworkKind::Tvm, NetworkKind::Solana) => Some(Topology::TvmSolana),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::EvmTvm => "evm-tvm",
            Topology::TvmEvm => "tvm-evm",
            Topology::EvmEvm => "evm-evm",
            Topology::SolanaTvm => "solana-tvm",
            Topology::TvmSolana => "tvm-solana",
            Topology::Credit => "credit",
        }
    }

    /// Network family that produces the transfer identity
    pub fn source_kind(&self) -> NetworkKind {
        match self {
            Topology::EvmTvm | Topology::EvmEvm | Topology::Credit => NetworkKind::Evm,
            Topology::TvmEvm | Topology::TvmSolana => NetworkKind::Tvm,
            Topology::SolanaTvm => NetworkKind::Solana,
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of a route a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

// ============================================================================
// Phase State
// ============================================================================

/// Status of a single phase: `disabled → pending → {confirmed | rejected}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    #[default]
    Disabled,
    Pending,
    Confirmed,
    Rejected,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Disabled => "disabled",
            PhaseStatus::Pending => "pending",
            PhaseStatus::Confirmed => "confirmed",
            PhaseStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PhaseStatus::Confirmed | PhaseStatus::Rejected)
    }

    /// Whether moving to `next` is a forward edge
    pub fn can_advance_to(&self, next: PhaseStatus) -> bool {
        match (self, next) {
            (current, next) if *current == next => false,
            (current, _) if current.is_terminal() => false,
            (PhaseStatus::Pending, PhaseStatus::Disabled) => false,
            _ => true,
        }
    }

    /// Apply `next` if it is a forward edge; returns whether the status changed
    pub fn advance(&mut self, next: PhaseStatus) -> bool {
        if self.can_advance_to(next) {
            *self = next;
            true
        } else {
            false
        }
    }

    /// Undo an optimistic `pending` after a failed action
    pub fn rollback(&mut self) -> bool {
        if *self == PhaseStatus::Pending {
            *self = PhaseStatus::Disabled;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source-chain confirmation depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransferState {
    pub status: PhaseStatus,
    pub confirmed_blocks_count: u64,
    /// Required depth; `None` until fetched from the event configuration
    pub event_blocks_to_confirm: Option<u64>,
}

impl TransferState {
    /// Record an observed confirmation count; never decreases
    pub fn observe_confirmations(&mut self, count: u64) -> bool {
        if count > self.confirmed_blocks_count {
            self.confirmed_blocks_count = count;
            true
        } else {
            false
        }
    }

    pub fn has_enough_confirmations(&self) -> bool {
        self.event_blocks_to_confirm
            .is_some_and(|required| self.confirmed_blocks_count >= required)
    }

    /// Confirmations have run past `event_blocks_to_confirm * multiplier`
    pub fn is_stuck(&self, multiplier: u64) -> bool {
        self.event_blocks_to_confirm.is_some_and(|required| {
            self.confirmed_blocks_count > required.saturating_mul(multiplier)
        })
    }
}

/// Relay event phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrepareState {
    pub status: PhaseStatus,
    pub is_deployed: bool,
    pub is_deploying: bool,
    /// Relay round of the event is behind the current round
    pub is_outdated: bool,
    pub is_broadcasting: bool,
    /// Destination token wallet or account is being provisioned
    pub is_token_deploying: bool,
}

/// Destination settlement phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReleaseState {
    pub status: PhaseStatus,
    pub is_released: bool,
}

// ============================================================================
// Credit Processor
// ============================================================================

/// Lifecycle of a credit processor; order matters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CreditProcessorState {
    Created,
    EventNotDeployed,
    EventDeployInProgress,
    EventConfirmed,
    EventRejected,
    CheckingAmount,
    CalculateSwap,
    SwapInProgress,
    SwapFailed,
    SwapUnknown,
    UnwrapInProgress,
    UnwrapFailed,
    ProcessRequiresGas,
    Processed,
    Cancelled,
}

impl CreditProcessorState {
    const ALL: [CreditProcessorState; 15] = [
        CreditProcessorState::Created,
        CreditProcessorState::EventNotDeployed,
        CreditProcessorState::EventDeployInProgress,
        CreditProcessorState::EventConfirmed,
        CreditProcessorState::EventRejected,
        CreditProcessorState::CheckingAmount,
        CreditProcessorState::CalculateSwap,
        CreditProcessorState::SwapInProgress,
        CreditProcessorState::SwapFailed,
        CreditProcessorState::SwapUnknown,
        CreditProcessorState::UnwrapInProgress,
        CreditProcessorState::UnwrapFailed,
        CreditProcessorState::ProcessRequiresGas,
        CreditProcessorState::Processed,
        CreditProcessorState::Cancelled,
    ];

    /// Decode the on-chain ordinal
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Prepare status derived from the processor state
    pub fn prepare_status(&self) -> PhaseStatus {
        if *self == CreditProcessorState::EventRejected {
            PhaseStatus::Rejected
        } else if *self >= CreditProcessorState::EventConfirmed {
            PhaseStatus::Confirmed
        } else if *self >= CreditProcessorState::EventDeployInProgress {
            PhaseStatus::Pending
        } else {
            PhaseStatus::Disabled
        }
    }

    /// Release status derived from the processor state
    pub fn release_status(&self) -> PhaseStatus {
        match self {
            CreditProcessorState::Processed => PhaseStatus::Confirmed,
            CreditProcessorState::Cancelled | CreditProcessorState::EventRejected => {
                PhaseStatus::Rejected
            }
            s if *s > CreditProcessorState::EventConfirmed => PhaseStatus::Pending,
            _ => PhaseStatus::Disabled,
        }
    }
}

// ============================================================================
// Pending Withdrawals
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingWithdrawalId {
    /// EVM recipient the withdrawal is queued for
    pub recipient: String,
    pub id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ApproveStatus {
    #[default]
    NotRequired,
    Required,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    #[default]
    Open,
    Close,
}

/// Delayed EVM release awaiting a bounty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWithdrawal {
    pub id: PendingWithdrawalId,
    /// Base units of the destination token
    pub amount: u128,
    pub bounty: u128,
    pub recipient: String,
    pub approve_status: ApproveStatus,
    pub status: WithdrawalStatus,
}

impl PendingWithdrawal {
    pub fn is_closed(&self) -> bool {
        self.status == WithdrawalStatus::Close
    }
}

// ============================================================================
// Pipeline Config
// ============================================================================

/// Resolved route a pipeline runs over; read-only to the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub left: NetworkId,
    pub right: NetworkId,
    pub hub: NetworkId,
    /// Token root on the hub
    pub token_root: TvmAddress,
    /// Token originates on the hub; no vault holds it on either side
    #[serde(default)]
    pub tvm_native: bool,
    pub left_route: AssetRoute,
    pub right_route: AssetRoute,
}

impl PipelineConfig {
    pub fn route(&self, side: Side) -> &AssetRoute {
        match side {
            Side::Left => &self.left_route,
            Side::Right => &self.right_route,
        }
    }

    pub fn network(&self, side: Side) -> &NetworkId {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}
