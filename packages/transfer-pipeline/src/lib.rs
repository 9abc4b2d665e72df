//! Transfer Pipeline: cross-chain transfer tracking for the hub bridge
//!
//! A single logical transfer moves through independently finalized on-chain
//! events: a deposit on the source chain, a relay event proving it, and a
//! release on the destination chain. This crate models that lifecycle as a
//! family of state machines:
//!
//! - **Types** - Networks, identities, phase states and the route config
//! - **Address** - EVM / TVM / Solana identifier parsing and validation
//! - **Hash** - Event vote data encoding and derived event addresses
//! - **Capability** - Wallet, chain gateway and asset registry traits
//! - **Pipeline** - Shared phase machine, polling and disposal
//! - **Topology** - EVM→TVM, TVM→EVM, EVM→EVM, Solana→TVM, TVM→Solana, Credit
//! - **Fees** - Deposit/withdraw/bridge fees and vault balance visibility
//! - **Withdrawals** - Pending withdrawal bounty negotiation (TVM→EVM)
//! - **Orchestrator** - Route resolution, approval and debounced amounts
//! - **Aggregator** - Read-only summaries fed by pipeline events
//! - **Registry** - One pipeline per `(topology, identity)` route
//!
//! ## Feature Flags
//!
//! - `testing` - Mock gateways, wallets, fixtures and assertions

pub mod address;
pub mod aggregator;
pub mod amount;
pub mod capability;
pub mod config;
pub mod error;
pub mod fees;
pub mod hash;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod route;
pub mod topology;
pub mod types;
pub mod withdrawals;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use address::{SolanaSignature, TransferIdentity, TvmAddress};
pub use aggregator::{EventBus, PipelineEvent, SummaryAggregator, TransferSummary};
pub use capability::{
    AssetRegistry, AssetRoute, ChainGateway, Gateways, StaticAssetRegistry, WalletCapability,
    Wallets,
};
pub use config::PipelineSettings;
pub use error::{ErrorClass, ErrorReporter, GatewayError, PipelineError, TracingReporter};
pub use fees::{FeeCalculator, Fees, VaultFees};
pub use hash::{derive_event_address, EventAddress, EventVoteData};
pub use pipeline::{ActionOutcome, Disposer, Pipeline, PipelineDeps, SkipReason};
pub use orchestrator::{
    ApprovalStrategy, Debouncer, OrchestratorError, OrchestratorEvent, RouteOrchestrator,
    TransferStep,
};
pub use registry::{PipelineKey, PipelineRegistry, RouteMode};
pub use route::{resolve_path, RouteResolution, TransferRoute};
pub use topology::{CreditPipeline, DoubleHopPipeline, InboundPipeline, OutboundPipeline};
pub use types::{
    CreditProcessorState, NetworkId, NetworkKind, PendingWithdrawal, PhaseStatus, PipelineConfig,
    PrepareState, ReleaseState, Topology, TransferState,
};
pub use withdrawals::{BountyIntent, BountyRejection, PendingWithdrawalRegistry};
