//! Fixture networks, routes and deposits
//!
//! One token travels over EVM chain 1 (6 decimals, vault-backed), EVM chain
//! 56 (18 decimals, vault-backed), the hub (9 decimals) and Solana
//! (9 decimals, no vault).

use alloy::primitives::{Bytes, B256};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{MockGateway, MockWallet};
use crate::address::{SolanaSignature, TransferIdentity, TvmAddress};
use crate::aggregator::EventBus;
use crate::capability::{AssetRoute, DepositReceipt, Gateways, StaticAssetRegistry, Wallets};
use crate::config::PipelineSettings;
use crate::error::{ErrorReporter, PipelineError};
use crate::hash::{derive_event_address, EventAddress, EventVoteData};
use crate::pipeline::PipelineDeps;
use crate::types::NetworkId;

pub const EVM_OWNER: &str = "0x00000000000000000000000000000000000000e1";
pub const TVM_OWNER: &str = "0:1111111111111111111111111111111111111111111111111111111111111111";
pub const SOLANA_OWNER: &str = "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T";
pub const SOLANA_PROGRAM: &str = "11111111111111111111111111111111";

pub fn evm_network() -> NetworkId {
    NetworkId::evm("1")
}

pub fn evm2_network() -> NetworkId {
    NetworkId::evm("56")
}

pub fn hub_network() -> NetworkId {
    NetworkId::tvm("42")
}

pub fn solana_network() -> NetworkId {
    NetworkId::solana("mainnet")
}

pub fn token_root() -> TvmAddress {
    TvmAddress::new(0, [0x77; 32])
}

pub fn evm_configuration() -> TvmAddress {
    TvmAddress::new(0, [0xc1; 32])
}

pub fn evm2_configuration() -> TvmAddress {
    TvmAddress::new(0, [0xc2; 32])
}

pub fn solana_configuration() -> TvmAddress {
    TvmAddress::new(0, [0xc3; 32])
}

pub fn asset_registry() -> StaticAssetRegistry {
    let mut registry = StaticAssetRegistry::new();
    let token = token_root();
    registry.insert(
        token,
        AssetRoute {
            network: evm_network(),
            token: "0x00000000000000000000000000000000000000a1".into(),
            vault: Some("0x00000000000000000000000000000000000000b1".into()),
            proxy: Some("0x00000000000000000000000000000000000000f1".into()),
            decimals: 6,
            is_native: false,
            event_configuration: Some(evm_configuration()),
        },
    );
    registry.insert(
        token,
        AssetRoute {
            network: evm2_network(),
            token: "0x00000000000000000000000000000000000000a2".into(),
            vault: Some("0x00000000000000000000000000000000000000b2".into()),
            proxy: Some("0x00000000000000000000000000000000000000f2".into()),
            decimals: 18,
            is_native: false,
            event_configuration: Some(evm2_configuration()),
        },
    );
    registry.insert(
        token,
        AssetRoute {
            network: hub_network(),
            token: token.to_string(),
            vault: None,
            proxy: None,
            decimals: 9,
            is_native: false,
            event_configuration: None,
        },
    );
    registry.insert(
        token,
        AssetRoute {
            network: solana_network(),
            token: "So11111111111111111111111111111111111111112".into(),
            vault: None,
            proxy: Some(SOLANA_PROGRAM.into()),
            decimals: 9,
            is_native: false,
            event_configuration: Some(solana_configuration()),
        },
    );
    registry
}

// ============================================================================
// Identities and votes
// ============================================================================

pub fn evm_identity() -> TransferIdentity {
    TransferIdentity::EvmTransaction(B256::repeat_byte(0xaa))
}

pub fn tvm_identity() -> TransferIdentity {
    TransferIdentity::TvmContract(TvmAddress::new(0, [0xbb; 32]))
}

pub fn solana_identity() -> TransferIdentity {
    TransferIdentity::SolanaSignature(SolanaSignature([0x05; 64]))
}

pub fn evm_vote() -> EventVoteData {
    EventVoteData::Evm {
        event_transaction: B256::repeat_byte(0xaa),
        event_index: 3,
        event_data: Bytes::from(vec![0xde, 0xad]),
        event_block_number: 1_000,
        event_block: B256::repeat_byte(0x10),
    }
}

pub fn tvm_vote(lt: u64) -> EventVoteData {
    EventVoteData::Tvm {
        event_transaction_lt: lt,
        event_timestamp: 1_700_000_000,
        event_data: Bytes::from(vec![0xbe, 0xef]),
    }
}

pub fn solana_vote() -> EventVoteData {
    EventVoteData::Solana {
        account_seed: 7,
        slot: 250_000_000,
        block_time: 1_700_000_000,
        tx_signature: SolanaSignature([0x05; 64]),
        event_data: Bytes::from(vec![0x50]),
    }
}

pub fn deposit(
    vote: EventVoteData,
    block_number: u64,
    amount: u128,
    sender: &str,
    recipient: &str,
) -> DepositReceipt {
    DepositReceipt {
        block_number,
        token_root: token_root(),
        amount,
        sender: sender.to_string(),
        recipient: recipient.to_string(),
        vote,
    }
}

// ============================================================================
// Reporter
// ============================================================================

/// Reporter that keeps `(pipeline, operation, error)` for assertions
#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<(String, String, PipelineError)>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<(String, String, PipelineError)> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.reports()
            .iter()
            .filter(|(_, op, _)| op == operation)
            .count()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, pipeline: &str, operation: &str, error: &PipelineError) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((pipeline.to_string(), operation.to_string(), error.clone()));
        }
    }
}

// ============================================================================
// World
// ============================================================================

/// Every gateway, wallet and collaborator a pipeline needs, all in memory
pub struct TestWorld {
    pub hub: Arc<MockGateway>,
    pub evm: Arc<MockGateway>,
    pub evm2: Arc<MockGateway>,
    pub solana: Arc<MockGateway>,
    pub evm_wallet: Arc<MockWallet>,
    pub tvm_wallet: Arc<MockWallet>,
    pub solana_wallet: Arc<MockWallet>,
    pub reporter: Arc<RecordingReporter>,
    pub bus: EventBus,
    pub deps: PipelineDeps,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::with_settings(PipelineSettings {
            poll_interval: Duration::from_millis(100),
            ..PipelineSettings::default()
        })
    }

    pub fn with_settings(settings: PipelineSettings) -> Self {
        let hub = Arc::new(MockGateway::new(hub_network()));
        let evm = Arc::new(MockGateway::new(evm_network()));
        let evm2 = Arc::new(MockGateway::new(evm2_network()));
        let solana = Arc::new(MockGateway::new(solana_network()));
        let gateways = Gateways::new(hub_network())
            .with(hub.clone())
            .with(evm.clone())
            .with(evm2.clone())
            .with(solana.clone());

        let evm_wallet = Arc::new(MockWallet::connected(EVM_OWNER, "1"));
        let tvm_wallet = Arc::new(MockWallet::connected(TVM_OWNER, "42"));
        let solana_wallet = Arc::new(MockWallet::connected(SOLANA_OWNER, "mainnet"));
        let wallets = Wallets {
            evm: Some(evm_wallet.clone()),
            tvm: Some(tvm_wallet.clone()),
            solana: Some(solana_wallet.clone()),
        };

        let reporter = Arc::new(RecordingReporter::default());
        let bus = EventBus::new(1024);
        let deps = PipelineDeps {
            gateways,
            registry: Arc::new(asset_registry()),
            wallets,
            settings,
            reporter: reporter.clone(),
            bus: bus.clone(),
        };
        Self {
            hub,
            evm,
            evm2,
            solana,
            evm_wallet,
            tvm_wallet,
            solana_wallet,
            reporter,
            bus,
            deps,
        }
    }

    /// EVM deposit at block 100 of 1.5 tokens, indexed on EVM chain 1
    pub fn seed_evm_deposit(&self) -> EventAddress {
        self.evm.add_deposit(
            evm_identity(),
            deposit(evm_vote(), 100, 1_500_000, EVM_OWNER, TVM_OWNER),
        );
        derive_event_address(&evm_configuration(), &evm_vote())
    }

    /// Hub deposit at block 100 of 2 tokens, relayed under `configuration`
    pub fn seed_hub_deposit(&self, identity: TransferIdentity, configuration: TvmAddress) -> EventAddress {
        let vote = tvm_vote(100);
        self.hub.add_deposit(
            identity,
            deposit(vote.clone(), 100, 2_000_000_000, TVM_OWNER, EVM_OWNER),
        );
        derive_event_address(&configuration, &vote)
    }

    pub fn seed_solana_deposit(&self) -> EventAddress {
        self.solana.add_deposit(
            solana_identity(),
            deposit(solana_vote(), 100, 3_000_000_000, SOLANA_OWNER, TVM_OWNER),
        );
        derive_event_address(&solana_configuration(), &solana_vote())
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}
