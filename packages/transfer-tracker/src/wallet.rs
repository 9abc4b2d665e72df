//! Watch-only wallets
//!
//! The tracker signs nothing itself: actions name a configured account as
//! sender and the bridge node behind the gateway submits on its behalf. A
//! wallet is connected while it has an address.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use transfer_pipeline::capability::GatewayResult;
use transfer_pipeline::{WalletCapability, Wallets};

use crate::config::{WalletAddress, WalletConfig};

#[derive(Debug)]
pub struct WatchWallet {
    address: String,
    chain_id: String,
    connected: AtomicBool,
}

impl WatchWallet {
    pub fn new(address: impl Into<String>, chain_id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            chain_id: chain_id.into(),
            connected: AtomicBool::new(true),
        }
    }
}

impl From<&WalletAddress> for WatchWallet {
    fn from(wallet: &WalletAddress) -> Self {
        Self::new(wallet.address.clone(), wallet.chain_id.clone())
    }
}

#[async_trait]
impl WalletCapability for WatchWallet {
    fn address(&self) -> Option<String> {
        self.is_connected().then(|| self.address.clone())
    }

    fn chain_id(&self) -> Option<String> {
        Some(self.chain_id.clone())
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn is_connecting(&self) -> bool {
        false
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> GatewayResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> GatewayResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub fn build_wallets(config: &WalletConfig) -> Wallets {
    let wallet = |entry: &Option<WalletAddress>, family: &str| {
        entry.as_ref().map(|w| {
            info!(family, address = %w.address, chain_id = %w.chain_id, "Wallet configured");
            Arc::new(WatchWallet::from(w)) as Arc<dyn WalletCapability>
        })
    };
    Wallets {
        evm: wallet(&config.evm, "evm"),
        tvm: wallet(&config.tvm, "tvm"),
        solana: wallet(&config.solana, "solana"),
    }
}
