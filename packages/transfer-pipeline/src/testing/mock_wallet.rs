use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::capability::{GatewayResult, WalletCapability};

/// Wallet whose connection state a test flips by hand
pub struct MockWallet {
    address: String,
    chain_id: String,
    connected: AtomicBool,
}

impl MockWallet {
    pub fn connected(address: &str, chain_id: &str) -> Self {
        Self {
            address: address.to_string(),
            chain_id: chain_id.to_string(),
            connected: AtomicBool::new(true),
        }
    }

    pub fn disconnected(address: &str, chain_id: &str) -> Self {
        let wallet = Self::connected(address, chain_id);
        wallet.connected.store(false, Ordering::SeqCst);
        wallet
    }
}

#[async_trait]
impl WalletCapability for MockWallet {
    fn address(&self) -> Option<String> {
        self.is_connected().then(|| self.address.clone())
    }

    fn chain_id(&self) -> Option<String> {
        self.is_connected().then(|| self.chain_id.clone())
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
