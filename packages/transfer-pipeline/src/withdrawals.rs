//! Pending withdrawal bounties (TVM→EVM)
//!
//! When an EVM vault lacks liquidity it queues the release as a pending
//! withdrawal. The transfer owner may attach a bounty, paid out of the
//! withdrawal amount, to whoever fills it. Validation happens here, before
//! any network call:
//!
//! - the owner's TVM wallet is connected
//! - the withdrawal is not closed
//! - `bounty <= amount / 10^decimals`

use alloy::primitives::B256;
use bigdecimal::BigDecimal;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

use crate::amount::{from_units, to_units};
use crate::capability::{BountyRequest, ChainGateway, TxId, Wallets};
use crate::error::GatewayError;
use crate::types::{NetworkKind, PendingWithdrawal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BountyIntent {
    /// No pending withdrawal queued yet
    Create,
    Change,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BountyRejection {
    #[error("TVM wallet not connected")]
    WalletNotConnected,
    #[error("connected wallet is not the transfer owner")]
    NotOwner,
    #[error("withdrawal already closed")]
    WithdrawalClosed,
    #[error("withdrawal amount not known yet")]
    NotReady,
    #[error("invalid bounty: {0}")]
    InvalidAmount(String),
    #[error("bounty exceeds withdrawal amount {max}")]
    ExceedsAmount { max: String },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Default)]
struct WithdrawalBook {
    owner: Option<String>,
    decimals: u8,
    /// Release amount in destination base units
    amount: Option<u128>,
    withdrawal_hash: Option<B256>,
    withdrawals: Vec<PendingWithdrawal>,
}

pub struct PendingWithdrawalRegistry {
    wallets: Wallets,
    gateway: Arc<dyn ChainGateway>,
    book: Mutex<WithdrawalBook>,
}

impl PendingWithdrawalRegistry {
    pub fn new(wallets: Wallets, gateway: Arc<dyn ChainGateway>) -> Self {
        Self {
            wallets,
            gateway,
            book: Mutex::new(WithdrawalBook::default()),
        }
    }

    /// Record what the pipeline observed
    pub fn update(
        &self,
        owner: &str,
        decimals: u8,
        amount: u128,
        withdrawal_hash: Option<B256>,
        withdrawal: Option<PendingWithdrawal>,
    ) {
        if let Ok(mut book) = self.book.lock() {
            book.owner = Some(owner.to_string());
            book.decimals = decimals;
            book.amount = Some(withdrawal.as_ref().map_or(amount, |w| w.amount));
            book.withdrawal_hash = withdrawal_hash;
            book.withdrawals = withdrawal.into_iter().collect();
        }
    }

    pub fn withdrawals(&self) -> Vec<PendingWithdrawal> {
        self.book
            .lock()
            .map(|b| b.withdrawals.clone())
            .unwrap_or_default()
    }

    pub fn intent(&self) -> BountyIntent {
        match self.book.lock() {
            Ok(book) if !book.withdrawals.is_empty() => BountyIntent::Change,
            _ => BountyIntent::Create,
        }
    }

    /// Largest bounty allowed, in token units
    pub fn max_bounty(&self) -> Option<BigDecimal> {
        let book = self.book.lock().ok()?;
        book.amount.map(|amount| from_units(amount, book.decimals))
    }

    /// Check a bounty entered in token units; returns base units
    pub fn validate(&self, input: &str) -> Result<u128, BountyRejection> {
        let Some(address) = self.wallets.connected_address(NetworkKind::Tvm) else {
            return Err(BountyRejection::WalletNotConnected);
        };
        let book = self.book.lock().map_err(|_| BountyRejection::NotReady)?;
        match book.owner.as_deref() {
            Some(owner) if owner == address => {}
            Some(_) => return Err(BountyRejection::NotOwner),
            None => return Err(BountyRejection::NotReady),
        }
        if book.withdrawals.iter().any(PendingWithdrawal::is_closed) {
            return Err(BountyRejection::WithdrawalClosed);
        }
        let amount = book.amount.ok_or(BountyRejection::NotReady)?;

        let bounty = BigDecimal::from_str(input.trim())
            .map_err(|e| BountyRejection::InvalidAmount(e.to_string()))?;
        if bounty < BigDecimal::from(0) {
            return Err(BountyRejection::InvalidAmount("negative".into()));
        }
        let max = from_units(amount, book.decimals);
        if bounty > max {
            return Err(BountyRejection::ExceedsAmount {
                max: max.to_string(),
            });
        }
        to_units(&bounty, book.decimals).map_err(|e| BountyRejection::InvalidAmount(e.to_string()))
    }

    /// Validate and submit; creating and changing issue the same call
    pub async fn set_bounty(&self, input: &str) -> Result<TxId, BountyRejection> {
        let bounty = self.validate(input)?;
        let sender = self
            .wallets
            .connected_address(NetworkKind::Tvm)
            .ok_or(BountyRejection::WalletNotConnected)?;
        let request = {
            let book = self.book.lock().map_err(|_| BountyRejection::NotReady)?;
            BountyRequest {
                withdrawal: book.withdrawals.first().map(|w| w.id.clone()),
                withdrawal_hash: book.withdrawal_hash.ok_or(BountyRejection::NotReady)?,
                bounty,
                sender,
            }
        };
        let intent = self.intent();
        let tx = self.gateway.set_bounty(&request).await?;
        info!(tx = %tx, bounty, intent = ?intent, "Bounty submitted");
        Ok(tx)
    }
}
