//! Fee and vault calculations
//!
//! Vaults declare deposit and withdraw rates in basis points. Direct routes
//! charge one of them; a double hop charges the first leg's deposit fee and
//! the second leg's withdraw fee.

use serde::{Deserialize, Serialize};

use crate::amount::format_units;
use crate::types::{PipelineConfig, Side};

/// Basis point denominator
pub const FEE_DENOMINATOR: u128 = 10_000;

/// Rendering of a fee that cannot be computed
pub const UNDEFINED_FEE: &str = "-";

/// Rates declared by a vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VaultFees {
    pub deposit_bps: u32,
    pub withdraw_bps: u32,
}

/// Fee calculator for vault deposits and withdrawals
pub struct FeeCalculator;

impl FeeCalculator {
    /// `floor(amount * bps / 10_000)` without overflowing on large amounts
    pub fn fee(amount: u128, bps: u32) -> u128 {
        let bps = bps as u128;
        (amount / FEE_DENOMINATOR) * bps + (amount % FEE_DENOMINATOR) * bps / FEE_DENOMINATOR
    }

    pub fn deposit_fee(amount: u128, rates: &VaultFees) -> u128 {
        Self::fee(amount, rates.deposit_bps)
    }

    pub fn withdraw_fee(amount: u128, rates: &VaultFees) -> u128 {
        Self::fee(amount, rates.withdraw_bps)
    }

    /// Whether a vault balance check applies to `side` of the route
    pub fn vault_balance_visible(config: &PipelineConfig, side: Side) -> bool {
        let route = config.route(side);
        !route.is_native && !config.tvm_native && route.vault.is_some()
    }
}

/// Fees of a transfer in token base units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fees {
    pub deposit_fee: Option<u128>,
    pub withdraw_fee: Option<u128>,
    pub second_deposit_fee: Option<u128>,
    pub second_withdraw_fee: Option<u128>,
}

impl Fees {
    /// Double-hop fee: first deposit plus second withdraw
    ///
    /// A missing addend counts as zero; with both missing the fee is undefined.
    pub fn bridge_fee(&self) -> Option<u128> {
        match (self.deposit_fee, self.second_withdraw_fee) {
            (None, None) => None,
            (deposit, withdraw) => Some(deposit.unwrap_or(0) + withdraw.unwrap_or(0)),
        }
    }

    pub fn bridge_fee_display(&self, decimals: u8) -> String {
        format_fee(self.bridge_fee(), decimals)
    }
}

pub fn format_fee(fee: Option<u128>, decimals: u8) -> String {
    fee.map(|f| format_units(f, decimals))
        .unwrap_or_else(|| UNDEFINED_FEE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::TvmAddress;
    use crate::capability::AssetRoute;
    use crate::types::NetworkId;

    #[test]
    fn test_fee_bps() {
        assert_eq!(FeeCalculator::fee(1_000_000, 30), 3_000);
        assert_eq!(FeeCalculator::fee(999, 1), 0);
        assert_eq!(FeeCalculator::fee(u128::MAX, 10_000), u128::MAX);
    }

    #[test]
    fn test_bridge_fee_is_sum_of_addends() {
        let fees = Fees {
            deposit_fee: Some(150),
            second_withdraw_fee: Some(50),
            ..Default::default()
        };
        assert_eq!(fees.bridge_fee(), Some(200));
        assert_eq!(fees.bridge_fee_display(2), "2.00");
    }

    #[test]
    fn test_bridge_fee_undefined_renders_dash() {
        let fees = Fees::default();
        assert_eq!(fees.bridge_fee(), None);
        assert_eq!(fees.bridge_fee_display(6), "-");

        let partial = Fees {
            second_withdraw_fee: Some(7),
            ..Default::default()
        };
        assert_eq!(partial.bridge_fee(), Some(7));
    }

    fn config(left_native: bool, tvm_native: bool) -> PipelineConfig {
        let route = |network: NetworkId, is_native: bool| AssetRoute {
            network,
            token: "token".into(),
            vault: Some("vault".into()),
            proxy: None,
            decimals: 18,
            is_native,
            event_configuration: None,
        };
        PipelineConfig {
            left: NetworkId::evm("1"),
            right: NetworkId::tvm("42"),
            hub: NetworkId::tvm("42"),
            token_root: TvmAddress::new(0, [1; 32]),
            tvm_native,
            left_route: route(NetworkId::evm("1"), left_native),
            right_route: route(NetworkId::tvm("42"), false),
        }
    }

    #[test]
    fn test_vault_balance_visibility() {
        assert!(FeeCalculator::vault_balance_visible(&config(false, false), Side::Left));
        assert!(!FeeCalculator::vault_balance_visible(&config(true, false), Side::Left));
        assert!(!FeeCalculator::vault_balance_visible(&config(false, true), Side::Left));
        assert!(!FeeCalculator::vault_balance_visible(&config(false, true), Side::Right));
    }
}
