//! Tracker configuration
//!
//! Loaded from `.env` (when present) and the environment:
//!
//! | Variable | Meaning |
//! |---|---|
//! | `TRACKER_ID` | Instance id, defaults to the hostname |
//! | `HUB_NETWORK` | Hub network id, e.g. `tvm-42` |
//! | `GATEWAY_URLS` | `evm-1=http://a\|http://b,tvm-42=http://c` |
//! | `ASSET_REGISTRY_FILE` | TOML or JSON asset list |
//! | `TRACK_TRANSFERS` | Comma-separated transfer paths; `credit:` prefix for credit routes |
//! | `EVM_WALLET_ADDRESS`, `TVM_WALLET_ADDRESS`, `SOLANA_WALLET_ADDRESS` | Accounts actions are sent from |
//! | `EVM_CHAIN_ID`, `TVM_CHAIN_ID`, `SOLANA_CHAIN_ID` | Chains those wallets are on |
//! | `RPC_TIMEOUT_MS` | Per-request gateway timeout |
//! | `BIND_ADDRESS`, `HEALTH_PORT` | HTTP server address |
//!
//! Pipeline tuning (`PIPELINE_POLL_INTERVAL_MS`, `PIPELINE_STUCK_MULTIPLIER`,
//! `AMOUNT_DEBOUNCE_MS`) is read by [`PipelineSettings::from_env`].

use eyre::{eyre, Result, WrapErr};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use transfer_pipeline::{NetworkId, NetworkKind, PipelineSettings, RouteMode};

/// RPC endpoints serving one network; tried in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoint {
    pub network: NetworkId,
    pub urls: Vec<String>,
}

/// A transfer path the tracker follows from startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedTransfer {
    pub path: String,
    pub mode: RouteMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletAddress {
    pub address: String,
    pub chain_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct WalletConfig {
    pub evm: Option<WalletAddress>,
    pub tvm: Option<WalletAddress>,
    pub solana: Option<WalletAddress>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub tracker_id: String,
    pub hub_network: NetworkId,
    pub gateways: Vec<GatewayEndpoint>,
    pub asset_registry_file: PathBuf,
    pub track_transfers: Vec<TrackedTransfer>,
    pub wallets: WalletConfig,
    pub rpc_timeout: Duration,
    pub bind_address: String,
    pub health_port: u16,
    pub settings: PipelineSettings,
}

impl Config {
    /// Load configuration from environment
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded .env from {:?}", path);
        }

        let default_id = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "transfer-tracker".to_string());

        let hub_network: NetworkId = env::var("HUB_NETWORK")
            .map_err(|_| eyre!("HUB_NETWORK environment variable is required"))?
            .parse()
            .wrap_err("HUB_NETWORK must look like tvm-<chain id>")?;

        let gateways = parse_gateway_urls(
            &env::var("GATEWAY_URLS")
                .map_err(|_| eyre!("GATEWAY_URLS environment variable is required"))?,
        )?;

        let config = Self {
            tracker_id: env::var("TRACKER_ID").unwrap_or(default_id),
            hub_network,
            gateways,
            asset_registry_file: env::var("ASSET_REGISTRY_FILE")
                .map_err(|_| eyre!("ASSET_REGISTRY_FILE environment variable is required"))?
                .into(),
            track_transfers: parse_tracked_transfers(
                &env::var("TRACK_TRANSFERS").unwrap_or_default(),
            ),
            wallets: WalletConfig {
                evm: wallet_from_env("EVM")?,
                tvm: wallet_from_env("TVM")?,
                solana: wallet_from_env("SOLANA")?,
            },
            rpc_timeout: Duration::from_millis(
                env::var("RPC_TIMEOUT_MS")
                    .unwrap_or_else(|_| "10000".to_string())
                    .parse()
                    .wrap_err("RPC_TIMEOUT_MS must be a number of milliseconds")?,
            ),
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()),
            health_port: env::var("HEALTH_PORT")
                .unwrap_or_else(|_| "9090".to_string())
                .parse()
                .wrap_err("HEALTH_PORT must be a valid port")?,
            settings: PipelineSettings::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hub_network.kind != NetworkKind::Tvm {
            return Err(eyre!("hub network {} is not a TVM network", self.hub_network));
        }
        if !self.gateways.iter().any(|g| g.network == self.hub_network) {
            return Err(eyre!("GATEWAY_URLS has no endpoint for hub {}", self.hub_network));
        }
        for (i, gateway) in self.gateways.iter().enumerate() {
            if self.gateways[..i].iter().any(|g| g.network == gateway.network) {
                return Err(eyre!("GATEWAY_URLS lists {} twice", gateway.network));
            }
        }
        if self.rpc_timeout.is_zero() {
            return Err(eyre!("RPC_TIMEOUT_MS must be greater than zero"));
        }
        self.settings.validate()
    }
}

/// Parse `evm-1=http://a|http://b,tvm-42=http://c`
pub fn parse_gateway_urls(raw: &str) -> Result<Vec<GatewayEndpoint>> {
    let mut endpoints = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (network, urls) = entry
            .split_once('=')
            .ok_or_else(|| eyre!("gateway entry '{}' must be <network>=<url>", entry))?;
        let network: NetworkId = network
            .trim()
            .parse()
            .wrap_err_with(|| format!("invalid network in gateway entry '{}'", entry))?;
        let urls: Vec<String> = urls
            .split('|')
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(eyre!("gateway entry for {} has no URL", network));
        }
        endpoints.push(GatewayEndpoint { network, urls });
    }
    if endpoints.is_empty() {
        return Err(eyre!("GATEWAY_URLS cannot be empty"));
    }
    Ok(endpoints)
}

/// Parse tracked transfer paths; `credit:` selects the credit route
pub fn parse_tracked_transfers(raw: &str) -> Vec<TrackedTransfer> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.strip_prefix("credit:") {
            Some(path) => TrackedTransfer {
                path: path.to_string(),
                mode: RouteMode::Credit,
            },
            None => TrackedTransfer {
                path: entry.to_string(),
                mode: RouteMode::Direct,
            },
        })
        .collect()
}

fn wallet_from_env(prefix: &str) -> Result<Option<WalletAddress>> {
    let Ok(address) = env::var(format!("{}_WALLET_ADDRESS", prefix)) else {
        return Ok(None);
    };
    let chain_id = env::var(format!("{}_CHAIN_ID", prefix))
        .map_err(|_| eyre!("{}_CHAIN_ID is required when {}_WALLET_ADDRESS is set", prefix, prefix))?;
    Ok(Some(WalletAddress { address, chain_id }))
}
