//! Transfer Tracker: follows hub bridge transfers and serves their status
//!
//! - **Config** - Environment configuration
//! - **Assets** - Asset registry file loading
//! - **Bounded cache** - Seen transaction ids for subscriptions
//! - **Rpc** - JSON-RPC client with fallback endpoints
//! - **Gateway** - `ChainGateway` over a bridge node's JSON-RPC API
//! - **Wallet** - Watch-only wallets for configured accounts
//! - **Metrics** - Prometheus metrics and the error reporter
//! - **Service** - Pipeline registry, summaries and actions
//! - **Server** - Health, metrics and transfer HTTP endpoints

pub mod assets;
pub mod bounded_cache;
pub mod config;
pub mod gateway;
pub mod metrics;
pub mod rpc;
pub mod server;
pub mod service;
pub mod wallet;
