//! Testing Utilities Module
//!
//! In-memory collaborators for pipeline tests and downstream crates.
//!
//! ## Submodules
//!
//! - `mock_gateway` - Seedable chain gateway with call log and failure injection
//! - `mock_wallet` - Wallet with a toggled connection
//! - `fixtures` - Networks, routes, deposits and a wired `TestWorld`
//! - `assertions` - Outcome and phase assertions

pub mod assertions;
pub mod fixtures;
pub mod mock_gateway;
pub mod mock_wallet;

pub use assertions::*;
pub use fixtures::{RecordingReporter, TestWorld};
pub use mock_gateway::MockGateway;
pub use mock_wallet::MockWallet;
