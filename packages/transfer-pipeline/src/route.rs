//! Transfer route encoding
//!
//! `/transfer/{fromType}-{fromChainId}/{toType}-{toChainId}/{identifier}`
//!
//! The identifier is validated against `fromType` before anything else
//! happens; a route that fails validation resolves to a redirect.

use std::fmt;
use thiserror::Error;

use crate::address::{AddressError, TransferIdentity};
use crate::types::{NetworkId, NetworkParseError};

/// Safe default view for routes that fail validation
pub const DEFAULT_VIEW: &str = "/bridge";

const PREFIX: &str = "transfer";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("not a transfer route: {0}")]
    NotTransfer(String),
    #[error(transparent)]
    Network(#[from] NetworkParseError),
    #[error(transparent)]
    Identity(#[from] AddressError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferRoute {
    pub from: NetworkId,
    pub to: NetworkId,
    pub identity: TransferIdentity,
}

impl TransferRoute {
    pub fn parse_path(path: &str) -> Result<Self, RouteError> {
        let segments: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let [prefix, from, to, identifier] = segments.as_slice() else {
            return Err(RouteError::NotTransfer(path.to_string()));
        };
        if *prefix != PREFIX {
            return Err(RouteError::NotTransfer(path.to_string()));
        }

        let from: NetworkId = from.parse()?;
        let to: NetworkId = to.parse()?;
        let identity = TransferIdentity::parse(from.kind, identifier)?;
        Ok(Self { from, to, identity })
    }

    pub fn to_path(&self) -> String {
        format!("/{}/{}/{}/{}", PREFIX, self.from, self.to, self.identity)
    }
}

impl fmt::Display for TransferRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_path())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteResolution {
    Transfer(TransferRoute),
    Redirect(&'static str),
}

/// Resolve a navigated path; invalid transfer routes redirect to [`DEFAULT_VIEW`]
pub fn resolve_path(path: &str) -> RouteResolution {
    match TransferRoute::parse_path(path) {
        Ok(route) => RouteResolution::Transfer(route),
        Err(_) => RouteResolution::Redirect(DEFAULT_VIEW),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NetworkKind;

    const TX: &str = "0xabc0000000000000000000000000000000000000000000000000000000000001";

    #[test]
    fn test_parse_evm_route() {
        let path = format!("/transfer/evm-1/tvm-42/{}", TX);
        let route = TransferRoute::parse_path(&path).unwrap();
        assert_eq!(route.from, NetworkId::evm("1"));
        assert_eq!(route.to, NetworkId::tvm("42"));
        assert_eq!(route.identity.kind(), NetworkKind::Evm);
        assert_eq!(route.to_path(), path);
    }

    #[test]
    fn test_identifier_validated_against_source_kind() {
        // A TVM address is not a valid EVM transaction hash
        let path = "/transfer/evm-1/tvm-42/0:0000000000000000000000000000000000000000000000000000000000000001";
        assert_eq!(resolve_path(path), RouteResolution::Redirect(DEFAULT_VIEW));

        let path = format!("/transfer/tvm-42/evm-1/{}", TX);
        assert_eq!(resolve_path(&path), RouteResolution::Redirect(DEFAULT_VIEW));
    }

    #[test]
    fn test_malformed_routes_redirect() {
        for path in ["/", "/bridge", "/transfer/evm-1", "/swap/evm-1/tvm-42/0x1", "/transfer/btc-1/tvm-42/abc"] {
            assert_eq!(resolve_path(path), RouteResolution::Redirect(DEFAULT_VIEW), "{}", path);
        }
    }

    #[test]
    fn test_resolves_valid_route() {
        let path = format!("/transfer/evm-1/evm-56/{}", TX);
        assert!(matches!(resolve_path(&path), RouteResolution::Transfer(_)));
    }
}
