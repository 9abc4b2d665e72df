//! Asset registry file
//!
//! A TOML or JSON file with an `assets` list; the format follows the file
//! extension.
//!
//! ```toml
//! [[assets]]
//! token_root = "0:7777...7777"
//!
//! [[assets.routes]]
//! network = "evm-1"
//! token = "0x...a1"
//! vault = "0x...b1"
//! proxy = "0x...f1"
//! decimals = 6
//! event_configuration = "0:c1c1...c1c1"
//! ```

use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use transfer_pipeline::capability::AssetEntry;
use transfer_pipeline::StaticAssetRegistry;

#[derive(Debug, Deserialize)]
struct AssetFile {
    #[serde(default)]
    assets: Vec<AssetEntry>,
}

pub fn load_asset_registry(path: &Path) -> Result<StaticAssetRegistry> {
    if !path.exists() {
        return Err(eyre!("asset registry file {} not found", path.display()));
    }
    let file: AssetFile = config::Config::builder()
        .add_source(config::File::from(path))
        .build()
        .wrap_err_with(|| format!("Failed to read asset registry {}", path.display()))?
        .try_deserialize()
        .wrap_err_with(|| format!("Invalid asset registry {}", path.display()))?;

    let tokens = file.assets.len();
    let registry = StaticAssetRegistry::from_entries(file.assets);
    info!(
        path = %path.display(),
        tokens,
        routes = registry.len(),
        "Asset registry loaded"
    );
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use transfer_pipeline::{AssetRegistry, NetworkId, TvmAddress};

    fn token() -> TvmAddress {
        TvmAddress::new(0, [0x77; 32])
    }

    fn write(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_toml_registry() {
        let contents = format!(
            r#"
[[assets]]
token_root = "{token}"

[[assets.routes]]
network = "evm-1"
token = "0x00000000000000000000000000000000000000a1"
vault = "0x00000000000000000000000000000000000000b1"
decimals = 6
event_configuration = "{config}"

[[assets.routes]]
network = "tvm-42"
token = "{token}"
decimals = 9
"#,
            token = token(),
            config = TvmAddress::new(0, [0xc1; 32]),
        );
        let file = write(".toml", &contents);

        let registry = load_asset_registry(file.path()).unwrap();
        let route = registry.resolve(&token(), &NetworkId::evm("1")).unwrap();
        assert_eq!(route.decimals, 6);
        assert_eq!(route.event_configuration, Some(TvmAddress::new(0, [0xc1; 32])));
        assert!(!route.is_native);
        assert!(registry.resolve(&token(), &NetworkId::tvm("42")).is_some());
        assert!(registry.resolve(&token(), &NetworkId::evm("56")).is_none());
    }

    #[test]
    fn test_load_json_registry_with_native_token() {
        let contents = format!(
            r#"{{"assets": [{{"token_root": "{}", "tvm_native": true, "routes": [
                {{"network": "solana-mainnet", "token": "So11111111111111111111111111111111111111112", "decimals": 9}}
            ]}}]}}"#,
            token()
        );
        let file = write(".json", &contents);

        let registry = load_asset_registry(file.path()).unwrap();
        assert!(registry.is_tvm_native(&token()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_missing_or_invalid_file() {
        assert!(load_asset_registry(Path::new("/nonexistent/assets.toml")).is_err());
        let file = write(".toml", "[[assets]]\ntoken_root = \"not-an-address\"\nroutes = []\n");
        assert!(load_asset_registry(file.path()).is_err());
    }
}
