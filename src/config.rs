//! Layered configuration (§6.5 / §9.3): an optional file source plus
//! `ROUTER__`-prefixed environment overrides, deserialized into strongly
//! typed structs.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::domain::ChainId;

/// Either a locally held mnemonic or a remote web3signer URL, mutually
/// exclusive per §6.5.
#[derive(Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerConfig {
    Mnemonic(RedactedSecret),
    Web3SignerUrl(String),
}

impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mnemonic(_) => write!(f, "Mnemonic(<redacted>)"),
            Self::Web3SignerUrl(url) => f.debug_tuple("Web3SignerUrl").field(url).finish(),
        }
    }
}

/// A secret string whose `Debug`/`Serialize` implementations always redact
/// the value, matching `GET /config`'s redaction requirement.
#[derive(Clone, Deserialize)]
pub struct RedactedSecret(String);

impl RedactedSecret {
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RedactedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted>")
    }
}

impl Serialize for RedactedSecret {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("<redacted>")
    }
}

impl Drop for RedactedSecret {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.0);
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfigEntry {
    pub providers: Vec<String>,
    #[serde(default = "default_confirmations")]
    pub confirmations: u32,
    #[serde(default)]
    pub gas_stations: Vec<String>,
    pub min_gas: U256,
    pub transaction_manager_address: Address,
    #[serde(default)]
    pub router_contract_relayer_asset: Option<Address>,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

const fn default_confirmations() -> u32 {
    1
}

const fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SwapPoolAssetEntry {
    pub chain_id: ChainId,
    pub asset_id: Address,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SwapPoolEntry {
    pub name: String,
    pub assets: Vec<SwapPoolAssetEntry>,
}

/// Top-level configuration tree, per §6.5.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub signer: SignerConfig,
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub nats_url: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub chain_config: HashMap<ChainId, ChainConfigEntry>,
    #[serde(default)]
    pub swap_pools: Vec<SwapPoolEntry>,
    #[serde(default = "default_request_limit_ms")]
    pub request_limit_ms: i64,
    #[serde(default = "default_max_price_impact")]
    pub max_price_impact: f64,
    #[serde(default = "default_amplification")]
    pub amplification: u32,
    #[serde(default = "default_true")]
    pub allowed_vamm: bool,
    #[serde(default)]
    pub diagnostic_mode: bool,
    #[serde(default)]
    pub clean_up_mode: bool,
    #[serde(default)]
    pub price_cache_mode: bool,
    #[serde(default = "default_expiry_check_interval", with = "humantime_serde")]
    pub expiry_check_interval: std::time::Duration,
    #[serde(default = "default_admin_bind")]
    pub admin_bind_address: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_request_limit_ms() -> i64 {
    5_000
}

const fn default_max_price_impact() -> f64 {
    0.1
}

const fn default_amplification() -> u32 {
    100
}

const fn default_true() -> bool {
    true
}

fn default_expiry_check_interval() -> std::time::Duration {
    std::time::Duration::from_secs(60)
}

fn default_admin_bind() -> String {
    "0.0.0.0:8080".to_string()
}

/// Loads configuration from an optional file plus `ROUTER__`-prefixed
/// environment variables (`ROUTER__CHAIN_CONFIG__1337__MIN_GAS`-style
/// overrides).
///
/// # Errors
/// Returns [`anyhow::Error`] (surfaced by the CLI as exit code 1, per
/// §6.6) if the file is missing/malformed or a required field is absent
/// from both sources.
pub fn load_config(config_file_path: Option<&Path>) -> anyhow::Result<Config> {
    let mut builder = config::Config::builder();

    if let Some(path) = config_file_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ROUTER")
            .separator("__")
            .try_parsing(true),
    );

    let raw = builder.build()?;
    let config: Config = raw.try_deserialize()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signer_config_debug_redacts_mnemonic() {
        let signer = SignerConfig::Mnemonic(RedactedSecret("test test test".to_string()));
        assert_eq!(format!("{signer:?}"), "Mnemonic(<redacted>)");
    }

    #[test]
    fn signer_config_serialize_redacts_mnemonic() {
        let signer = SignerConfig::Mnemonic(RedactedSecret("test test test".to_string()));
        let json = serde_json::to_string(&signer).unwrap();
        assert!(json.contains("redacted"));
        assert!(!json.contains("test test test"));
    }
}
