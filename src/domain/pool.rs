use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

use super::ChainId;

/// One asset leg of a [`SwapPool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapPoolAsset {
    pub chain_id: ChainId,
    pub asset_id: Address,
    /// AMM weight applied when normalizing balances to 18 decimals.
    pub weight: u32,
    pub decimals: u8,
}

/// A logical aggregation of assets across chains the router treats as a
/// single virtual liquidity curve.
///
/// Invariants (checked by [`SwapPool::validate`]): assets unique within a
/// pool, weights positive, decimals known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapPool {
    pub name: String,
    pub assets: Vec<SwapPoolAsset>,
}

impl SwapPool {
    /// # Errors
    /// Returns a message describing the first invariant violation found.
    pub fn validate(&self) -> Result<(), String> {
        for (i, a) in self.assets.iter().enumerate() {
            if a.weight == 0 {
                return Err(format!("asset {i} in pool {} has zero weight", self.name));
            }
            for (j, b) in self.assets.iter().enumerate() {
                if i != j && a.chain_id == b.chain_id && a.asset_id == b.asset_id {
                    return Err(format!(
                        "duplicate asset {:?} on chain {} in pool {}",
                        a.asset_id, a.chain_id, self.name
                    ));
                }
            }
        }
        Ok(())
    }

    /// Index of the asset matching `(chain_id, asset_id)`, if present.
    #[must_use]
    pub fn index_of(&self, chain_id: ChainId, asset_id: Address) -> Option<usize> {
        self.assets
            .iter()
            .position(|a| a.chain_id == chain_id && a.asset_id == asset_id)
    }
}

/// Per-chain configuration: providers, confirmations, router addresses, gas
/// floor, and (optionally) the relayer asset used for meta-tx fee packing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub providers: Vec<String>,
    pub confirmations: u32,
    pub min_gas: U256,
    pub transaction_manager_address: Address,
    pub gas_stations: Vec<String>,
    pub router_contract_relayer_asset: Option<Address>,
}

impl ChainConfig {
    #[must_use]
    pub fn has_provider(&self) -> bool {
        !self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(chain_id: u64, asset_id: u8, weight: u32) -> SwapPoolAsset {
        SwapPoolAsset {
            chain_id: ChainId::new(chain_id),
            asset_id: Address::from_low_u64_be(u64::from(asset_id)),
            weight,
            decimals: 18,
        }
    }

    #[test]
    fn rejects_zero_weight() {
        let pool = SwapPool {
            name: "usdc".into(),
            assets: vec![asset(1337, 1, 0)],
        };
        assert!(pool.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_asset() {
        let pool = SwapPool {
            name: "usdc".into(),
            assets: vec![asset(1337, 1, 1), asset(1337, 1, 1)],
        };
        assert!(pool.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_pool() {
        let pool = SwapPool {
            name: "usdc".into(),
            assets: vec![asset(1337, 1, 1), asset(1338, 2, 1)],
        };
        assert!(pool.validate().is_ok());
        assert_eq!(
            pool.index_of(ChainId::new(1338), Address::from_low_u64_be(2)),
            Some(1)
        );
    }
}
