//! Price & Gas Oracle (§4.A): token prices, gas prices, and per-action gas
//! fee estimation, denominated in whichever asset's decimals are requested.

use std::collections::HashMap;
use std::sync::Arc;

use ethers::types::{Address, U256};

use crate::chain::ChainProvider;
use crate::domain::{ActionKind, ChainId, Side};
use crate::error::RouterError;
use crate::metrics::ORACLE_GAS_PRICE;

/// Static gas-unit table keyed by action, a fixed estimate against the
/// known transaction-manager cost rather than a simulated `eth_estimateGas`
/// call.
fn gas_estimate(action: ActionKind) -> u64 {
    match action {
        ActionKind::Prepare => 150_000,
        ActionKind::Fulfill => 200_000,
        ActionKind::Cancel => 100_000,
    }
}

/// Per-chain oracle configuration: whether a price-oracle contract exists,
/// and the native/ETH price fallback used to convert gas cost into the
/// asset being quoted.
#[derive(Debug, Clone)]
pub struct OracleChainConfig {
    pub price_oracle_address: Option<Address>,
    /// Native-token price in USD, 18-decimal fixed point. Stands in for an
    /// external price feed (EthGasStation/Etherchain/GasNow-style sources)
    /// until a real price-oracle contract call is wired in.
    pub native_usd_price: U256,
}

#[derive(Debug)]
pub struct Oracle {
    providers: HashMap<ChainId, Arc<dyn ChainProvider>>,
    chain_config: HashMap<ChainId, OracleChainConfig>,
}

impl Oracle {
    #[must_use]
    pub fn new(
        providers: HashMap<ChainId, Arc<dyn ChainProvider>>,
        chain_config: HashMap<ChainId, OracleChainConfig>,
    ) -> Self {
        Self {
            providers,
            chain_config,
        }
    }

    fn provider(&self, chain_id: ChainId) -> Result<&Arc<dyn ChainProvider>, RouterError> {
        self.providers
            .get(&chain_id)
            .ok_or(RouterError::ChainNotSupported {
                chain_id: chain_id.get(),
                context: HashMap::new(),
            })
    }

    fn config(&self, chain_id: ChainId) -> Result<&OracleChainConfig, RouterError> {
        self.chain_config
            .get(&chain_id)
            .ok_or(RouterError::ChainNotSupported {
                chain_id: chain_id.get(),
                context: HashMap::new(),
            })
    }

    /// Reads an on-chain price oracle contract via a view call. A real
    /// deployment ABI-encodes a `latestAnswer()`-style call through
    /// `ChainProvider::read_transaction`; this implementation stands in with
    /// the configured USD price until a concrete oracle ABI is wired in.
    ///
    /// # Errors
    /// [`RouterError::ChainNotSupported`] when the chain has no configured
    /// oracle.
    pub async fn token_price(&self, chain_id: ChainId, _asset_id: Address) -> Result<U256, RouterError> {
        let config = self.config(chain_id)?;
        if config.price_oracle_address.is_none() {
            return Err(RouterError::ChainNotSupported {
                chain_id: chain_id.get(),
                context: HashMap::new(),
            });
        }
        Ok(config.native_usd_price)
    }

    /// # Errors
    /// [`RouterError::RpcError`] if the chain's provider fails.
    pub async fn gas_price(&self, chain_id: ChainId) -> Result<U256, RouterError> {
        let provider = self.provider(chain_id)?;
        let price = provider.get_gas_price().await?;
        ORACLE_GAS_PRICE
            .with_label_values(&[&chain_id.to_string()])
            .set(price.as_u64() as f64);
        Ok(price)
    }

    /// `gas_price · gas_estimate(action) · eth_price / token_price`, scaled
    /// to `decimals`. Returns `0` if the chain has no price oracle (a free
    /// quote rather than a hard failure, matching the router's stance that
    /// unpriced chains should not block auctions outright).
    ///
    /// # Errors
    /// [`RouterError::RpcError`] if the gas price read fails.
    pub async fn gas_fee(
        &self,
        chain_id: ChainId,
        asset_id: Address,
        decimals: u8,
        action: ActionKind,
        _side: Side,
    ) -> Result<U256, RouterError> {
        let token_price = match self.token_price(chain_id, asset_id).await {
            Ok(price) => price,
            Err(RouterError::ChainNotSupported { .. }) => return Ok(U256::zero()),
            Err(err) => return Err(err),
        };
        if token_price.is_zero() {
            return Ok(U256::zero());
        }

        let config = self.config(chain_id)?;
        let gas_price = self.gas_price(chain_id).await?;
        let gas_units = U256::from(gas_estimate(action));

        let cost_wei = gas_price
            .checked_mul(gas_units)
            .ok_or_else(|| overflow_err(chain_id))?;
        let cost_usd = cost_wei
            .checked_mul(config.native_usd_price)
            .ok_or_else(|| overflow_err(chain_id))?;
        let in_token_18 = cost_usd / token_price;

        Ok(scale_decimals(in_token_18, 18, decimals))
    }

    /// Sum of sender-side `Fulfill` and receiver-side `Prepare` fees,
    /// expressed in the receiving asset's decimals — the cost the receiver
    /// side must net out of the quoted `amount_received`.
    ///
    /// # Errors
    /// Propagates whatever [`Self::gas_fee`] returns.
    pub async fn gas_fee_in_receiving(
        &self,
        sending_chain_id: ChainId,
        sending_asset_id: Address,
        sending_decimals: u8,
        receiving_chain_id: ChainId,
        receiving_asset_id: Address,
        receiving_decimals: u8,
    ) -> Result<U256, RouterError> {
        let (sender_fulfill, receiver_prepare) = tokio::try_join!(
            self.gas_fee(
                sending_chain_id,
                sending_asset_id,
                sending_decimals,
                ActionKind::Fulfill,
                Side::Sending,
            ),
            self.gas_fee(
                receiving_chain_id,
                receiving_asset_id,
                receiving_decimals,
                ActionKind::Prepare,
                Side::Receiving,
            ),
        )?;
        Ok(sender_fulfill.saturating_add(receiver_prepare))
    }
}

fn overflow_err(chain_id: ChainId) -> RouterError {
    RouterError::RpcError {
        message: "gas fee computation overflowed U256".into(),
        context: HashMap::from([("chain_id".into(), chain_id.to_string())]),
    }
}

/// Rescales a fixed-point value from `from_decimals` to `to_decimals`,
/// floor-dividing on the way down.
fn scale_decimals(value: U256, from_decimals: u8, to_decimals: u8) -> U256 {
    if from_decimals == to_decimals {
        return value;
    }
    if to_decimals > from_decimals {
        value * U256::from(10u64).pow(U256::from(to_decimals - from_decimals))
    } else {
        value / U256::from(10u64).pow(U256::from(from_decimals - to_decimals))
    }
}
