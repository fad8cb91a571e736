use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, Bytes, TransactionReceipt, U256,
};
use tokio::sync::RwLock;

use crate::error::RouterError;

/// Abstract read/write surface over an Ethereum-style JSON-RPC node.
///
/// A production implementation wraps `ethers::providers::Provider` over one
/// or more URLs; `MockChainProvider` below backs tests.
#[async_trait]
pub trait ChainProvider: Send + Sync + std::fmt::Debug {
    async fn read_transaction(&self, tx: TypedTransaction) -> Result<Bytes, RouterError>;

    async fn send_transaction(
        &self,
        tx: TypedTransaction,
    ) -> Result<TransactionReceipt, RouterError>;

    async fn get_balance(&self, address: Address) -> Result<U256, RouterError>;

    async fn get_code(&self, address: Address) -> Result<Bytes, RouterError>;

    async fn get_block_number(&self) -> Result<u64, RouterError>;

    async fn get_block_timestamp(&self, block_number: u64) -> Result<i64, RouterError>;

    async fn get_transaction_receipt(
        &self,
        tx_hash: ethers::types::H256,
    ) -> Result<Option<TransactionReceipt>, RouterError>;

    async fn get_decimals_for_asset(&self, asset: Address) -> Result<u8, RouterError>;

    async fn get_gas_price(&self) -> Result<U256, RouterError>;

    async fn get_transaction_count(&self, address: Address) -> Result<U256, RouterError>;
}

/// Falls over to the next configured provider URL on transport error, first
/// success wins. Mirrors "Multiple providers per chain with fallback" (§6.2).
#[derive(Debug, Clone)]
pub struct FallbackProvider {
    providers: Vec<Arc<dyn ChainProvider>>,
}

impl FallbackProvider {
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn ChainProvider>>) -> Self {
        Self { providers }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

macro_rules! fallback_call {
    ($self:ident, $method:ident $(, $arg:expr)*) => {{
        let mut last_err = None;
        for provider in &$self.providers {
            match provider.$method($($arg.clone()),*).await {
                Ok(value) => return Ok(value),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| RouterError::ProviderNotConfigured {
            chain_id: 0,
            context: std::collections::HashMap::new(),
        }))
    }};
}

#[async_trait]
impl ChainProvider for FallbackProvider {
    async fn read_transaction(&self, tx: TypedTransaction) -> Result<Bytes, RouterError> {
        fallback_call!(self, read_transaction, tx)
    }

    async fn send_transaction(
        &self,
        tx: TypedTransaction,
    ) -> Result<TransactionReceipt, RouterError> {
        fallback_call!(self, send_transaction, tx)
    }

    async fn get_balance(&self, address: Address) -> Result<U256, RouterError> {
        fallback_call!(self, get_balance, address)
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, RouterError> {
        fallback_call!(self, get_code, address)
    }

    async fn get_block_number(&self) -> Result<u64, RouterError> {
        let mut last_err = None;
        for provider in &self.providers {
            match provider.get_block_number().await {
                Ok(value) => return Ok(value),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| RouterError::ProviderNotConfigured {
            chain_id: 0,
            context: HashMap::new(),
        }))
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<i64, RouterError> {
        fallback_call!(self, get_block_timestamp, block_number)
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: ethers::types::H256,
    ) -> Result<Option<TransactionReceipt>, RouterError> {
        fallback_call!(self, get_transaction_receipt, tx_hash)
    }

    async fn get_decimals_for_asset(&self, asset: Address) -> Result<u8, RouterError> {
        fallback_call!(self, get_decimals_for_asset, asset)
    }

    async fn get_gas_price(&self) -> Result<U256, RouterError> {
        let mut last_err = None;
        for provider in &self.providers {
            match provider.get_gas_price().await {
                Ok(value) => return Ok(value),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| RouterError::ProviderNotConfigured {
            chain_id: 0,
            context: HashMap::new(),
        }))
    }

    async fn get_transaction_count(&self, address: Address) -> Result<U256, RouterError> {
        fallback_call!(self, get_transaction_count, address)
    }
}

/// In-memory `ChainProvider` double for unit/integration tests.
#[derive(Debug, Default)]
pub struct MockChainProvider {
    pub chain_id: u64,
    pub balances: RwLock<HashMap<Address, U256>>,
    pub decimals: RwLock<HashMap<Address, u8>>,
    pub block_number: RwLock<u64>,
    pub block_timestamps: RwLock<HashMap<u64, i64>>,
    pub gas_price: RwLock<U256>,
    pub nonces: RwLock<HashMap<Address, U256>>,
    pub receipts: RwLock<HashMap<ethers::types::H256, TransactionReceipt>>,
}

impl MockChainProvider {
    #[must_use]
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            gas_price: RwLock::new(U256::from(20_000_000_000u64)),
            ..Self::default()
        }
    }

    pub async fn set_balance(&self, address: Address, balance: U256) {
        self.balances.write().await.insert(address, balance);
    }

    pub async fn set_decimals(&self, asset: Address, decimals: u8) {
        self.decimals.write().await.insert(asset, decimals);
    }

    pub async fn set_block_number(&self, number: u64) {
        *self.block_number.write().await = number;
    }
}

#[async_trait]
impl ChainProvider for MockChainProvider {
    async fn read_transaction(&self, _tx: TypedTransaction) -> Result<Bytes, RouterError> {
        Ok(Bytes::default())
    }

    async fn send_transaction(
        &self,
        tx: TypedTransaction,
    ) -> Result<TransactionReceipt, RouterError> {
        let nonce = tx.nonce().copied().unwrap_or_default();
        let mut receipt = TransactionReceipt::default();
        receipt.transaction_hash = ethers::utils::keccak256(nonce.to_string()).into();
        receipt.status = Some(1u64.into());
        receipt.block_number = Some((*self.block_number.read().await).into());
        self.receipts
            .write()
            .await
            .insert(receipt.transaction_hash, receipt.clone());
        Ok(receipt)
    }

    async fn get_balance(&self, address: Address) -> Result<U256, RouterError> {
        Ok(self
            .balances
            .read()
            .await
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn get_code(&self, _address: Address) -> Result<Bytes, RouterError> {
        Ok(Bytes::default())
    }

    async fn get_block_number(&self) -> Result<u64, RouterError> {
        Ok(*self.block_number.read().await)
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<i64, RouterError> {
        Ok(self
            .block_timestamps
            .read()
            .await
            .get(&block_number)
            .copied()
            .unwrap_or_else(crate::domain::now_secs))
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: ethers::types::H256,
    ) -> Result<Option<TransactionReceipt>, RouterError> {
        Ok(self.receipts.read().await.get(&tx_hash).cloned())
    }

    async fn get_decimals_for_asset(&self, asset: Address) -> Result<u8, RouterError> {
        Ok(self
            .decimals
            .read()
            .await
            .get(&asset)
            .copied()
            .unwrap_or(18))
    }

    async fn get_gas_price(&self) -> Result<U256, RouterError> {
        Ok(*self.gas_price.read().await)
    }

    async fn get_transaction_count(&self, address: Address) -> Result<U256, RouterError> {
        Ok(self
            .nonces
            .read()
            .await
            .get(&address)
            .copied()
            .unwrap_or_default())
    }
}
