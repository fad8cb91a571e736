use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::domain::{ChainId, TransactionRecord};
use crate::error::RouterError;

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct TransactionsData {
    transactions: Vec<TransactionRecord>,
}

/// Query surface over a per-chain subgraph deployment (§6.3).
///
/// `get_sync_block` reports how far the subgraph has indexed so the tracker
/// can hold off on serving stale state; `get_transactions_since` returns
/// records that changed since the last poll.
#[async_trait]
pub trait Indexer: Send + Sync + std::fmt::Debug {
    async fn get_sync_block(&self, chain_id: ChainId) -> Result<u64, RouterError>;

    async fn get_transactions_since(
        &self,
        chain_id: ChainId,
        since_block: u64,
    ) -> Result<Vec<TransactionRecord>, RouterError>;
}

/// Queries a real subgraph deployment over HTTP via a plain GraphQL POST.
#[derive(Debug)]
pub struct GraphQlIndexer {
    client: reqwest::Client,
    endpoints: HashMap<ChainId, String>,
}

impl GraphQlIndexer {
    #[must_use]
    pub fn new(endpoints: HashMap<ChainId, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }

    fn endpoint(&self, chain_id: ChainId) -> Result<&str, RouterError> {
        self.endpoints
            .get(&chain_id)
            .map(String::as_str)
            .ok_or(RouterError::ChainNotSupported {
                chain_id: chain_id.get(),
                context: Default::default(),
            })
    }

    async fn query<T: for<'de> Deserialize<'de>>(
        &self,
        chain_id: ChainId,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, RouterError> {
        let endpoint = self.endpoint(chain_id)?;
        let response = self
            .client
            .post(endpoint)
            .json(&GraphQlRequest { query, variables })
            .send()
            .await
            .map_err(|err| RouterError::RpcError {
                message: format!("subgraph request failed: {err}"),
                context: Default::default(),
            })?;

        let body: GraphQlResponse<T> =
            response.json().await.map_err(|err| RouterError::RpcError {
                message: format!("subgraph response decode failed: {err}"),
                context: Default::default(),
            })?;

        if let Some(first) = body.errors.first() {
            return Err(RouterError::RpcError {
                message: format!("subgraph returned errors: {}", first.message),
                context: Default::default(),
            });
        }

        body.data.ok_or_else(|| RouterError::RpcError {
            message: "subgraph response missing data".into(),
            context: Default::default(),
        })
    }
}

#[async_trait]
impl Indexer for GraphQlIndexer {
    async fn get_sync_block(&self, chain_id: ChainId) -> Result<u64, RouterError> {
        #[derive(Deserialize)]
        struct Meta {
            block: BlockRef,
        }
        #[derive(Deserialize)]
        struct BlockRef {
            number: u64,
        }
        #[derive(Deserialize)]
        struct Data {
            _meta: Meta,
        }

        let data: Data = self
            .query(
                chain_id,
                "{ _meta { block { number } } }",
                serde_json::Value::Null,
            )
            .await?;
        Ok(data._meta.block.number)
    }

    async fn get_transactions_since(
        &self,
        chain_id: ChainId,
        since_block: u64,
    ) -> Result<Vec<TransactionRecord>, RouterError> {
        let data: TransactionsData = self
            .query(
                chain_id,
                "query($since: BigInt!) { transactions(where: { blockNumber_gte: $since }) { .. } }",
                serde_json::json!({ "since": since_block }),
            )
            .await?;
        Ok(data.transactions)
    }
}

/// In-memory double for tests and for chains without a deployed subgraph:
/// records are injected directly via [`MockIndexer::push`].
#[derive(Debug, Default)]
pub struct MockIndexer {
    sync_blocks: RwLock<HashMap<ChainId, u64>>,
    records: RwLock<HashMap<ChainId, Vec<TransactionRecord>>>,
}

impl MockIndexer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_sync_block(&self, chain_id: ChainId, block: u64) {
        self.sync_blocks.write().await.insert(chain_id, block);
    }

    pub async fn push(&self, chain_id: ChainId, record: TransactionRecord) {
        self.records
            .write()
            .await
            .entry(chain_id)
            .or_default()
            .push(record);
    }
}

#[async_trait]
impl Indexer for MockIndexer {
    async fn get_sync_block(&self, chain_id: ChainId) -> Result<u64, RouterError> {
        Ok(self
            .sync_blocks
            .read()
            .await
            .get(&chain_id)
            .copied()
            .unwrap_or(0))
    }

    async fn get_transactions_since(
        &self,
        chain_id: ChainId,
        since_block: u64,
    ) -> Result<Vec<TransactionRecord>, RouterError> {
        Ok(self
            .records
            .read()
            .await
            .get(&chain_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.variant.prepared_block_number >= since_block)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
