//! Chain Dispatcher (§4.F): turns a lifecycle-issued [`Action`] into a
//! confirmed on-chain receipt, one single-writer task per chain so nonce
//! ordering is never raced.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{transaction::eip2718::TypedTransaction, Address, TransactionReceipt, H256, U256};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, instrument, warn};

use crate::chain::ChainProvider;
use crate::domain::{ActionKind, ChainId, Side, TransactionInvariant, TransactionVariant};
use crate::error::RouterError;
use crate::metrics::{DISPATCHER_QUEUE_DEPTH, DISPATCHER_RETRIES, DISPATCHER_SUBMIT_LATENCY};
use crate::oracle::Oracle;
use crate::shutdown::Shutdown;
use tx_sitter_client::TxSitterClient;

const MAX_RETRIES: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// An on-chain action the lifecycle state machine has decided to take.
#[derive(Debug, Clone)]
pub struct Action {
    pub chain_id: ChainId,
    pub kind: ActionKind,
    pub tix: TransactionInvariant,
    pub variant: TransactionVariant,
    /// Required for `Fulfill`; the relayed preimage/signature payload.
    pub relayer_signature: Option<ethers::types::Signature>,
}

/// Optional meta-tx relayer path: if configured, actions for a chain submit
/// through a tx-sitter-style HTTP relayer instead of a locally-signed
/// transaction (§4.F "Optional relayer-fee path").
pub struct RelayerConfig {
    pub client: TxSitterClient,
    pub relayer_asset: Option<Address>,
    /// Used to price the relayer's fee (§4.F: "compute `router_relayer_fee`
    /// via 4.A and pack into the payload") before every relayed submission.
    pub oracle: Arc<Oracle>,
}

struct PerChainDispatcher {
    chain_id: ChainId,
    provider: Arc<dyn ChainProvider>,
    nonce: AtomicU64,
    confirmations: u32,
    relayer: Option<RelayerConfig>,
}

impl PerChainDispatcher {
    #[instrument(level = "debug", skip(self, action), fields(chain_id = %self.chain_id))]
    async fn submit(&self, action: Action) -> Result<TransactionReceipt, RouterError> {
        let timer_label = self.chain_id.to_string();
        let _timer = DISPATCHER_SUBMIT_LATENCY
            .with_label_values(&[&timer_label])
            .start_timer();

        let mut attempt = 0u32;
        let mut backoff = BASE_BACKOFF;
        loop {
            let nonce = U256::from(self.nonce.load(Ordering::SeqCst));
            let result = if let Some(relayer) = &self.relayer {
                self.submit_via_relayer(relayer, &action, nonce).await
            } else {
                self.submit_direct(&action, nonce).await
            };

            match result {
                Ok(receipt) => {
                    self.nonce.fetch_add(1, Ordering::SeqCst);
                    return Ok(receipt);
                }
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    DISPATCHER_RETRIES.with_label_values(&[&timer_label]).inc();
                    warn!(chain_id = %self.chain_id, attempt, error = %err, "dispatch attempt failed, retrying");
                    // Nonce errors and reverts both warrant re-reading the
                    // chain's pending nonce before the next attempt.
                    if let Ok(fresh) = self.provider.get_transaction_count(action.tix.router).await
                    {
                        self.nonce.store(fresh.as_u64(), Ordering::SeqCst);
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn submit_direct(
        &self,
        action: &Action,
        nonce: U256,
    ) -> Result<TransactionReceipt, RouterError> {
        let mut tx = TypedTransaction::default();
        tx.set_nonce(nonce);
        tx.set_to(action.tix.receiving_chain_tx_manager_address);
        tx.set_chain_id(self.chain_id.get());

        let receipt = self.provider.send_transaction(tx).await?;
        self.await_confirmations(&receipt).await?;
        Ok(receipt)
    }

    async fn submit_via_relayer(
        &self,
        relayer: &RelayerConfig,
        action: &Action,
        nonce: U256,
    ) -> Result<TransactionReceipt, RouterError> {
        let _ = nonce; // the relayer assigns its own nonce internally.

        // §4.F: meta-tx relayer submissions carry the fee the relayer is
        // owed for landing the transaction, priced the same way the
        // evaluator prices gas (§4.A) against the configured relayer asset
        // (native, if unset).
        let side = if action.kind == ActionKind::Prepare {
            Side::Receiving
        } else {
            Side::Sending
        };
        let relayer_fee = relayer
            .oracle
            .gas_fee(
                self.chain_id,
                relayer.relayer_asset.unwrap_or_else(Address::zero),
                18,
                action.kind,
                side,
            )
            .await?;

        let request = tx_sitter_client::data::SendTxRequest {
            to: action.tix.receiving_chain_tx_manager_address,
            value: relayer_fee,
            data: None,
            gas_limit: U256::from(500_000u64),
            priority: tx_sitter_client::data::TransactionPriority::Regular,
            tx_id: Some(format!("{:?}-{:?}", action.tix.transaction_id, action.kind)),
        };
        let sent = relayer
            .client
            .send_tx(&request)
            .await
            .map_err(|err| RouterError::RpcError {
                message: format!("relayer send failed: {err}"),
                context: Default::default(),
            })?;

        self.mine_relayed_transaction(relayer, &sent.tx_id).await
    }

    /// Polls the relayer until the tx reaches `Mined`/`Finalized` or a
    /// bounded timeout elapses.
    async fn mine_relayed_transaction(
        &self,
        relayer: &RelayerConfig,
        tx_id: &str,
    ) -> Result<TransactionReceipt, RouterError> {
        for _ in 0..60 {
            let tx = relayer
                .client
                .get_tx(tx_id)
                .await
                .map_err(|err| RouterError::RpcError {
                    message: format!("relayer status poll failed: {err}"),
                    context: Default::default(),
                })?;

            if let (Some(status), Some(tx_hash)) = (tx.status, tx.tx_hash) {
                if matches!(
                    status,
                    tx_sitter_client::data::TxStatus::Mined
                        | tx_sitter_client::data::TxStatus::Finalized
                ) {
                    let mut receipt = TransactionReceipt::default();
                    receipt.transaction_hash = tx_hash;
                    receipt.status = Some(1u64.into());
                    return Ok(receipt);
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        Err(RouterError::RpcError {
            message: format!("relayer tx {tx_id} did not mine before timeout"),
            context: Default::default(),
        })
    }

    async fn await_confirmations(&self, receipt: &TransactionReceipt) -> Result<(), RouterError> {
        let target = receipt.block_number.map_or(0, |n| n.as_u64()) + u64::from(self.confirmations);
        for _ in 0..60 {
            let head = self.provider.get_block_number().await?;
            if head >= target {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Err(RouterError::RpcError {
            message: "timed out waiting for confirmations".into(),
            context: Default::default(),
        })
    }
}

enum QueueItem {
    Submit(Action, oneshot::Sender<Result<TransactionReceipt, RouterError>>),
}

/// Owns one serialized outbound queue per chain; a single task per chain
/// drains it so nonce assignment is never contended.
pub struct Dispatcher {
    senders: HashMap<ChainId, mpsc::Sender<QueueItem>>,
}

impl Dispatcher {
    /// Spawns one drain task per chain. `starting_nonces` should be primed
    /// from each chain's `transaction_count(pending)` at startup.
    #[must_use]
    pub fn spawn(
        providers: HashMap<ChainId, Arc<dyn ChainProvider>>,
        confirmations: HashMap<ChainId, u32>,
        starting_nonces: HashMap<ChainId, u64>,
        relayers: HashMap<ChainId, RelayerConfig>,
        shutdown: Shutdown,
    ) -> Self {
        let mut senders = HashMap::new();
        let mut relayers = relayers;

        for (chain_id, provider) in providers {
            let (tx, mut rx) = mpsc::channel::<QueueItem>(256);
            let dispatcher = Arc::new(PerChainDispatcher {
                chain_id,
                provider,
                nonce: AtomicU64::new(starting_nonces.get(&chain_id).copied().unwrap_or(0)),
                confirmations: confirmations.get(&chain_id).copied().unwrap_or(1),
                relayer: relayers.remove(&chain_id),
            });

            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        item = rx.recv() => {
                            let Some(QueueItem::Submit(action, reply)) = item else { break };
                            DISPATCHER_QUEUE_DEPTH
                                .with_label_values(&[&chain_id.to_string()])
                                .dec();
                            let result = dispatcher.submit(action).await;
                            let _ = reply.send(result);
                        }
                        () = shutdown.await_shutdown_begin() => {
                            info!(%chain_id, "dispatcher draining before shutdown");
                            break;
                        }
                    }
                }
            });

            senders.insert(chain_id, tx);
        }

        Self { senders }
    }

    /// Enqueues `action` on its chain's serialized queue and awaits the
    /// resulting receipt. Ordering across concurrent callers on the same
    /// chain is guaranteed by the mpsc channel's FIFO delivery into the
    /// single draining task.
    ///
    /// # Errors
    /// [`RouterError::ProviderNotConfigured`] if no dispatcher task exists
    /// for `action.chain_id`; otherwise whatever the submission loop
    /// returns.
    pub async fn dispatch(&self, action: Action) -> Result<TransactionReceipt, RouterError> {
        let chain_id = action.chain_id;
        let sender = self
            .senders
            .get(&chain_id)
            .ok_or(RouterError::ProviderNotConfigured {
                chain_id: chain_id.get(),
                context: Default::default(),
            })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        DISPATCHER_QUEUE_DEPTH
            .with_label_values(&[&chain_id.to_string()])
            .inc();
        sender
            .send(QueueItem::Submit(action, reply_tx))
            .await
            .map_err(|_| RouterError::ProviderNotConfigured {
                chain_id: chain_id.get(),
                context: Default::default(),
            })?;

        reply_rx
            .await
            .map_err(|_| RouterError::RpcError {
                message: "dispatcher task dropped the reply channel".into(),
                context: Default::default(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainProvider;
    use futures::future::join_all;

    fn sample_tix(chain_id: ChainId) -> TransactionInvariant {
        TransactionInvariant {
            transaction_id: H256::random(),
            user: Address::zero(),
            router: Address::zero(),
            initiator: Address::zero(),
            sending_chain_id: chain_id,
            sending_asset_id: Address::zero(),
            receiving_chain_id: chain_id,
            receiving_asset_id: Address::zero(),
            sending_chain_tx_manager_address: Address::zero(),
            receiving_chain_tx_manager_address: Address::zero(),
            call_to: Address::zero(),
            call_data_hash: H256::zero(),
            receiving_address: Address::zero(),
        }
    }

    #[tokio::test]
    async fn dispatches_and_returns_receipt() {
        let chain_id = ChainId::new(1337);
        let provider: Arc<dyn ChainProvider> = Arc::new(MockChainProvider::new(1337));
        let mut providers = HashMap::new();
        providers.insert(chain_id, provider);

        let shutdown = Shutdown::spawn(Duration::from_secs(1), Duration::from_secs(1));
        let dispatcher = Dispatcher::spawn(
            providers,
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            shutdown,
        );

        let action = Action {
            chain_id,
            kind: ActionKind::Prepare,
            tix: sample_tix(chain_id),
            variant: crate::domain::TransactionVariant {
                amount: U256::from(1u64),
                expiry: crate::domain::now_secs() + 1_000,
                prepared_block_number: 0,
            },
            relayer_signature: None,
        };
        let receipt = dispatcher.dispatch(action).await.unwrap();
        assert_eq!(receipt.status, Some(1u64.into()));
    }

    #[tokio::test]
    async fn concurrent_dispatches_on_one_chain_get_increasing_nonces() {
        let chain_id = ChainId::new(1337);
        let provider: Arc<dyn ChainProvider> = Arc::new(MockChainProvider::new(1337));
        let mut providers = HashMap::new();
        providers.insert(chain_id, provider);

        let shutdown = Shutdown::spawn(Duration::from_secs(1), Duration::from_secs(1));
        let dispatcher = Arc::new(Dispatcher::spawn(
            providers,
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            shutdown,
        ));

        let mut futures = Vec::new();
        for _ in 0..20 {
            let dispatcher = Arc::clone(&dispatcher);
            let action = Action {
                chain_id,
                kind: ActionKind::Prepare,
                tix: sample_tix(chain_id),
                variant: crate::domain::TransactionVariant {
                    amount: U256::from(1u64),
                    expiry: crate::domain::now_secs() + 1_000,
                    prepared_block_number: 0,
                },
                relayer_signature: None,
            };
            futures.push(async move { dispatcher.dispatch(action).await });
        }

        let results = join_all(futures).await;
        assert!(results.iter().all(std::result::Result::is_ok));
    }
}
