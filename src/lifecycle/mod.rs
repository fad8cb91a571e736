//! Transaction Lifecycle State Machine (§4.E): one per `(transaction_id,
//! user)`, driven by tracker events and an expiry ticker, deciding the next
//! on-chain action and handing it to the [`Dispatcher`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, Signature, H256};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::chain::{ChainProvider, MessagingTransport, RouterMessage};
use crate::dispatcher::{Action, Dispatcher};
use crate::domain::{
    now_secs, ActionKind, ChainId, TransactionInvariant, TransactionRecord, TransactionStatus,
    TransactionVariant, SENDER_PREPARE_BUFFER,
};
use crate::error::RouterError;
use crate::metrics::{LIFECYCLE_ACTIVE, LIFECYCLE_TRANSITIONS};
use crate::shutdown::Shutdown;
use crate::tracker::{Tracker, TransactionEvent};

/// States the machine named in §4.E's diagram. `Idle` is implicit: no entry
/// exists in the registry until a `SenderPrepared` event is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    SenderPrepared,
    BothPrepared,
    ReceiverFulfilled,
    ReceiverCancelled,
    Terminal(TransactionStatus),
}

impl LifecycleState {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::SenderPrepared => "sender_prepared",
            Self::BothPrepared => "both_prepared",
            Self::ReceiverFulfilled => "receiver_fulfilled",
            Self::ReceiverCancelled => "receiver_cancelled",
            Self::Terminal(TransactionStatus::Fulfilled) => "terminal_fulfilled",
            Self::Terminal(TransactionStatus::Cancelled) => "terminal_cancelled",
            Self::Terminal(TransactionStatus::Prepared) => "terminal_prepared",
        }
    }
}

struct Entry {
    state: LifecycleState,
    tix: TransactionInvariant,
    sender_variant: TransactionVariant,
    sender_chain_id: ChainId,
    receiver_variant: Option<TransactionVariant>,
    receiver_chain_id: ChainId,
    /// On-chain timestamp of the block that mined the sender-side prepare,
    /// the basis for the `SENDER_PREPARE_BUFFER` safety window.
    sender_prepared_at: i64,
}

type Key = (H256, Address);

/// Per-transaction registry plus the per-key single-flight lock described in
/// §5: "read current on-chain state → decide → dispatch" never interleaves
/// with itself for the same key.
pub struct Lifecycle {
    tracker: Arc<Tracker>,
    dispatcher: Arc<Dispatcher>,
    providers: HashMap<ChainId, Arc<dyn ChainProvider>>,
    entries: Mutex<HashMap<Key, Entry>>,
    in_flight: Mutex<std::collections::HashSet<Key>>,
    /// Relayed fulfill signatures received over `metatx.>`, keyed by the
    /// same `(transaction_id, user)` as `entries`. Consumed (and removed)
    /// once the matching sender-side fulfill is dispatched.
    relayer_signatures: Mutex<HashMap<Key, Signature>>,
}

impl Lifecycle {
    #[must_use]
    pub fn new(
        tracker: Arc<Tracker>,
        dispatcher: Arc<Dispatcher>,
        providers: HashMap<ChainId, Arc<dyn ChainProvider>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tracker,
            dispatcher,
            providers,
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(std::collections::HashSet::new()),
            relayer_signatures: Mutex::new(HashMap::new()),
        })
    }

    /// Spawns the event-consumer task, the periodic expiry sweep, and a
    /// `metatx.>` listener that caches relayed fulfill signatures for
    /// [`Self::on_receiver_fulfilled`] to pick up, all honoring `shutdown`.
    pub fn spawn(
        self: &Arc<Self>,
        shutdown: Shutdown,
        expiry_check_interval: Duration,
        transport: Arc<dyn MessagingTransport>,
    ) {
        let this = Arc::clone(self);
        let mut events = self.tracker.subscribe();
        let event_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Ok(event) => this.handle_event(event).await,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "lifecycle event subscriber lagged, events dropped");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    () = event_shutdown.await_shutdown_begin() => break,
                }
            }
        });

        let this = Arc::clone(self);
        let sweep_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(expiry_check_interval) => {
                        this.sweep_expired().await;
                    }
                    () = sweep_shutdown.await_shutdown_begin() => break,
                }
            }
        });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut messages = transport.subscribe().await;
            loop {
                tokio::select! {
                    message = messages.recv() => {
                        match message {
                            Ok(RouterMessage::MetaTxRequest { transaction_id, user, signature, .. }) => {
                                this.relayer_signatures
                                    .lock()
                                    .await
                                    .insert((transaction_id, user), signature);
                            }
                            Ok(_) => {} // not ours (e.g. auction.>).
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "lifecycle metatx subscriber lagged, messages dropped");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    () = shutdown.await_shutdown_begin() => break,
                }
            }
        });
    }

    #[instrument(level = "debug", skip(self, event))]
    async fn handle_event(&self, event: TransactionEvent) {
        let result = match event {
            TransactionEvent::SenderPrepared(record) => self.on_sender_prepared(record).await,
            TransactionEvent::ReceiverPrepared(record) => self.on_receiver_prepared(record).await,
            TransactionEvent::ReceiverFulfilled(record) => {
                self.on_receiver_fulfilled(record).await
            }
            TransactionEvent::SenderFulfilled(record) => self.on_sender_fulfilled(record).await,
            TransactionEvent::ReceiverCancelled(record) => {
                self.on_receiver_cancelled(record).await
            }
            TransactionEvent::SenderCancelled(record) => self.on_sender_cancelled(record).await,
        };
        if let Err(err) = result {
            warn!(error = %err, "lifecycle event handling failed");
        }
    }

    async fn with_single_flight<F, Fut>(&self, key: Key, body: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), RouterError>>,
    {
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(key) {
                // Re-entry while an action is already in flight for this
                // tx id is a documented no-op (§4.E concurrency note).
                return;
            }
        }
        if let Err(err) = body().await {
            warn!(error = %err, "lifecycle action failed");
        }
        self.in_flight.lock().await.remove(&key);
    }

    async fn on_sender_prepared(&self, record: TransactionRecord) -> Result<(), RouterError> {
        let key = record.tix.key();
        let sender_prepared_at = match self.providers.get(&record.chain_id) {
            Some(provider) => {
                provider
                    .get_block_timestamp(record.variant.prepared_block_number)
                    .await?
            }
            None => now_secs(),
        };
        self.with_single_flight(key, || async {
            {
                let mut entries = self.entries.lock().await;
                if entries.contains_key(&key) {
                    return Ok(()); // duplicate delivery: idempotent no-op.
                }
                entries.insert(
                    key,
                    Entry {
                        state: LifecycleState::SenderPrepared,
                        tix: record.tix.clone(),
                        sender_variant: record.variant,
                        sender_chain_id: record.chain_id,
                        receiver_variant: None,
                        receiver_chain_id: record.tix.receiving_chain_id,
                        sender_prepared_at,
                    },
                );
                LIFECYCLE_ACTIVE.set(entries.len() as f64);
            }
            LIFECYCLE_TRANSITIONS
                .with_label_values(&[LifecycleState::SenderPrepared.label()])
                .inc();

            let existing_receiver = self
                .tracker
                .get_transaction_for_chain(
                    record.tix.transaction_id,
                    record.tix.user,
                    record.tix.receiving_chain_id,
                )
                .await?;
            if existing_receiver.is_some() {
                // ReceiverTxExists: the receiver side is already prepared,
                // just advance local state instead of re-dispatching.
                return self.on_receiver_prepared_locked(key).await;
            }

            let action = Action {
                chain_id: record.tix.receiving_chain_id,
                kind: ActionKind::Prepare,
                tix: record.tix.clone(),
                variant: record.variant,
                relayer_signature: None,
            };
            info!(transaction_id = ?record.tix.transaction_id, "dispatching receiver prepare");
            self.dispatcher.dispatch(action).await?;
            Ok(())
        })
        .await;
        Ok(())
    }

    async fn on_receiver_prepared_locked(&self, key: Key) -> Result<(), RouterError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&key) {
            entry.state = LifecycleState::BothPrepared;
        }
        drop(entries);
        LIFECYCLE_TRANSITIONS
            .with_label_values(&[LifecycleState::BothPrepared.label()])
            .inc();
        Ok(())
    }

    async fn on_receiver_prepared(&self, record: TransactionRecord) -> Result<(), RouterError> {
        let key = record.tix.key();
        self.with_single_flight(key, || async {
            let mut entries = self.entries.lock().await;
            let Some(entry) = entries.get_mut(&key) else {
                return Ok(());
            };
            entry.receiver_variant = Some(record.variant);
            entry.state = LifecycleState::BothPrepared;
            drop(entries);
            LIFECYCLE_TRANSITIONS
                .with_label_values(&[LifecycleState::BothPrepared.label()])
                .inc();
            Ok(())
        })
        .await;
        Ok(())
    }

    /// Invoked once the preimage has been relayed via messaging and the
    /// receiver-side fulfill has landed on chain; dispatches the matching
    /// sender-side fulfill using the receiver's relayed signature.
    async fn on_receiver_fulfilled(&self, record: TransactionRecord) -> Result<(), RouterError> {
        let key = record.tix.key();
        self.with_single_flight(key, || async {
            {
                let mut entries = self.entries.lock().await;
                if let Some(entry) = entries.get_mut(&key) {
                    entry.state = LifecycleState::ReceiverFulfilled;
                }
            }
            LIFECYCLE_TRANSITIONS
                .with_label_values(&[LifecycleState::ReceiverFulfilled.label()])
                .inc();

            let sender_chain_id = {
                let entries = self.entries.lock().await;
                entries.get(&key).map(|e| e.sender_chain_id)
            };
            let Some(sender_chain_id) = sender_chain_id else {
                return Ok(());
            };

            let relayer_signature = self.relayer_signatures.lock().await.remove(&key);

            let action = Action {
                chain_id: sender_chain_id,
                kind: ActionKind::Fulfill,
                tix: record.tix.clone(),
                variant: record.variant,
                relayer_signature,
            };
            self.dispatcher.dispatch(action).await?;
            Ok(())
        })
        .await;
        Ok(())
    }

    async fn on_sender_fulfilled(&self, record: TransactionRecord) -> Result<(), RouterError> {
        self.finalize(record.tix.key(), TransactionStatus::Fulfilled)
            .await;
        Ok(())
    }

    async fn on_receiver_cancelled(&self, record: TransactionRecord) -> Result<(), RouterError> {
        let key = record.tix.key();
        self.with_single_flight(key, || async {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(&key) {
                entry.state = LifecycleState::ReceiverCancelled;
            }
            drop(entries);
            LIFECYCLE_TRANSITIONS
                .with_label_values(&[LifecycleState::ReceiverCancelled.label()])
                .inc();
            Ok(())
        })
        .await;
        Ok(())
    }

    async fn on_sender_cancelled(&self, record: TransactionRecord) -> Result<(), RouterError> {
        self.finalize(record.tix.key(), TransactionStatus::Cancelled)
            .await;
        Ok(())
    }

    async fn finalize(&self, key: Key, status: TransactionStatus) {
        let mut entries = self.entries.lock().await;
        entries.remove(&key);
        LIFECYCLE_ACTIVE.set(entries.len() as f64);
        drop(entries);
        LIFECYCLE_TRANSITIONS
            .with_label_values(&[LifecycleState::Terminal(status).label()])
            .inc();
    }

    /// Evaluates every active entry's cancel policy (P5) and dispatches a
    /// sender-side cancel where it is safe to do so. Orphaned sender
    /// records (no receiver record ever appeared) fall under the same
    /// "receiver absent" branch.
    async fn sweep_expired(&self) {
        let keys: Vec<Key> = self.entries.lock().await.keys().copied().collect();
        for key in keys {
            self.maybe_cancel(key).await;
        }
    }

    async fn maybe_cancel(&self, key: Key) {
        self.with_single_flight(key, || async {
            let snapshot = {
                let entries = self.entries.lock().await;
                entries.get(&key).map(|entry| {
                    (
                        entry.tix.clone(),
                        entry.sender_variant,
                        entry.sender_chain_id,
                        entry.receiver_chain_id,
                        entry.sender_prepared_at,
                        entry.state,
                    )
                })
            };
            let Some((tix, sender_variant, sender_chain_id, receiving_chain_id, prepared_at, state)) =
                snapshot
            else {
                return Ok(());
            };
            if matches!(state, LifecycleState::Terminal(_)) {
                return Ok(());
            }

            let now = now_secs();
            if now < sender_variant.expiry {
                return Ok(());
            }

            let receiver_record = self
                .tracker
                .get_transaction_for_chain(tix.transaction_id, tix.user, receiving_chain_id)
                .await?;
            let receiver_is_blocking = match &receiver_record {
                None => false,
                Some(record) => {
                    record.status != TransactionStatus::Cancelled && now < record.variant.expiry
                }
            };
            if receiver_is_blocking {
                return Ok(());
            }

            let elapsed = now - prepared_at;
            if elapsed < SENDER_PREPARE_BUFFER {
                return Err(RouterError::SenderTxTooNew {
                    elapsed,
                    required: SENDER_PREPARE_BUFFER,
                    context: Default::default(),
                });
            }

            let action = Action {
                chain_id: sender_chain_id,
                kind: ActionKind::Cancel,
                tix,
                variant: sender_variant,
                relayer_signature: None,
            };
            self.dispatcher.dispatch(action).await?;
            Ok(())
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionVariant;
    use ethers::types::U256;
    use std::collections::HashMap as StdHashMap;

    fn tix(sender_chain: ChainId, receiver_chain: ChainId) -> TransactionInvariant {
        TransactionInvariant {
            transaction_id: H256::random(),
            user: Address::from_low_u64_be(1),
            router: Address::zero(),
            initiator: Address::from_low_u64_be(1),
            sending_chain_id: sender_chain,
            sending_asset_id: Address::zero(),
            receiving_chain_id: receiver_chain,
            receiving_asset_id: Address::zero(),
            sending_chain_tx_manager_address: Address::zero(),
            receiving_chain_tx_manager_address: Address::zero(),
            call_to: Address::zero(),
            call_data_hash: H256::zero(),
            receiving_address: Address::zero(),
        }
    }

    async fn harness() -> (Arc<Lifecycle>, Arc<Tracker>) {
        let sender_chain = ChainId::new(1337);
        let receiver_chain = ChainId::new(1338);
        let indexer = Arc::new(crate::chain::MockIndexer::new());
        let mut chains = StdHashMap::new();
        for chain_id in [sender_chain, receiver_chain] {
            chains.insert(
                chain_id,
                crate::tracker::TrackerChainConfig {
                    indexer_uris: vec![],
                    poll_interval: Duration::from_secs(5),
                    router: Address::zero(),
                },
            );
        }
        let tracker = Tracker::new(chains, StdHashMap::new(), indexer);

        let mut providers: StdHashMap<ChainId, Arc<dyn crate::chain::ChainProvider>> =
            StdHashMap::new();
        for chain_id in [sender_chain, receiver_chain] {
            providers.insert(
                chain_id,
                Arc::new(crate::chain::MockChainProvider::new(chain_id.get())),
            );
        }
        let shutdown = Shutdown::spawn(Duration::from_secs(1), Duration::from_secs(1));
        let lifecycle_providers = providers.clone();
        let dispatcher = Arc::new(Dispatcher::spawn(
            providers,
            StdHashMap::new(),
            StdHashMap::new(),
            StdHashMap::new(),
            shutdown,
        ));

        let lifecycle = Lifecycle::new(Arc::clone(&tracker), dispatcher, lifecycle_providers);
        (lifecycle, tracker)
    }

    #[tokio::test]
    async fn sender_prepared_dispatches_receiver_prepare() {
        let (lifecycle, _tracker) = harness().await;
        let sender_chain = ChainId::new(1337);
        let receiver_chain = ChainId::new(1338);
        let record = TransactionRecord {
            tix: tix(sender_chain, receiver_chain),
            variant: TransactionVariant {
                amount: U256::from(1u64),
                expiry: now_secs() + 10_000,
                prepared_block_number: 1,
            },
            status: TransactionStatus::Prepared,
            chain_id: sender_chain,
        };
        lifecycle
            .handle_event(TransactionEvent::SenderPrepared(record))
            .await;

        let entries = lifecycle.entries.lock().await;
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn cancel_too_soon_is_rejected() {
        let (lifecycle, _tracker) = harness().await;
        let sender_chain = ChainId::new(1337);
        let receiver_chain = ChainId::new(1338);
        let invariant = tix(sender_chain, receiver_chain);
        let key = invariant.key();

        {
            let mut entries = lifecycle.entries.lock().await;
            entries.insert(
                key,
                Entry {
                    state: LifecycleState::SenderPrepared,
                    tix: invariant,
                    sender_variant: TransactionVariant {
                        amount: U256::from(1u64),
                        expiry: now_secs() - 1,
                        prepared_block_number: 1,
                    },
                    sender_chain_id: sender_chain,
                    receiver_variant: None,
                    receiver_chain_id: receiver_chain,
                    sender_prepared_at: now_secs() - 600,
                },
            );
        }

        lifecycle.maybe_cancel(key).await;
        // maybe_cancel swallows the SenderTxTooNew via with_single_flight's
        // internal warn!; assert the entry is still present (not cancelled).
        assert!(lifecycle.entries.lock().await.contains_key(&key));
    }

    #[tokio::test]
    async fn receiver_fulfilled_consumes_relayed_signature_for_sender_fulfill() {
        let (lifecycle, _tracker) = harness().await;
        let sender_chain = ChainId::new(1337);
        let receiver_chain = ChainId::new(1338);
        let invariant = tix(sender_chain, receiver_chain);
        let key = invariant.key();

        {
            let mut entries = lifecycle.entries.lock().await;
            entries.insert(
                key,
                Entry {
                    state: LifecycleState::BothPrepared,
                    tix: invariant.clone(),
                    sender_variant: TransactionVariant {
                        amount: U256::from(1u64),
                        expiry: now_secs() + 10_000,
                        prepared_block_number: 1,
                    },
                    sender_chain_id: sender_chain,
                    receiver_variant: None,
                    receiver_chain_id: receiver_chain,
                    sender_prepared_at: now_secs(),
                },
            );
        }

        let signature = Signature {
            r: U256::from(1u64),
            s: U256::from(2u64),
            v: 27,
        };
        lifecycle
            .relayer_signatures
            .lock()
            .await
            .insert(key, signature);

        let record = TransactionRecord {
            tix: invariant,
            variant: TransactionVariant {
                amount: U256::from(1u64),
                expiry: now_secs() + 10_000,
                prepared_block_number: 2,
            },
            status: TransactionStatus::Fulfilled,
            chain_id: receiver_chain,
        };
        lifecycle
            .handle_event(TransactionEvent::ReceiverFulfilled(record))
            .await;

        // Consumed: on_receiver_fulfilled removes it once it builds the
        // sender-side fulfill Action.
        assert!(!lifecycle
            .relayer_signatures
            .lock()
            .await
            .contains_key(&key));
    }
}
