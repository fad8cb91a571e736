//! End-to-end evaluator scenarios (§8.3 S1/S2/S4), built against the
//! crate's public surface the way a deployment would wire it: `Tracker` +
//! `Oracle` + `Evaluator` backed by in-memory collaborator fakes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, Bytes, H256, U256};
use xchain_router::chain::{
    ChainProvider, Indexer, InMemoryTransport, LocalSigner, MessagingTransport, MockChainProvider,
    MockIndexer, RouterMessage, Signer,
};
use xchain_router::domain::{AuctionRequest, ChainConfig, ChainId, SwapPool, SwapPoolAsset, AUCTION_EXPIRY_BUFFER, now_secs};
use xchain_router::error::RouterError;
use xchain_router::evaluator::Evaluator;
use xchain_router::oracle::{Oracle, OracleChainConfig};
use xchain_router::shutdown::Shutdown;
use xchain_router::tracker::{Tracker, TrackerChainConfig};

const SENDING: u64 = 1337;
const RECEIVING: u64 = 1338;

async fn build_evaluator(receiving_asset_balance: U256) -> Evaluator {
    let sending_chain = ChainId::new(SENDING);
    let receiving_chain = ChainId::new(RECEIVING);

    let indexer: Arc<dyn Indexer> = Arc::new(MockIndexer::new());

    let mut chains = HashMap::new();
    for chain_id in [sending_chain, receiving_chain] {
        chains.insert(
            chain_id,
            TrackerChainConfig {
                indexer_uris: vec!["http://indexer.local".into()],
                poll_interval: Duration::from_secs(5),
                router: Address::zero(),
            },
        );
    }

    let sending_provider = Arc::new(MockChainProvider::new(SENDING));
    let receiving_provider = Arc::new(MockChainProvider::new(RECEIVING));
    // Router's own native balance on each chain, read by the evaluator's
    // gas-floor check (step 13) at `Address::zero()` == the router address.
    sending_provider
        .set_balance(Address::zero(), U256::exp10(20))
        .await;
    receiving_provider
        .set_balance(Address::zero(), U256::exp10(20))
        .await;

    let mut providers: HashMap<ChainId, Arc<dyn ChainProvider>> = HashMap::new();
    providers.insert(sending_chain, sending_provider.clone());
    providers.insert(receiving_chain, receiving_provider.clone());

    let tracker = Tracker::new(chains, providers.clone(), indexer);
    tracker
        .set_asset_balance(sending_chain, Address::from_low_u64_be(1), U256::from(10_000_000_000u64))
        .await;
    tracker
        .set_asset_balance(receiving_chain, Address::from_low_u64_be(2), receiving_asset_balance)
        .await;

    let mut oracle_providers: HashMap<ChainId, Arc<dyn ChainProvider>> = HashMap::new();
    let mut oracle_config = HashMap::new();
    for chain_id in [sending_chain, receiving_chain] {
        oracle_providers.insert(chain_id, Arc::new(MockChainProvider::new(chain_id.get())));
        oracle_config.insert(
            chain_id,
            OracleChainConfig {
                // No oracle address configured: `Oracle::gas_fee` degrades
                // to a flat zero fee (P6), keeping the expected output
                // amounts in these tests simple pool-quote arithmetic.
                price_oracle_address: None,
                native_usd_price: U256::from(2_000u64) * U256::exp10(18),
            },
        );
    }
    let oracle = Arc::new(Oracle::new(oracle_providers, oracle_config));

    let pool = SwapPool {
        name: "usdc".into(),
        assets: vec![
            SwapPoolAsset {
                chain_id: sending_chain,
                asset_id: Address::from_low_u64_be(1),
                weight: 1,
                decimals: 6,
            },
            SwapPoolAsset {
                chain_id: receiving_chain,
                asset_id: Address::from_low_u64_be(2),
                weight: 1,
                decimals: 6,
            },
        ],
    };

    let mut chain_configs = HashMap::new();
    for chain_id in [sending_chain, receiving_chain] {
        chain_configs.insert(
            chain_id,
            ChainConfig {
                providers: vec!["http://localhost".into()],
                confirmations: 1,
                min_gas: U256::from(1_000_000u64),
                transaction_manager_address: Address::zero(),
                gas_stations: vec![],
                router_contract_relayer_asset: None,
            },
        );
    }

    let signer: Arc<dyn Signer> = Arc::new(
        LocalSigner::from_private_key(
            "0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
        )
        .unwrap(),
    );

    Evaluator::new(
        tracker,
        oracle,
        signer,
        vec![pool],
        chain_configs,
        5_000,
        0.1,
        100,
        true,
    )
}

fn request() -> AuctionRequest {
    AuctionRequest {
        user: Address::from_low_u64_be(0xAAAA),
        initiator: Address::from_low_u64_be(0xAAAA),
        sending_chain_id: ChainId::new(SENDING),
        sending_asset_id: Address::from_low_u64_be(1),
        receiving_chain_id: ChainId::new(RECEIVING),
        receiving_asset_id: Address::from_low_u64_be(2),
        receiving_address: Address::from_low_u64_be(0xBBBB),
        call_to: Address::zero(),
        call_data_hash: H256::zero(),
        amount: U256::from(1_000_000u64),
        expiry: now_secs() + AUCTION_EXPIRY_BUFFER + 3_600,
        encrypted_call_data: Bytes::default(),
        dry_run: false,
    }
}

#[tokio::test]
async fn s1_happy_path_produces_signed_bid() {
    let evaluator = build_evaluator(U256::from(10_000_000_000u64)).await;
    let bid = evaluator.evaluate(request()).await.unwrap();
    assert!(bid.signature.is_some());
    assert!(bid.amount_received > U256::zero());
    assert!(bid.amount_received < request().amount);
}

#[tokio::test]
async fn s2_replay_within_window_is_rate_limited() {
    let evaluator = build_evaluator(U256::from(10_000_000_000u64)).await;
    evaluator.evaluate(request()).await.unwrap();
    let err = evaluator.evaluate(request()).await.unwrap_err();
    assert!(matches!(err, RouterError::AuctionRateExceeded { .. }));
}

#[tokio::test]
async fn s4_thin_receiving_pool_is_rejected_on_price_impact() {
    // The AMM's output can never exceed the receiving side's actual pool
    // balance (it saturates at zero), so draining a near-empty pool reads
    // as high slippage (step 9) rather than the separate liquidity check
    // (step 12), which guards rounding/edge cases the curve itself cannot.
    let evaluator = build_evaluator(U256::from(1u64)).await;
    let err = evaluator.evaluate(request()).await.unwrap_err();
    assert!(matches!(err, RouterError::PriceImpactTooHigh { .. }));
}

#[tokio::test]
async fn zero_amount_request_is_rejected_before_any_external_reads() {
    let evaluator = build_evaluator(U256::from(10_000_000_000u64)).await;
    let mut req = request();
    req.amount = U256::zero();
    let err = evaluator.evaluate(req).await.unwrap_err();
    assert!(matches!(err, RouterError::ZeroValueBid { .. }));
}

#[tokio::test]
async fn expiry_too_close_to_buffer_is_rejected() {
    let evaluator = build_evaluator(U256::from(10_000_000_000u64)).await;
    let mut req = request();
    req.expiry = now_secs() + AUCTION_EXPIRY_BUFFER - 1;
    let err = evaluator.evaluate(req).await.unwrap_err();
    assert!(matches!(err, RouterError::AuctionExpired { .. }));
}

#[tokio::test]
async fn dry_run_request_produces_unsigned_bid() {
    let evaluator = build_evaluator(U256::from(10_000_000_000u64)).await;
    let mut req = request();
    req.dry_run = true;
    let bid = evaluator.evaluate(req).await.unwrap();
    assert!(bid.signature.is_none());
}

#[tokio::test]
async fn subscriber_answers_auction_request_published_on_transport() {
    let evaluator = Arc::new(build_evaluator(U256::from(10_000_000_000u64)).await);
    let transport: Arc<dyn MessagingTransport> = InMemoryTransport::shared(16);
    let shutdown = Shutdown::spawn(Duration::from_secs(1), Duration::from_secs(1));

    let mut replies = transport.subscribe().await;
    evaluator.spawn_subscriber(Arc::clone(&transport), shutdown);

    transport
        .publish(RouterMessage::AuctionRequest {
            receiving_chain_id: ChainId::new(RECEIVING),
            request: request(),
        })
        .await
        .unwrap();

    loop {
        match replies.recv().await.unwrap() {
            RouterMessage::Bid { bid, .. } => {
                assert!(bid.signature.is_some());
                break;
            }
            RouterMessage::AuctionRequest { .. } => continue, // our own publish, echoed back
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
