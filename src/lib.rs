//! Cross-chain liquidity router daemon.
//!
//! Participates in auctions for an HTLC-style bridging protocol, bidding on
//! swaps it can profitably fulfill and driving the resulting two-phase
//! commit (prepare / fulfill / cancel) across both chains. See the module
//! docs on [`evaluator`], [`tracker`], [`lifecycle`] and [`dispatcher`] for
//! the four subsystems that make up the routing core.

pub mod admin;
pub mod amm;
pub mod chain;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod evaluator;
pub mod lifecycle;
pub mod metrics;
pub mod oracle;
pub mod shutdown;
pub mod tracker;
pub mod utils;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::admin::AdminState;
use crate::chain::{
    ChainProvider, Indexer, InMemoryTransport, MessagingTransport, MockChainProvider, MockIndexer,
    Signer,
};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::domain::{ChainConfig, ChainId, SwapPool, SwapPoolAsset};
use crate::evaluator::Evaluator;
use crate::lifecycle::Lifecycle;
use crate::oracle::{Oracle, OracleChainConfig};
use crate::shutdown::Shutdown;
use crate::tracker::{Tracker, TrackerChainConfig};

/// Capacity of the in-process auction/metatx broadcast channel. A real NATS
/// deployment (per `Config::nats_url`) would replace [`InMemoryTransport`]
/// with a transport backed by an actual broker without this number mattering.
const MESSAGE_TRANSPORT_CAPACITY: usize = 1024;

/// Everything the binary entry point needs to run the daemon: the routing
/// core's subsystems plus the admin HTTP surface's shared state.
pub struct Daemon {
    pub evaluator: Arc<Evaluator>,
    pub tracker: Arc<Tracker>,
    pub lifecycle: Arc<Lifecycle>,
    pub admin_state: Arc<AdminState>,
    pub transport: Arc<dyn MessagingTransport>,
    pub shutdown: Shutdown,
}

/// Wires every subsystem from `config`, using the in-memory/mock collaborator
/// implementations (a production build would substitute a real
/// `ChainProvider`/`Indexer`/`Signer` here, behind the same traits).
///
/// # Errors
/// [`RouterError::ConfigurationError`](crate::error::RouterError) if the
/// signer cannot be constructed, surfaced by the CLI as exit code 1.
pub async fn build_daemon(config: Config) -> anyhow::Result<Daemon> {
    let shutdown = Shutdown::spawn(
        std::time::Duration::from_secs(30),
        std::time::Duration::from_secs(5),
    );

    let signer: Arc<dyn Signer> = match &config.signer {
        crate::config::SignerConfig::Mnemonic(secret) => {
            Arc::new(crate::chain::LocalSigner::from_private_key(secret.expose())?)
        }
        crate::config::SignerConfig::Web3SignerUrl(url) => {
            anyhow::bail!("remote web3signer support is not wired in this build: {url}")
        }
    };

    let mut providers: HashMap<ChainId, Arc<dyn ChainProvider>> = HashMap::new();
    let mut chain_configs: HashMap<ChainId, ChainConfig> = HashMap::new();
    let mut oracle_chains: HashMap<ChainId, Arc<dyn ChainProvider>> = HashMap::new();
    let mut oracle_configs: HashMap<ChainId, OracleChainConfig> = HashMap::new();
    let mut tracker_chains: HashMap<ChainId, TrackerChainConfig> = HashMap::new();

    for (chain_id, entry) in &config.chain_config {
        let provider: Arc<dyn ChainProvider> = Arc::new(MockChainProvider::new(chain_id.get()));
        providers.insert(*chain_id, Arc::clone(&provider));
        oracle_chains.insert(*chain_id, provider);

        chain_configs.insert(
            *chain_id,
            ChainConfig {
                providers: entry.providers.clone(),
                confirmations: entry.confirmations,
                min_gas: entry.min_gas,
                transaction_manager_address: entry.transaction_manager_address,
                gas_stations: entry.gas_stations.clone(),
                router_contract_relayer_asset: entry.router_contract_relayer_asset,
            },
        );
        oracle_configs.insert(
            *chain_id,
            OracleChainConfig {
                price_oracle_address: None,
                native_usd_price: ethers::types::U256::from(2_000u64)
                    * ethers::types::U256::exp10(18),
            },
        );
        tracker_chains.insert(
            *chain_id,
            TrackerChainConfig {
                indexer_uris: entry.gas_stations.clone(),
                poll_interval: std::time::Duration::from_secs(10),
                router: signer.address(),
            },
        );
    }

    let pools: Vec<SwapPool> = config
        .swap_pools
        .iter()
        .map(|entry| SwapPool {
            name: entry.name.clone(),
            assets: entry
                .assets
                .iter()
                .map(|asset| SwapPoolAsset {
                    chain_id: asset.chain_id,
                    asset_id: asset.asset_id,
                    weight: config
                        .chain_config
                        .get(&asset.chain_id)
                        .map_or(1, |c| c.weight),
                    decimals: 18,
                })
                .collect(),
        })
        .collect();
    for pool in &pools {
        pool.validate()
            .map_err(|message| anyhow::anyhow!("invalid swap pool configuration: {message}"))?;
    }

    let indexer: Arc<dyn Indexer> = Arc::new(MockIndexer::new());
    let tracker = Tracker::new(tracker_chains, providers.clone(), indexer);
    tracker.spawn_all(shutdown.clone());

    let oracle = Arc::new(Oracle::new(oracle_chains, oracle_configs));

    let evaluator = Arc::new(Evaluator::new(
        Arc::clone(&tracker),
        oracle,
        Arc::clone(&signer),
        pools,
        chain_configs,
        config.request_limit_ms,
        config.max_price_impact,
        config.amplification,
        config.allowed_vamm,
    ));

    let transport: Arc<dyn MessagingTransport> =
        InMemoryTransport::shared(MESSAGE_TRANSPORT_CAPACITY);
    Arc::clone(&evaluator).spawn_subscriber(Arc::clone(&transport), shutdown.clone());

    let lifecycle_providers = providers.clone();
    let dispatcher = Arc::new(Dispatcher::spawn(
        providers,
        HashMap::new(),
        HashMap::new(),
        HashMap::new(),
        shutdown.clone(),
    ));

    let lifecycle = Lifecycle::new(Arc::clone(&tracker), Arc::clone(&dispatcher), lifecycle_providers);
    lifecycle.spawn(
        shutdown.clone(),
        config.expiry_check_interval,
        Arc::clone(&transport),
    );

    let admin_state = Arc::new(AdminState {
        config,
        dispatcher,
    });

    info!("daemon wired up and running");

    Ok(Daemon {
        evaluator,
        tracker,
        lifecycle,
        admin_state,
        transport,
        shutdown,
    })
}
