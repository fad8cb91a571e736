use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, Signature, H256};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use crate::domain::{AuctionRequest, Bid, ChainId};
use crate::error::{ErrorReply, RouterError};

/// A message published or received on the pub/sub transport the evaluator
/// listens on. Subjects mirror the `auction.>` / `metatx.>` hierarchy (§6.1):
/// a broad auction request fans out to every router, a signed bid or an
/// error reply flows back to the requesting user, and a meta-tx request
/// carries the relayed signature a sender-side fulfill needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RouterMessage {
    AuctionRequest {
        receiving_chain_id: ChainId,
        request: AuctionRequest,
    },
    Bid {
        receiving_chain_id: ChainId,
        bid: Bid,
    },
    AuctionError {
        receiving_chain_id: ChainId,
        user: Address,
        error: ErrorReply,
    },
    MetaTxRequest {
        chain_id: ChainId,
        transaction_id: H256,
        user: Address,
        signature: Signature,
    },
}

/// Pub/sub seam the auction flow runs over: a trait so a production build
/// can swap in a real message broker without the evaluator or tracker
/// noticing.
#[async_trait]
pub trait MessagingTransport: Send + Sync + std::fmt::Debug {
    async fn publish(&self, message: RouterMessage) -> Result<(), RouterError>;

    async fn subscribe(&self) -> broadcast::Receiver<RouterMessage>;
}

/// In-process transport backed by a `tokio::sync::broadcast` channel.
#[derive(Debug)]
pub struct InMemoryTransport {
    sender: broadcast::Sender<RouterMessage>,
    history: Mutex<Vec<RouterMessage>>,
}

impl InMemoryTransport {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self {
            sender,
            history: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    pub async fn history(&self) -> Vec<RouterMessage> {
        self.history.lock().await.clone()
    }
}

#[async_trait]
impl MessagingTransport for InMemoryTransport {
    async fn publish(&self, message: RouterMessage) -> Result<(), RouterError> {
        self.history.lock().await.push(message.clone());
        // No subscribers is not an error: a dry-run evaluation or an
        // evaluator started before any listener attaches still succeeds.
        let _ = self.sender.send(message);
        Ok(())
    }

    async fn subscribe(&self) -> broadcast::Receiver<RouterMessage> {
        self.sender.subscribe()
    }
}
