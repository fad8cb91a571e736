use ethers::types::{Address, Bytes, Signature, H256, U256};
use serde::{Deserialize, Serialize};

use super::ChainId;

/// The immutable identity of a cross-chain swap, keyed by
/// `(transaction_id, user)` across both chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInvariant {
    pub transaction_id: H256,
    pub user: Address,
    pub router: Address,
    pub initiator: Address,
    pub sending_chain_id: ChainId,
    pub sending_asset_id: Address,
    pub receiving_chain_id: ChainId,
    pub receiving_asset_id: Address,
    pub sending_chain_tx_manager_address: Address,
    pub receiving_chain_tx_manager_address: Address,
    pub call_to: Address,
    pub call_data_hash: H256,
    pub receiving_address: Address,
}

impl TransactionInvariant {
    #[must_use]
    pub fn key(&self) -> (H256, Address) {
        (self.transaction_id, self.user)
    }
}

/// Per-side mutable portion of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionVariant {
    pub amount: U256,
    /// Absolute expiry in seconds since the epoch.
    pub expiry: i64,
    pub prepared_block_number: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    Prepared,
    Fulfilled,
    Cancelled,
}

/// One side's (sender or receiver) view of a transaction, as reported by the
/// subgraph tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tix: TransactionInvariant,
    pub variant: TransactionVariant,
    pub status: TransactionStatus,
    pub chain_id: ChainId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Sending,
    Receiving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Prepare,
    Fulfill,
    Cancel,
}

/// User-supplied request to open an auction for a cross-chain swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionRequest {
    pub user: Address,
    pub initiator: Address,
    pub sending_chain_id: ChainId,
    pub sending_asset_id: Address,
    pub receiving_chain_id: ChainId,
    pub receiving_asset_id: Address,
    pub receiving_address: Address,
    pub call_to: Address,
    pub call_data_hash: H256,
    pub amount: U256,
    /// Absolute expiry requested by the user, in seconds since the epoch.
    pub expiry: i64,
    pub encrypted_call_data: Bytes,
    #[serde(default)]
    pub dry_run: bool,
}

/// A router's signed offer in response to an [`AuctionRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub request: AuctionRequest,
    pub router: Address,
    pub amount_received: U256,
    /// Absolute bid expiry in seconds since the epoch.
    pub bid_expiry: i64,
    /// Absent when `request.dry_run` is true.
    pub signature: Option<Signature>,
}
