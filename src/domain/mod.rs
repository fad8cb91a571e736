//! Shared data model (§3 of the design doc): the entities that cross module
//! boundaries in the routing core.

mod chain_id;
mod pool;
mod tix;

pub use chain_id::ChainId;
pub use pool::{ChainConfig, SwapPool, SwapPoolAsset};
pub use tix::{
    ActionKind, AuctionRequest, Bid, Side, TransactionInvariant, TransactionRecord,
    TransactionStatus, TransactionVariant,
};

use std::time::{SystemTime, UNIX_EPOCH};

/// Minimum padding between `now` and an auction payload's `expiry`.
pub const AUCTION_EXPIRY_BUFFER: i64 = 3 * 60 * 60;

/// Safety window before the sender side may be cancelled unilaterally.
pub const SENDER_PREPARE_BUFFER: i64 = 780;

/// How long a signed bid remains valid for.
pub const BID_TTL: i64 = 30 * 60;

/// Wall-clock "now" in whole seconds since the epoch.
///
/// Centralised so every component reads the same NTP-synced system clock
/// instead of threading `Instant`s through APIs that only care about
/// absolute on-chain timestamps.
#[must_use]
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_secs() as i64
}

/// Wall-clock "now" in whole milliseconds since the epoch.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_millis() as i64
}
