//! Per-pair auction rate limiting (§3.1 `RateLimiterKey`, §4.D step 3).
//!
//! The key intentionally excludes `amount` — this limits how often a given
//! user can *ask* about a given asset pair, not how often they can ask for a
//! given size. Preserved as-is; see DESIGN.md Open Question (a).

use std::collections::HashMap;

use ethers::types::Address;
use tokio::sync::Mutex;

use crate::domain::ChainId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RateLimiterKey {
    user: Address,
    sending_asset_id: Address,
    sending_chain_id: ChainId,
    receiving_asset_id: Address,
    receiving_chain_id: ChainId,
}

/// Tracks the last-attempt wall-clock timestamp (milliseconds) per
/// `(user, sending_asset_id, sending_chain_id, receiving_asset_id,
/// receiving_chain_id)` tuple.
#[derive(Debug, Default)]
pub struct RateLimiter {
    last_attempt_ms: Mutex<HashMap<RateLimiterKey, i64>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Ok(())` if at least `request_limit_ms` has elapsed since the
    /// last attempt for this key (or there was none), and records `now_ms`
    /// as the new last-attempt time. Returns `Err(elapsed_ms)` otherwise,
    /// leaving the recorded timestamp untouched so a caller can retry.
    #[allow(clippy::too_many_arguments)]
    pub async fn check_and_record(
        &self,
        user: Address,
        sending_asset_id: Address,
        sending_chain_id: ChainId,
        receiving_asset_id: Address,
        receiving_chain_id: ChainId,
        now_ms: i64,
        request_limit_ms: i64,
    ) -> Result<(), i64> {
        let key = RateLimiterKey {
            user,
            sending_asset_id,
            sending_chain_id,
            receiving_asset_id,
            receiving_chain_id,
        };
        let mut guard = self.last_attempt_ms.lock().await;
        if let Some(&last) = guard.get(&key) {
            let elapsed = now_ms - last;
            if elapsed < request_limit_ms {
                return Err(elapsed);
            }
        }
        guard.insert(key, now_ms);
        Ok(())
    }
}
