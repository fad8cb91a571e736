use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Free-form correlation data attached to every error so that logs, metrics
/// and the JSON error reply a caller sees all agree on what happened.
pub type ErrorContext = HashMap<String, String>;

#[derive(Debug, Clone, Serialize)]
pub struct RequestContext {
    pub id: String,
    pub origin: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodContext {
    pub name: String,
}

/// Flat error taxonomy for the routing core.
///
/// Each variant carries a structured `context` map so it can be serialized
/// straight into an `{ error: { kind, message, context } }` reply (see
/// `crate::server` / `AuctionPayload` reply schema) without losing detail to
/// a free-text message.
#[derive(Debug, Error)]
pub enum RouterError {
    // --- Validation ---
    #[error("invalid auction params: {message}")]
    ParamsInvalid {
        message: String,
        context: ErrorContext,
    },
    #[error("bid amount must be non-zero")]
    ZeroValueBid { context: ErrorContext },

    // --- Policy ---
    #[error("auction rate limit exceeded: {elapsed_ms}ms < {minimal_period_ms}ms")]
    AuctionRateExceeded {
        elapsed_ms: u64,
        minimal_period_ms: u64,
        context: ErrorContext,
    },
    #[error("auction request already expired or expiry too close")]
    AuctionExpired { context: ErrorContext },
    #[error("price impact {impact} exceeds bound {max_impact}")]
    PriceImpactTooHigh {
        impact: f64,
        max_impact: f64,
        context: ErrorContext,
    },

    // --- Resource ---
    #[error("chain {chain_id} has no configured provider")]
    ProvidersNotAvailable {
        chain_id: u64,
        context: ErrorContext,
    },
    #[error("router native balance below minimum gas requirement on chain {chain_id}")]
    NotEnoughGas {
        chain_id: u64,
        context: ErrorContext,
    },
    #[error("insufficient receiver liquidity: balance={balance} amount_received={amount_received}")]
    NotEnoughLiquidity {
        balance: String,
        amount_received: String,
        context: ErrorContext,
    },
    #[error("amount does not cover gas fee: amount={amount} gas_fee={gas_fee}")]
    NotEnoughAmount {
        amount: String,
        gas_fee: String,
        context: ErrorContext,
    },
    #[error("chain {chain_id} is not supported")]
    ChainNotSupported {
        chain_id: u64,
        context: ErrorContext,
    },

    // --- Sync ---
    #[error("subgraph not synced for one or more chains")]
    SubgraphNotSynced { context: ErrorContext },

    // --- Lifecycle ---
    #[error("receiver transaction already exists")]
    ReceiverTxExists { context: ErrorContext },
    #[error("sender transaction too new to cancel: elapsed={elapsed}s required={required}s")]
    SenderTxTooNew {
        elapsed: i64,
        required: i64,
        context: ErrorContext,
    },

    // --- Transport ---
    #[error("rpc error: {message}")]
    RpcError {
        message: String,
        context: ErrorContext,
    },
    #[error("provider not configured for chain {chain_id}")]
    ProviderNotConfigured {
        chain_id: u64,
        context: ErrorContext,
    },
    #[error("configuration error: {message}")]
    ConfigurationError {
        message: String,
        context: ErrorContext,
    },
}

impl RouterError {
    /// Kind used for the `error.kind` field of a reply / log line.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ParamsInvalid { .. } => "ParamsInvalid",
            Self::ZeroValueBid { .. } => "ZeroValueBid",
            Self::AuctionRateExceeded { .. } => "AuctionRateExceeded",
            Self::AuctionExpired { .. } => "AuctionExpired",
            Self::PriceImpactTooHigh { .. } => "PriceImpactTooHigh",
            Self::ProvidersNotAvailable { .. } => "ProvidersNotAvailable",
            Self::NotEnoughGas { .. } => "NotEnoughGas",
            Self::NotEnoughLiquidity { .. } => "NotEnoughLiquidity",
            Self::NotEnoughAmount { .. } => "NotEnoughAmount",
            Self::ChainNotSupported { .. } => "ChainNotSupported",
            Self::SubgraphNotSynced { .. } => "SubgraphNotSynced",
            Self::ReceiverTxExists { .. } => "ReceiverTxExists",
            Self::SenderTxTooNew { .. } => "SenderTxTooNew",
            Self::RpcError { .. } => "RpcError",
            Self::ProviderNotConfigured { .. } => "ProviderNotConfigured",
            Self::ConfigurationError { .. } => "ConfigurationError",
        }
    }

    /// Whether the lifecycle path should retry this error with backoff
    /// (`Transport` kinds only) rather than wait for the next event/tick.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RpcError { .. } | Self::ProviderNotConfigured { .. }
        )
    }
}

/// Serializable shape of `{ error: { kind, message, context } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    pub kind: String,
    pub message: String,
    pub context: ErrorContext,
}

impl From<&RouterError> for ErrorReply {
    fn from(err: &RouterError) -> Self {
        let context = match err {
            RouterError::ParamsInvalid { context, .. }
            | RouterError::ZeroValueBid { context }
            | RouterError::AuctionRateExceeded { context, .. }
            | RouterError::AuctionExpired { context }
            | RouterError::PriceImpactTooHigh { context, .. }
            | RouterError::ProvidersNotAvailable { context, .. }
            | RouterError::NotEnoughGas { context, .. }
            | RouterError::NotEnoughLiquidity { context, .. }
            | RouterError::NotEnoughAmount { context, .. }
            | RouterError::ChainNotSupported { context, .. }
            | RouterError::SubgraphNotSynced { context }
            | RouterError::ReceiverTxExists { context }
            | RouterError::SenderTxTooNew { context, .. }
            | RouterError::RpcError { context, .. }
            | RouterError::ProviderNotConfigured { context, .. }
            | RouterError::ConfigurationError { context, .. } => context.clone(),
        };

        Self {
            kind: err.kind().to_owned(),
            message: err.to_string(),
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_kinds_are_retryable() {
        let err = RouterError::RpcError {
            message: "timeout".into(),
            context: ErrorContext::default(),
        };
        assert!(err.is_retryable());

        let err = RouterError::NotEnoughGas {
            chain_id: 1337,
            context: ErrorContext::default(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn error_reply_preserves_kind_and_context() {
        let mut context = ErrorContext::new();
        context.insert("balance".into(), "500000".into());
        let err = RouterError::NotEnoughLiquidity {
            balance: "500000".into(),
            amount_received: "900000".into(),
            context,
        };
        let reply = ErrorReply::from(&err);
        assert_eq!(reply.kind, "NotEnoughLiquidity");
        assert_eq!(reply.context.get("balance").unwrap(), "500000");
    }
}
