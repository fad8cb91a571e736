use async_trait::async_trait;
use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::{LocalWallet, Signer as EthersSigner};
use ethers::types::{Address, Signature, H256};

use crate::error::RouterError;

/// Signing seam for router-issued bids, kept separate from the chain
/// providers so a production deployment can swap in a remote signer (KMS,
/// hardware wallet) without touching the evaluator.
#[async_trait]
pub trait Signer: Send + Sync + std::fmt::Debug {
    fn address(&self) -> Address;

    async fn sign_hash(&self, hash: H256) -> Result<Signature, RouterError>;
}

/// Wraps an in-process `LocalWallet` for raw message signing. This crate
/// only needs to sign bids, not transactions (dispatch submits via
/// `ChainProvider` or the relayer client instead).
#[derive(Debug, Clone)]
pub struct LocalSigner {
    wallet: LocalWallet,
}

impl LocalSigner {
    #[must_use]
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    /// # Errors
    /// Returns [`RouterError::ConfigurationError`] if `mnemonic` or
    /// `private_key` does not parse.
    pub fn from_private_key(private_key: &str) -> Result<Self, RouterError> {
        let key = private_key.strip_prefix("0x").unwrap_or(private_key);
        let bytes = hex::decode(key).map_err(|err| RouterError::ConfigurationError {
            message: format!("invalid signer private key: {err}"),
            context: Default::default(),
        })?;
        let signing_key =
            SigningKey::from_slice(&bytes).map_err(|err| RouterError::ConfigurationError {
                message: format!("invalid signer private key: {err}"),
                context: Default::default(),
            })?;
        Ok(Self {
            wallet: LocalWallet::from(signing_key),
        })
    }
}

#[async_trait]
impl Signer for LocalSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_hash(&self, hash: H256) -> Result<Signature, RouterError> {
        self.wallet
            .sign_hash(hash)
            .map_err(|err| RouterError::RpcError {
                message: format!("signing failed: {err}"),
                context: Default::default(),
            })
    }
}
