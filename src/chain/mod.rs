//! External collaborator seams (§6 of the design doc): chain RPC, signing,
//! pub/sub messaging and subgraph indexing. Each trait ships with an
//! in-memory test double; a production deployment supplies real
//! implementations at startup without the rest of the crate changing.

mod indexer;
mod messaging;
mod provider;
mod signer;

pub use indexer::{GraphQlIndexer, Indexer, MockIndexer};
pub use messaging::{InMemoryTransport, MessagingTransport, RouterMessage};
pub use provider::{ChainProvider, FallbackProvider, MockChainProvider};
pub use signer::{LocalSigner, Signer};
