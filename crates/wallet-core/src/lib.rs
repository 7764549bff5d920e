//! mw-wallet-core: keys, outputs, slate negotiation and chain sync for a
//! Mimblewimble-style wallet.
//!
//! Pieces:
//! - KeyVault: BIP-39 seed, HKDF child keys, addresses, signature shares
//! - OutputStore: owned outputs, balances, reservations for in-flight slates
//! - TransactionBuilder: selection, the two-party signing round, slate states
//! - ChainSync: resumable block scanning against a `ChainSource`
//! - WalletSession: one open wallet tying the above to a store and a node
//!
//! Persistence goes through the `WalletStore` trait; the node is reached only
//! through its foreign JSON-RPC API.
pub mod address;
pub mod amount;
pub mod builder;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fees;
pub mod keys;
pub mod model;
pub mod outputs;
pub mod plan;
pub mod retry;
pub mod scanner;
pub mod seed;
pub mod session;
pub mod slate;
pub mod slatepack;
pub mod slates;
pub mod spendable;
pub mod storage;

pub use address::Address;
pub use builder::{CreateTxArgs, TransactionBuilder};
pub use config::{ChainType, KdfParams, RelayConfig, WalletConfig};
pub use error::{ErrorKind, Result, WalletError};
pub use fees::FeeSchedule;
pub use keys::{generate_mnemonic, KeyVault};
pub use model::{Balances, FeeEstimate, Output, OutputStatus, TxDirection, TxLogEntry};
pub use outputs::OutputStore;
pub use plan::SelectionStrategy;
pub use retry::RetryPolicy;
pub use scanner::{ChainSource, ChainSync, ScanReport};
pub use session::{get_chain_height, open_backends, validate_address, WalletSession};
pub use slate::{Slate, SlateState};
pub use slatepack::Slatepack;
pub use slates::SlateStore;
pub use spendable::{SpendFilter, SpendableSet};
pub use storage::{FileStore, InMemoryStore, ScanCursor, WalletStore};
