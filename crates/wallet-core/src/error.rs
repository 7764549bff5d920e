//! Error taxonomy shared by every wallet operation.

use mw_node_rpc::RpcError;
use serde::Serialize;
use thiserror::Error;

use crate::slate::SlateState;

/// Result type alias that carries [`WalletError`] failures.
pub type Result<T> = std::result::Result<T, WalletError>;

/// Coarse classification used by callers to decide between retrying,
/// fixing their input, or re-syncing the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed caller input. Never retryable.
    Validation,
    /// Protocol or state-machine violation. Never retryable.
    State,
    /// Network trouble. Retryable with backoff.
    Transient,
    /// Local state can no longer be trusted; re-sync required.
    Fatal,
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error("password too weak: {0}")]
    WeakPassword(String),
    #[error("invalid password")]
    InvalidPassword,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid wallet config: {0}")]
    InvalidConfig(String),
    #[error("invalid relay config: {0}")]
    InvalidRelayConfig(String),
    #[error("invalid slate: {0}")]
    InvalidSlate(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no active wallet")]
    NoActiveWallet,
    #[error("wallet is locked")]
    WalletLocked,
    #[error("signing error: {0}")]
    SigningError(String),
    #[error("insufficient funds: need {needed}, spendable {available}")]
    InsufficientFunds { needed: u64, available: u64 },
    #[error("conflicting output {commitment}: {reason}")]
    ConflictingOutput { commitment: String, reason: String },
    #[error("output {0} is not available")]
    OutputUnavailable(String),
    #[error("incomplete participation: {present} of {required} signature shares")]
    IncompleteParticipation { present: usize, required: usize },
    #[error("slate {0} is already finalized")]
    AlreadyFinalized(String),
    #[error("slate {0} was cancelled")]
    Cancelled(String),
    #[error("slate {0} not found")]
    SlateNotFound(String),
    #[error("slate {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: SlateState,
        to: SlateState,
    },
    #[error("wallet already exists at {0}")]
    WalletExists(String),
    #[error("no wallet found at {0}")]
    WalletNotFound(String),
    #[error("node rejected request: {0}")]
    NodeRejected(String),
    #[error("peer rejected request: {0}")]
    PeerRejected(String),

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("delivery timed out after {attempts} attempts: {reason}")]
    DeliveryTimeout { attempts: u32, reason: String },

    #[error("corrupted wallet state: {0}")]
    CorruptedState(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        use WalletError::*;
        match self {
            InvalidMnemonic(_) | WeakPassword(_) | InvalidPassword | InvalidAddress(_)
            | InvalidAmount(_) | InvalidConfig(_) | InvalidRelayConfig(_) | InvalidSlate(_)
            | InvalidArgument(_) => ErrorKind::Validation,
            NoActiveWallet
            | WalletLocked
            | SigningError(_)
            | InsufficientFunds { .. }
            | ConflictingOutput { .. }
            | OutputUnavailable(_)
            | IncompleteParticipation { .. }
            | AlreadyFinalized(_)
            | Cancelled(_)
            | SlateNotFound(_)
            | InvalidTransition { .. }
            | WalletExists(_)
            | WalletNotFound(_)
            | NodeRejected(_)
            | PeerRejected(_) => ErrorKind::State,
            NetworkUnavailable(_) | DeliveryTimeout { .. } => ErrorKind::Transient,
            CorruptedState(_) | Storage(_) => ErrorKind::Fatal,
        }
    }

    /// Stable numeric code; the thousands digit mirrors [`ErrorKind`].
    pub fn code(&self) -> u16 {
        use WalletError::*;
        match self {
            InvalidMnemonic(_) => 1001,
            WeakPassword(_) => 1002,
            InvalidPassword => 1003,
            InvalidAddress(_) => 1004,
            InvalidAmount(_) => 1005,
            InvalidConfig(_) => 1006,
            InvalidRelayConfig(_) => 1007,
            InvalidSlate(_) => 1008,
            InvalidArgument(_) => 1009,
            NoActiveWallet => 2001,
            WalletLocked => 2002,
            SigningError(_) => 2003,
            InsufficientFunds { .. } => 2004,
            ConflictingOutput { .. } => 2005,
            OutputUnavailable(_) => 2006,
            IncompleteParticipation { .. } => 2007,
            AlreadyFinalized(_) => 2008,
            Cancelled(_) => 2009,
            SlateNotFound(_) => 2010,
            InvalidTransition { .. } => 2011,
            WalletExists(_) => 2012,
            WalletNotFound(_) => 2013,
            NodeRejected(_) => 2014,
            PeerRejected(_) => 2015,
            NetworkUnavailable(_) => 3001,
            DeliveryTimeout { .. } => 3002,
            CorruptedState(_) => 4001,
            Storage(_) => 4002,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        WalletError::Storage(err.to_string())
    }
}

impl From<RpcError> for WalletError {
    fn from(err: RpcError) -> Self {
        if err.is_transient() {
            WalletError::NetworkUnavailable(err.to_string())
        } else {
            match err {
                RpcError::Url(e) => WalletError::InvalidConfig(format!("node url: {e}")),
                other => WalletError::NodeRejected(other.to_string()),
            }
        }
    }
}
