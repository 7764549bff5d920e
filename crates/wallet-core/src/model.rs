use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount;
use crate::crypto::{Commitment, PublicKey};
use crate::slate::SlateState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputStatus {
    Unconfirmed,
    Confirmed,
    Spent,
    Locked,
}

impl OutputStatus {
    /// Seen in a block (as opposed to only built locally).
    pub fn is_on_chain(self) -> bool {
        !matches!(self, OutputStatus::Unconfirmed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub commitment: Commitment,
    pub amount: u64,
    pub key_index: u32,
    /// Block height for on-chain outputs; chain tip at build time otherwise.
    pub height: u64,
    pub is_coinbase: bool,
    pub status: OutputStatus,
    /// Slate that created or reserved this output.
    pub tx_id: Option<Uuid>,
}

impl Output {
    pub fn confirmations(&self, tip: u64) -> u64 {
        if self.status == OutputStatus::Unconfirmed || tip < self.height {
            0
        } else {
            tip - self.height + 1
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    /// Confirmed + Unconfirmed.
    #[serde(with = "amount::as_decimal")]
    pub total: u64,
    #[serde(with = "amount::as_decimal")]
    pub spendable: u64,
    #[serde(with = "amount::as_decimal")]
    pub unconfirmed: u64,
    #[serde(with = "amount::as_decimal")]
    pub locked: u64,
    /// Confirmed but below the confirmation threshold or coinbase maturity.
    #[serde(with = "amount::as_decimal")]
    pub immature: u64,
    pub tip_height: u64,
    pub min_confirmations: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxDirection {
    Sent,
    Received,
}

/// One line of the transaction history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLogEntry {
    pub id: Uuid,
    pub direction: TxDirection,
    #[serde(with = "amount::as_decimal")]
    pub amount: u64,
    #[serde(with = "amount::as_decimal")]
    pub fee: u64,
    pub state: SlateState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub note: Option<String>,
    pub kernel_excess: Option<PublicKey>,
    /// Kernel seen in a scanned block.
    pub confirmed: bool,
    pub confirmed_height: Option<u64>,
}

/// Dry-run result of selection plus fee computation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    #[serde(with = "amount::as_decimal")]
    pub amount: u64,
    #[serde(with = "amount::as_decimal")]
    pub fee: u64,
    pub num_inputs: usize,
    #[serde(with = "amount::as_decimal")]
    pub total_inputs: u64,
    #[serde(with = "amount::as_decimal")]
    pub change: u64,
}
