use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::fees::FeeSchedule;
use crate::model::Output;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Fewest inputs, largest first.
    #[default]
    LargestFirst,
    /// Sweep every spendable output.
    All,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<Output>,
    pub fee: u64,
    pub total: u64,
    /// Zero when no change output is needed.
    pub change: u64,
}

impl Selection {
    pub fn num_outputs(&self) -> usize {
        if self.change > 0 {
            2
        } else {
            1
        }
    }
}

/// Pick inputs for `amount` from candidates already ordered largest first.
/// The fee accounts for the receiver's output, one kernel and a change
/// output whenever the inputs do not match amount + fee exactly.
pub fn select_inputs(
    candidates: &[&Output],
    amount: u64,
    fees: &FeeSchedule,
    strategy: SelectionStrategy,
) -> Result<Selection> {
    if amount == 0 {
        return Err(WalletError::InvalidAmount("amount must be positive".into()));
    }
    let available: u64 = candidates.iter().map(|o| o.amount).sum();

    let mut inputs: Vec<Output> = Vec::new();
    let mut total = 0u64;
    let settle = |count: usize, total: u64| -> Option<Selection> {
        let exact_fee = fees.fee(count, 1, 1);
        if total == amount.checked_add(exact_fee)? {
            return Some(Selection {
                inputs: Vec::new(),
                fee: exact_fee,
                total,
                change: 0,
            });
        }
        let fee = fees.fee(count, 2, 1);
        let needed = amount.checked_add(fee)?;
        (total >= needed).then(|| Selection {
            inputs: Vec::new(),
            fee,
            total,
            change: total - needed,
        })
    };

    match strategy {
        SelectionStrategy::LargestFirst => {
            for o in candidates {
                inputs.push((*o).clone());
                total = total.saturating_add(o.amount);
                if let Some(sel) = settle(inputs.len(), total) {
                    return Ok(Selection { inputs, ..sel });
                }
            }
        }
        SelectionStrategy::All => {
            inputs = candidates.iter().map(|o| (*o).clone()).collect();
            total = available;
            if let Some(sel) = settle(inputs.len(), total) {
                return Ok(Selection { inputs, ..sel });
            }
        }
    }

    let needed = amount.saturating_add(fees.fee(candidates.len().max(1), 2, 1));
    Err(WalletError::InsufficientFunds { needed, available })
}
