//! OutputStore: the wallet's view of its own outputs and the only place
//! their status changes.

use std::sync::Arc;

use log::{debug, info};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use uuid::Uuid;

use crate::crypto::Commitment;
use crate::error::{Result, WalletError};
use crate::model::{Balances, Output, OutputStatus};
use crate::spendable::{SpendFilter, SpendableSet};
use crate::storage::{ScanCursor, WalletStore};

const OUTPUT_PREFIX: &str = "output/";

fn output_key(c: &Commitment) -> String {
    format!("{OUTPUT_PREFIX}{}", c.to_hex())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    Updated,
    Unchanged,
}

pub struct OutputStore<S: WalletStore> {
    store: Arc<S>,
    coinbase_maturity: u64,
    /// Serialises every read-modify-write of output records. Re-entrant so
    /// a builder can hold it across select + lock.
    write_lock: ReentrantMutex<()>,
}

impl<S: WalletStore> OutputStore<S> {
    pub fn new(store: Arc<S>, coinbase_maturity: u64) -> Self {
        Self {
            store,
            coinbase_maturity,
            write_lock: ReentrantMutex::new(()),
        }
    }

    /// Hold while selecting and locking so concurrent builds never pick the
    /// same outputs.
    pub fn reserve_guard(&self) -> ReentrantMutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    pub fn cursor(&self) -> Result<ScanCursor> {
        self.store.get_cursor().map_err(WalletError::storage)
    }

    pub fn tip_height(&self) -> Result<u64> {
        Ok(self.cursor()?.tip_height)
    }

    pub fn get(&self, commitment: &Commitment) -> Result<Option<Output>> {
        self.store
            .get(&output_key(commitment))
            .map_err(WalletError::storage)
    }

    pub fn list(&self) -> Result<Vec<Output>> {
        self.store.list(OUTPUT_PREFIX).map_err(WalletError::storage)
    }

    pub fn filter(&self, min_confirmations: u64) -> Result<SpendFilter> {
        Ok(SpendFilter {
            min_confirmations,
            coinbase_maturity: self.coinbase_maturity,
            tip_height: self.tip_height()?,
        })
    }

    /// Spendable outputs in selection order.
    pub fn spendable(&self, min_confirmations: u64) -> Result<Vec<Output>> {
        let filter = self.filter(min_confirmations)?;
        let all = self.list()?;
        Ok(SpendableSet::filter(&all, filter)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn balances(&self, min_confirmations: u64) -> Result<Balances> {
        let filter = self.filter(min_confirmations)?;
        let mut b = Balances {
            tip_height: filter.tip_height,
            min_confirmations,
            ..Balances::default()
        };
        for o in self.list()? {
            match o.status {
                OutputStatus::Confirmed => {
                    b.total += o.amount;
                    if filter.is_spendable(&o) {
                        b.spendable += o.amount;
                    } else {
                        b.immature += o.amount;
                    }
                }
                OutputStatus::Unconfirmed => {
                    b.total += o.amount;
                    b.unconfirmed += o.amount;
                }
                OutputStatus::Locked => b.locked += o.amount,
                OutputStatus::Spent => {}
            }
        }
        Ok(b)
    }

    /// Idempotent upsert keyed by commitment.
    ///
    /// The amount never changes. Two on-chain sightings must agree on the
    /// height. An unconfirmed record is promoted when the chain reports it;
    /// local reservations (`Locked`, `Spent`) survive a re-scan.
    pub fn record_output(&self, incoming: Output) -> Result<RecordOutcome> {
        let _guard = self.write_lock.lock();
        let key = output_key(&incoming.commitment);
        let existing: Option<Output> = self.store.get(&key).map_err(WalletError::storage)?;
        let Some(existing) = existing else {
            debug!(
                "new output {} amount={} status={:?}",
                incoming.commitment, incoming.amount, incoming.status
            );
            self.store.put(&key, &incoming).map_err(WalletError::storage)?;
            return Ok(RecordOutcome::Inserted);
        };

        let conflict = |reason: String| WalletError::ConflictingOutput {
            commitment: incoming.commitment.to_hex(),
            reason,
        };
        if existing.amount != incoming.amount {
            return Err(conflict(format!(
                "amount {} != recorded {}",
                incoming.amount, existing.amount
            )));
        }
        if existing.key_index != incoming.key_index {
            return Err(conflict(format!(
                "key index {} != recorded {}",
                incoming.key_index, existing.key_index
            )));
        }
        if existing.status.is_on_chain()
            && incoming.status.is_on_chain()
            && existing.height != incoming.height
        {
            return Err(conflict(format!(
                "height {} != recorded {}",
                incoming.height, existing.height
            )));
        }

        let mut merged = existing.clone();
        match (existing.status, incoming.status) {
            (OutputStatus::Unconfirmed, s) if s.is_on_chain() => {
                merged.status = s;
                merged.height = incoming.height;
                merged.is_coinbase = incoming.is_coinbase;
            }
            (OutputStatus::Confirmed, OutputStatus::Spent) => merged.status = OutputStatus::Spent,
            _ => {}
        }
        if merged.tx_id.is_none() {
            merged.tx_id = incoming.tx_id;
        }
        if merged == existing {
            return Ok(RecordOutcome::Unchanged);
        }
        self.store.put(&key, &merged).map_err(WalletError::storage)?;
        Ok(RecordOutcome::Updated)
    }

    /// Reserve outputs for slate `tx_id`. All or nothing: fails with
    /// `OutputUnavailable` unless every output is currently `Confirmed`.
    pub fn lock_outputs(&self, ids: &[Commitment], tx_id: Uuid) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let out = self
                .get(id)?
                .ok_or_else(|| WalletError::OutputUnavailable(id.to_hex()))?;
            if out.status != OutputStatus::Confirmed {
                return Err(WalletError::OutputUnavailable(format!(
                    "{id} is {:?}",
                    out.status
                )));
            }
            records.push(out);
        }
        for mut out in records {
            out.status = OutputStatus::Locked;
            out.tx_id = Some(tx_id);
            self.store
                .put(&output_key(&out.commitment), &out)
                .map_err(WalletError::storage)?;
        }
        info!("locked {} outputs for slate {tx_id}", ids.len());
        Ok(())
    }

    /// Return `Locked` outputs to `Confirmed`. Outputs in any other state
    /// are left alone, so releasing twice is harmless.
    pub fn release(&self, ids: &[Commitment]) -> Result<()> {
        let _guard = self.write_lock.lock();
        for id in ids {
            if let Some(mut out) = self.get(id)? {
                if out.status == OutputStatus::Locked {
                    out.status = OutputStatus::Confirmed;
                    out.tx_id = None;
                    self.store
                        .put(&output_key(id), &out)
                        .map_err(WalletError::storage)?;
                }
            }
        }
        debug!("released {} outputs", ids.len());
        Ok(())
    }

    /// Release everything reserved by `tx_id` and drop the unconfirmed
    /// outputs it created.
    pub fn release_tx(&self, tx_id: Uuid) -> Result<()> {
        let _guard = self.write_lock.lock();
        for out in self.list()? {
            if out.tx_id != Some(tx_id) {
                continue;
            }
            match out.status {
                OutputStatus::Locked => self.release(&[out.commitment])?,
                OutputStatus::Unconfirmed => self
                    .store
                    .del(&output_key(&out.commitment))
                    .map_err(WalletError::storage)?,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn mark_spent(&self, ids: &[Commitment]) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let mut changed = 0;
        for id in ids {
            if let Some(mut out) = self.get(id)? {
                if out.status != OutputStatus::Spent {
                    out.status = OutputStatus::Spent;
                    self.store
                        .put(&output_key(id), &out)
                        .map_err(WalletError::storage)?;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    pub fn set_tip_height(&self, tip: u64) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut cursor = self.cursor()?;
        if cursor.tip_height != tip {
            cursor.tip_height = tip;
            self.store.put_cursor(cursor).map_err(WalletError::storage)?;
        }
        Ok(())
    }

    pub fn set_cursor(&self, cursor: ScanCursor) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.store.put_cursor(cursor).map_err(WalletError::storage)
    }

    /// Claim the next unused key index.
    pub fn next_key_index(&self) -> Result<u32> {
        let _guard = self.write_lock.lock();
        let index = self.store.next_key_index().map_err(WalletError::storage)?;
        let next = index
            .checked_add(1)
            .ok_or_else(|| WalletError::CorruptedState("key index space exhausted".into()))?;
        self.store
            .set_next_key_index(next)
            .map_err(WalletError::storage)?;
        Ok(index)
    }

    /// Make sure future allocations skip `index` (seen during a scan).
    pub fn observe_key_index(&self, index: u32) -> Result<()> {
        let _guard = self.write_lock.lock();
        let next = self.store.next_key_index().map_err(WalletError::storage)?;
        if index >= next {
            self.store
                .set_next_key_index(index.saturating_add(1))
                .map_err(WalletError::storage)?;
        }
        Ok(())
    }
}
