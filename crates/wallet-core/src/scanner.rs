use std::collections::HashMap;

use log::{debug, info};
use mw_node_rpc::{BlockPrintable, NodeRpc, OutputType, Transaction};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{Commitment, PublicKey};
use crate::error::Result;
use crate::keys::KeyVault;
use crate::model::{Output, OutputStatus};
use crate::outputs::{OutputStore, RecordOutcome};
use crate::retry::RetryPolicy;
use crate::slates::SlateStore;
use crate::storage::{ScanCursor, WalletStore};

/// Read/write access to the chain. `NodeRpc` is the production source;
/// tests substitute canned blocks.
pub trait ChainSource: Send + Sync + 'static {
    fn tip_height(&self) -> Result<u64>;
    fn block(&self, height: u64) -> Result<BlockPrintable>;
    fn push_transaction(&self, tx: &Transaction, fluff: bool) -> Result<()>;
}

impl ChainSource for NodeRpc {
    fn tip_height(&self) -> Result<u64> {
        Ok(self.get_height()?)
    }

    fn block(&self, height: u64) -> Result<BlockPrintable> {
        Ok(self.get_block(height)?)
    }

    fn push_transaction(&self, tx: &Transaction, fluff: bool) -> Result<()> {
        Ok(NodeRpc::push_transaction(self, tx, fluff)?)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub start_height: u64,
    /// First height not covered by this scan.
    pub next_height: u64,
    pub tip_height: u64,
    pub blocks_scanned: u64,
    pub outputs_found: u64,
    pub outputs_spent: u64,
    pub txs_confirmed: u64,
}

pub struct ChainSync<C: ChainSource> {
    chain: C,
    retry: RetryPolicy,
}

impl<C: ChainSource> ChainSync<C> {
    pub fn new(chain: C, retry: RetryPolicy) -> Self {
        Self { chain, retry }
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn get_chain_height(&self) -> Result<u64> {
        self.retry.run("tip height", |_| self.chain.tip_height())
    }

    pub fn push_transaction(&self, tx: &Transaction, fluff: bool) -> Result<()> {
        self.retry
            .run("push transaction", |_| self.chain.push_transaction(tx, fluff))
    }

    /// Scan `[start, start + num_blocks)`, capped at the tip.
    ///
    /// Each block is applied and the cursor advanced before the next one is
    /// fetched, so a failure leaves the store consistent up to the last
    /// completed block and a later scan resumes without loss.
    pub fn scan_outputs<S: WalletStore>(
        &self,
        vault: &KeyVault,
        outputs: &OutputStore<S>,
        slates: &SlateStore<S>,
        start: u64,
        num_blocks: u64,
    ) -> Result<ScanReport> {
        let tip = self.get_chain_height()?;
        outputs.set_tip_height(tip)?;
        let end = start.saturating_add(num_blocks).min(tip.saturating_add(1));
        self.scan_range(vault, outputs, slates, start, end, tip)
    }

    /// Scan from the stored cursor to the tip.
    pub fn refresh<S: WalletStore>(
        &self,
        vault: &KeyVault,
        outputs: &OutputStore<S>,
        slates: &SlateStore<S>,
    ) -> Result<ScanReport> {
        let tip = self.get_chain_height()?;
        outputs.set_tip_height(tip)?;
        let start = outputs.cursor()?.next_height;
        self.scan_range(vault, outputs, slates, start, tip.saturating_add(1), tip)
    }

    fn scan_range<S: WalletStore>(
        &self,
        vault: &KeyVault,
        outputs: &OutputStore<S>,
        slates: &SlateStore<S>,
        start: u64,
        end: u64,
        tip: u64,
    ) -> Result<ScanReport> {
        let mut report = ScanReport {
            start_height: start,
            next_height: start,
            tip_height: tip,
            ..Default::default()
        };
        if start >= end {
            debug!("nothing to scan: start={start} tip={tip}");
            return Ok(report);
        }

        let mut pending = pending_kernels(slates)?;
        for height in start..end {
            let block = self.retry.run("get block", |_| self.chain.block(height))?;
            apply_block(vault, outputs, slates, &block, &mut pending, &mut report)?;

            let mut cursor = outputs.cursor()?;
            cursor = ScanCursor {
                next_height: cursor.next_height.max(height + 1),
                tip_height: tip,
            };
            outputs.set_cursor(cursor)?;
            report.blocks_scanned += 1;
            report.next_height = height + 1;
        }
        info!(
            "scanned {}..{} (tip {}): {} found, {} spent, {} confirmed",
            report.start_height,
            report.next_height,
            tip,
            report.outputs_found,
            report.outputs_spent,
            report.txs_confirmed
        );
        Ok(report)
    }
}

/// Unconfirmed log entries that carry a kernel, keyed by excess.
fn pending_kernels<S: WalletStore>(slates: &SlateStore<S>) -> Result<HashMap<PublicKey, Uuid>> {
    Ok(slates
        .log()?
        .into_iter()
        .filter(|e| !e.confirmed)
        .filter_map(|e| e.kernel_excess.map(|k| (k, e.id)))
        .collect())
}

fn confirm_tx<S: WalletStore>(slates: &SlateStore<S>, id: Uuid, height: u64) -> Result<bool> {
    let Some(mut entry) = slates.log_entry(id)? else {
        return Ok(false);
    };
    if entry.confirmed {
        return Ok(false);
    }
    entry.confirmed = true;
    entry.confirmed_height = Some(height);
    entry.updated_at = chrono::Utc::now();
    slates.put_log_entry(&entry)?;
    Ok(true)
}

fn apply_block<S: WalletStore>(
    vault: &KeyVault,
    outputs: &OutputStore<S>,
    slates: &SlateStore<S>,
    block: &BlockPrintable,
    pending: &mut HashMap<PublicKey, Uuid>,
    report: &mut ScanReport,
) -> Result<()> {
    let height = block.header.height;

    for out in &block.outputs {
        // Anything we cannot parse cannot be ours.
        let (Ok(commitment), Ok(proof)) = (Commitment::from_hex(&out.commit), hex::decode(&out.proof))
        else {
            debug!("block {height}: skipping malformed output {}", out.commit);
            continue;
        };
        let Some((amount, key_index)) = vault.rewind(&commitment, &proof)? else {
            continue;
        };
        outputs.observe_key_index(key_index)?;
        // Only an output a slate created (still Unconfirmed) proves that
        // slate landed. Inputs also carry a tx_id once locked.
        let created_by = outputs
            .get(&commitment)?
            .filter(|o| o.status == OutputStatus::Unconfirmed)
            .and_then(|o| o.tx_id);
        let outcome = outputs.record_output(Output {
            commitment,
            amount,
            key_index,
            height,
            is_coinbase: out.output_type == OutputType::Coinbase,
            status: OutputStatus::Confirmed,
            tx_id: None,
        })?;
        report.outputs_found += 1;
        if let (Some(id), RecordOutcome::Updated) = (created_by, outcome) {
            if confirm_tx(slates, id, height)? {
                report.txs_confirmed += 1;
            }
        }
    }

    let spent: Vec<Commitment> = block
        .inputs
        .iter()
        .filter_map(|c| Commitment::from_hex(c).ok())
        .collect();
    if !spent.is_empty() {
        report.outputs_spent += outputs.mark_spent(&spent)? as u64;
    }

    for kernel in &block.kernels {
        let Ok(excess) = PublicKey::from_hex(&kernel.excess) else {
            continue;
        };
        if let Some(id) = pending.remove(&excess) {
            if confirm_tx(slates, id, height)? {
                report.txs_confirmed += 1;
            }
        }
    }
    Ok(())
}
