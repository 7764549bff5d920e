#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use mw_node_rpc::{BlockHeader, BlockOutput, BlockPrintable, OutputType, Transaction};
use mw_wallet_core::{
    ChainSource, ChainType, FeeSchedule, InMemoryStore, KdfParams, KeyVault, Result, RetryPolicy,
    WalletConfig, WalletError, WalletSession,
};
use parking_lot::Mutex;

pub const ALICE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon \
                         abandon abandon abandon about";
pub const BOB: &str =
    "legal winner thank year wave sausage worth useful legal winner thank yellow";
pub const PASSWORD: &str = "correct horse";

#[derive(Default)]
struct Inner {
    blocks: BTreeMap<u64, BlockPrintable>,
    tip: u64,
    fail_once: HashSet<u64>,
    failing_pushes: u32,
    pushed: Vec<Transaction>,
}

/// In-process chain: canned blocks, injectable outages, a mempool that
/// `mine` turns into a block.
#[derive(Clone, Default)]
pub struct MockChain(Arc<Mutex<Inner>>);

impl MockChain {
    pub fn new(tip: u64) -> Self {
        let chain = Self::default();
        chain.0.lock().tip = tip;
        chain
    }

    pub fn set_tip(&self, tip: u64) {
        self.0.lock().tip = tip;
    }

    pub fn tip(&self) -> u64 {
        self.0.lock().tip
    }

    /// Pay `amount` to key `index` of `vault` in the block at `height`.
    pub fn pay(&self, vault: &KeyVault, amount: u64, index: u32, height: u64) {
        let (commitment, proof) = vault.build_output(amount, index).unwrap();
        let mut inner = self.0.lock();
        let block = inner.blocks.entry(height).or_insert_with(|| empty_block(height));
        block.outputs.push(BlockOutput {
            commit: commitment.to_hex(),
            proof: hex::encode(proof),
            output_type: OutputType::Transaction,
        });
        inner.tip = inner.tip.max(height);
    }

    /// Spend `commit` in the block at `height`.
    pub fn spend(&self, commit: &str, height: u64) {
        let mut inner = self.0.lock();
        let block = inner.blocks.entry(height).or_insert_with(|| empty_block(height));
        block.inputs.push(commit.to_string());
        inner.tip = inner.tip.max(height);
    }

    /// The next `get_block(height)` fails with a transient error.
    pub fn fail_once_at(&self, height: u64) {
        self.0.lock().fail_once.insert(height);
    }

    /// The next `n` pushes are refused as if the node were down.
    pub fn fail_pushes(&self, n: u32) {
        self.0.lock().failing_pushes = n;
    }

    pub fn pushed(&self) -> Vec<Transaction> {
        self.0.lock().pushed.clone()
    }

    /// Put every pushed transaction into a new block on top of the tip.
    pub fn mine(&self) -> u64 {
        let mut inner = self.0.lock();
        let height = inner.tip + 1;
        let mut block = empty_block(height);
        for tx in inner.pushed.drain(..) {
            block.inputs.extend(tx.inputs);
            block.outputs.extend(tx.outputs);
            block.kernels.extend(tx.kernels);
        }
        inner.blocks.insert(height, block);
        inner.tip = height;
        height
    }
}

fn empty_block(height: u64) -> BlockPrintable {
    BlockPrintable {
        header: BlockHeader {
            height,
            hash: format!("{height:064x}"),
            previous: format!("{:064x}", height.saturating_sub(1)),
            timestamp: String::new(),
        },
        inputs: Vec::new(),
        outputs: Vec::new(),
        kernels: Vec::new(),
    }
}

impl ChainSource for MockChain {
    fn tip_height(&self) -> Result<u64> {
        Ok(self.0.lock().tip)
    }

    fn block(&self, height: u64) -> Result<BlockPrintable> {
        let mut inner = self.0.lock();
        if inner.fail_once.remove(&height) {
            return Err(WalletError::NetworkUnavailable(format!(
                "connection reset at block {height}"
            )));
        }
        Ok(inner
            .blocks
            .get(&height)
            .cloned()
            .unwrap_or_else(|| empty_block(height)))
    }

    fn push_transaction(&self, tx: &Transaction, _fluff: bool) -> Result<()> {
        let mut inner = self.0.lock();
        if inner.failing_pushes > 0 {
            inner.failing_pushes -= 1;
            return Err(WalletError::NetworkUnavailable("node refused push".into()));
        }
        inner.pushed.push(tx.clone());
        Ok(())
    }
}

pub fn config() -> WalletConfig {
    let mut cfg = WalletConfig::new(ChainType::Floonet, "/unused", "http://127.0.0.1:13413");
    cfg.kdf = KdfParams::insecure_fast();
    cfg.node_retry = RetryPolicy::immediate(1);
    cfg.fee = FeeSchedule {
        base_fee: 1,
        ..FeeSchedule::default()
    };
    cfg
}

pub fn vault(phrase: &str) -> KeyVault {
    KeyVault::from_mnemonic(phrase, PASSWORD, ChainType::Floonet, "default").unwrap()
}

pub type TestWallet = WalletSession<InMemoryStore, MockChain>;

pub fn wallet(phrase: &str, chain: &MockChain) -> TestWallet {
    WalletSession::recover_with(
        config(),
        InMemoryStore::new(),
        chain.clone(),
        PASSWORD,
        phrase,
        "test",
    )
    .unwrap()
}

/// Alice with confirmed outputs of 50, 30 and 20 at heights 1..=3, tip 20.
pub fn funded_alice(chain: &MockChain) -> TestWallet {
    let v = vault(ALICE);
    chain.pay(&v, 50, 100, 1);
    chain.pay(&v, 30, 101, 2);
    chain.pay(&v, 20, 102, 3);
    chain.set_tip(20);
    let alice = wallet(ALICE, chain);
    alice.refresh().unwrap();
    alice
}
