#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mw_node_rpc::{BlockHeader, BlockOutput, BlockPrintable, OutputType, Transaction};
use mw_relay::{RelayClient, RelayError, RelayMessage};
use mw_wallet_core::{
    ChainSource, ChainType, FeeSchedule, InMemoryStore, KdfParams, KeyVault, RelayConfig, Result,
    RetryPolicy, WalletConfig, WalletSession,
};
use parking_lot::Mutex;

pub const ALICE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon \
                         abandon abandon abandon about";
pub const BOB: &str =
    "legal winner thank year wave sausage worth useful legal winner thank yellow";
pub const PASSWORD: &str = "correct horse";

#[derive(Default)]
struct ChainInner {
    blocks: BTreeMap<u64, BlockPrintable>,
    tip: u64,
    pushed: Vec<Transaction>,
}

#[derive(Clone, Default)]
pub struct MockChain(Arc<Mutex<ChainInner>>);

impl MockChain {
    pub fn pay(&self, vault: &KeyVault, amount: u64, index: u32, height: u64) {
        let (commitment, proof) = vault.build_output(amount, index).unwrap();
        let mut inner = self.0.lock();
        let block = inner
            .blocks
            .entry(height)
            .or_insert_with(|| empty_block(height));
        block.outputs.push(BlockOutput {
            commit: commitment.to_hex(),
            proof: hex::encode(proof),
            output_type: OutputType::Transaction,
        });
        inner.tip = inner.tip.max(height);
    }

    pub fn set_tip(&self, tip: u64) {
        self.0.lock().tip = tip;
    }

    pub fn pushed(&self) -> Vec<Transaction> {
        self.0.lock().pushed.clone()
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
        let inner = self.0.lock();
        Ok(inner
            .blocks
            .get(&height)
            .cloned()
            .unwrap_or_else(|| empty_block(height)))
    }

    fn push_transaction(&self, tx: &Transaction, _fluff: bool) -> Result<()> {
        self.0.lock().pushed.push(tx.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RelayInner {
    next_id: u64,
    boxes: HashMap<String, Vec<RelayMessage>>,
    failing_polls: u32,
    polls: u64,
    entered: u64,
    hold: Duration,
}

/// Relay held in memory; `poll` blocks only when `hold_polls` says so.
#[derive(Clone, Default)]
pub struct MemoryRelay(Arc<Mutex<RelayInner>>);

impl MemoryRelay {
    /// The next `n` polls fail as if the relay were down.
    pub fn fail_polls(&self, n: u32) {
        self.0.lock().failing_polls = n;
    }

    pub fn inbox(&self, address: &str) -> Vec<RelayMessage> {
        self.0
            .lock()
            .boxes
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    pub fn polls(&self) -> u64 {
        self.0.lock().polls
    }

    /// Every poll sleeps `hold` before reading the inbox, like a long poll
    /// that is answered late.
    pub fn hold_polls(&self, hold: Duration) {
        self.0.lock().hold = hold;
    }

    /// Polls begun, including one still sleeping.
    pub fn polls_entered(&self) -> u64 {
        self.0.lock().entered
    }
}

impl RelayClient for MemoryRelay {
    fn publish(&self, to: &str, from: &str, payload: &str) -> std::result::Result<(), RelayError> {
        let mut inner = self.0.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.boxes.entry(to.to_string()).or_default().push(RelayMessage {
            id,
            from: from.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    fn poll(
        &self,
        address: &str,
        after: u64,
        _wait: Duration,
    ) -> std::result::Result<Vec<RelayMessage>, RelayError> {
        let hold = {
            let mut inner = self.0.lock();
            inner.entered += 1;
            inner.hold
        };
        if !hold.is_zero() {
            std::thread::sleep(hold);
        }
        let mut inner = self.0.lock();
        inner.polls += 1;
        if inner.failing_polls > 0 {
            inner.failing_polls -= 1;
            return Err(RelayError::Status {
                path: format!("poll/{address}"),
                status: 503,
            });
        }
        Ok(inner
            .boxes
            .get(address)
            .map(|msgs| msgs.iter().filter(|m| m.id > after).cloned().collect())
            .unwrap_or_default())
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

pub fn relay_config() -> RelayConfig {
    let mut relay = RelayConfig::new("relay.test", 443);
    relay.poll_wait_secs = 0;
    relay.retry = RetryPolicy {
        base_delay_ms: 10,
        max_delay_ms: 20,
        max_attempts: 3,
        jitter: 0.0,
    };
    relay
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

/// Alice holding confirmed 50, 30 and 20 with the tip at 20.
pub fn funded_alice(chain: &MockChain) -> TestWallet {
    let v = KeyVault::from_mnemonic(ALICE, PASSWORD, ChainType::Floonet, "default").unwrap();
    chain.pay(&v, 50, 100, 1);
    chain.pay(&v, 30, 101, 2);
    chain.pay(&v, 20, 102, 3);
    chain.set_tip(20);
    let alice = wallet(ALICE, chain);
    alice.refresh().unwrap();
    alice
}

pub fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(20));
    }
}
