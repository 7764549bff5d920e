//! `WalletSession`: one open wallet and everything that acts on it.
//!
//! The session owns the store, the chain source and the unlocked key
//! vault. Closing drops the vault (and with it the zeroized seed) while the
//! persisted state stays on disk; `delete` purges that too.

use std::sync::Arc;

use log::{info, warn};
use mw_node_rpc::NodeRpc;
use parking_lot::RwLock;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::address::Address;
use crate::builder::{CreateTxArgs, TransactionBuilder};
use crate::config::{ChainType, RelayConfig, WalletConfig};
use crate::crypto::PublicKey;
use crate::error::{Result, WalletError};
use crate::keys::{check_password_strength, generate_mnemonic, KeyVault};
use crate::model::{Balances, FeeEstimate, Output, TxLogEntry};
use crate::outputs::OutputStore;
use crate::plan::SelectionStrategy;
use crate::retry::RetryPolicy;
use crate::scanner::{ChainSource, ChainSync, ScanReport};
use crate::seed::SealedSeed;
use crate::slate::{Slate, SlateState};
use crate::slatepack::{self, Slatepack};
use crate::slates::SlateStore;
use crate::storage::{FileStore, ScanCursor, WalletStore};

const SEALED_KEY: &str = "vault/sealed";

pub struct WalletSession<S: WalletStore, C: ChainSource> {
    config: WalletConfig,
    name: String,
    store: Arc<S>,
    vault: RwLock<Option<Arc<KeyVault>>>,
    outputs: Arc<OutputStore<S>>,
    slates: Arc<SlateStore<S>>,
    builder: TransactionBuilder<S>,
    sync: ChainSync<C>,
}

/// Store and node client for `config`.
pub fn open_backends(config: &WalletConfig) -> Result<(FileStore, NodeRpc)> {
    config.validate()?;
    let store = FileStore::open(&config.data_dir).map_err(WalletError::storage)?;
    let rpc = NodeRpc::new(&config.node_url, config.node_auth())?;
    Ok((store, rpc))
}

/// Parse an address string of either network.
pub fn validate_address(address: &str) -> Result<Address> {
    Address::parse(address)
}

/// One tip query against the configured node; no wallet needed.
pub fn get_chain_height(config: &WalletConfig) -> Result<u64> {
    config.validate()?;
    let rpc = NodeRpc::new(&config.node_url, config.node_auth())?;
    ChainSync::new(rpc, RetryPolicy::immediate(1)).get_chain_height()
}

impl WalletSession<FileStore, NodeRpc> {
    /// Create a wallet in `config.data_dir`; generates a phrase when
    /// `mnemonic` is `None`.
    pub fn init(
        config: WalletConfig,
        mnemonic: Option<&str>,
        password: &str,
        name: &str,
    ) -> Result<Self> {
        let (store, rpc) = open_backends(&config)?;
        Self::init_with(config, store, rpc, mnemonic, password, name)
    }

    pub fn open(config: WalletConfig, password: &str) -> Result<Self> {
        let (store, rpc) = open_backends(&config)?;
        Self::open_with(config, store, rpc, password)
    }

    pub fn recover(config: WalletConfig, password: &str, mnemonic: &str, name: &str) -> Result<Self> {
        let (store, rpc) = open_backends(&config)?;
        Self::recover_with(config, store, rpc, password, mnemonic, name)
    }
}

impl<S: WalletStore, C: ChainSource> WalletSession<S, C> {
    fn assemble(config: WalletConfig, store: S, chain: C, vault: KeyVault, name: String) -> Self {
        let store = Arc::new(store);
        let outputs = Arc::new(OutputStore::new(store.clone(), config.coinbase_maturity));
        let slates = Arc::new(SlateStore::new(store.clone()));
        let builder = TransactionBuilder::new(outputs.clone(), slates.clone(), config.fee);
        let sync = ChainSync::new(chain, config.node_retry);
        Self {
            config,
            name,
            store,
            vault: RwLock::new(Some(Arc::new(vault))),
            outputs,
            slates,
            builder,
            sync,
        }
    }

    fn create(
        config: WalletConfig,
        store: S,
        chain: C,
        phrase: &str,
        password: &str,
        name: &str,
    ) -> Result<Self> {
        config.validate()?;
        check_password_strength(password, config.min_password_len)?;
        if store
            .get::<SealedSeed>(SEALED_KEY)
            .map_err(WalletError::storage)?
            .is_some()
        {
            return Err(WalletError::WalletExists(
                config.data_dir.display().to_string(),
            ));
        }
        let vault = KeyVault::from_mnemonic(phrase, password, config.chain, &config.account)?;
        let sealed = SealedSeed::seal(
            &vault.mnemonic(),
            password,
            name,
            config.chain,
            &config.account,
            config.kdf,
        )?;
        store.put(SEALED_KEY, &sealed).map_err(WalletError::storage)?;
        info!("created wallet {name:?} on {:?}", config.chain);
        Ok(Self::assemble(config, store, chain, vault, name.to_string()))
    }

    /// New wallet. A freshly generated phrase has no history, so the scan
    /// cursor starts at the current tip when the node is reachable.
    pub fn init_with(
        config: WalletConfig,
        store: S,
        chain: C,
        mnemonic: Option<&str>,
        password: &str,
        name: &str,
    ) -> Result<Self> {
        let Some(phrase) = mnemonic else {
            let phrase = generate_mnemonic()?;
            let session = Self::create(config, store, chain, &phrase, password, name)?;
            match session.sync.chain().tip_height() {
                Ok(tip) => session.outputs.set_cursor(ScanCursor {
                    next_height: tip,
                    tip_height: tip,
                })?,
                Err(err) => warn!("node unreachable at init, first refresh scans from 0: {err}"),
            }
            return Ok(session);
        };
        Self::create(config, store, chain, phrase, password, name)
    }

    /// Restore from a phrase. The cursor starts at genesis; call
    /// `refresh` or `scan_outputs` to rebuild the output set.
    pub fn recover_with(
        config: WalletConfig,
        store: S,
        chain: C,
        password: &str,
        mnemonic: &str,
        name: &str,
    ) -> Result<Self> {
        Self::create(config, store, chain, mnemonic, password, name)
    }

    pub fn open_with(config: WalletConfig, store: S, chain: C, password: &str) -> Result<Self> {
        config.validate()?;
        let sealed: SealedSeed = store
            .get(SEALED_KEY)
            .map_err(WalletError::storage)?
            .ok_or_else(|| WalletError::WalletNotFound(config.data_dir.display().to_string()))?;
        if sealed.chain != config.chain {
            return Err(WalletError::InvalidConfig(format!(
                "wallet belongs to {:?}, config says {:?}",
                sealed.chain, config.chain
            )));
        }
        let phrase = sealed.open(password)?;
        let vault = KeyVault::from_mnemonic(&phrase, password, sealed.chain, &sealed.account)?;
        info!("opened wallet {:?}", sealed.name);
        Ok(Self::assemble(config, store, chain, vault, sealed.name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn chain_type(&self) -> ChainType {
        self.config.chain
    }

    pub fn is_open(&self) -> bool {
        self.vault.read().is_some()
    }

    fn vault(&self) -> Result<Arc<KeyVault>> {
        self.vault.read().clone().ok_or(WalletError::NoActiveWallet)
    }

    /// Drop the key material. Operations in flight keep their own handle
    /// until they finish.
    pub fn close(&self) {
        if self.vault.write().take().is_some() {
            info!("closed wallet {:?}", self.name);
        }
    }

    pub fn get_mnemonic(&self) -> Result<Zeroizing<String>> {
        Ok(self.vault()?.mnemonic())
    }

    pub fn lock(&self) -> Result<()> {
        self.vault()?.lock();
        Ok(())
    }

    pub fn unlock(&self, password: &str) -> Result<()> {
        self.vault()?.unlock(password)
    }

    pub fn get_address(&self, index: u32, relay: Option<&RelayConfig>) -> Result<Address> {
        let address = self.vault()?.derive_address(index)?;
        Ok(match relay {
            Some(relay) => address.with_relay(relay.domain_suffix()),
            None => address,
        })
    }

    pub fn address_key(&self, index: u32) -> Result<PublicKey> {
        self.vault()?.address_key(index)
    }

    pub fn get_chain_height(&self) -> Result<u64> {
        self.sync.get_chain_height()
    }

    pub fn refresh(&self) -> Result<ScanReport> {
        let vault = self.vault()?;
        self.sync.refresh(&vault, &self.outputs, &self.slates)
    }

    pub fn scan_outputs(&self, start_height: u64, num_blocks: u64) -> Result<ScanReport> {
        let vault = self.vault()?;
        self.sync
            .scan_outputs(&vault, &self.outputs, &self.slates, start_height, num_blocks)
    }

    pub fn scan_cursor(&self) -> Result<ScanCursor> {
        self.outputs.cursor()
    }

    pub fn balances(&self, refresh: bool, min_confirmations: u64) -> Result<Balances> {
        self.vault()?;
        if refresh {
            self.refresh()?;
        }
        self.outputs.balances(min_confirmations)
    }

    pub fn outputs(&self) -> Result<Vec<Output>> {
        self.vault()?;
        self.outputs.list()
    }

    /// The tx log. With `refresh`, scan to the tip first and retry posting
    /// any slate left Finalized by an earlier failed post.
    pub fn txs_get(&self, refresh: bool) -> Result<Vec<TxLogEntry>> {
        self.vault()?;
        if refresh {
            self.refresh()?;
            self.repost_finalized(false)?;
        }
        self.slates.log()
    }

    /// Post every slate stuck in Finalized. A failed push is logged and the
    /// slate stays Finalized for the next attempt; returns the slates posted.
    pub fn repost_finalized(&self, fluff: bool) -> Result<Vec<Slate>> {
        self.vault()?;
        let mut posted = Vec::new();
        for slate in self.slates.list()? {
            if slate.state != SlateState::Finalized {
                continue;
            }
            match self.post_tx(slate.id, fluff) {
                Ok(slate) => posted.push(slate),
                Err(err) => warn!("repost of slate {} failed: {err}", slate.id),
            }
        }
        Ok(posted)
    }

    /// Slate records and their transition guards.
    pub fn slate_store(&self) -> &SlateStore<S> {
        &self.slates
    }

    pub fn slate(&self, id: Uuid) -> Result<Slate> {
        self.vault()?;
        self.slates.require(id)
    }

    pub fn get_tx_fees(
        &self,
        amount: u64,
        min_confirmations: u64,
        strategy: SelectionStrategy,
    ) -> Result<FeeEstimate> {
        self.vault()?;
        self.builder.get_tx_fees(amount, min_confirmations, strategy)
    }

    pub fn create_tx(&self, args: &CreateTxArgs) -> Result<Slate> {
        let vault = self.vault()?;
        self.builder.create_tx(&vault, args)
    }

    pub fn mark_sent(&self, id: Uuid) -> Result<Slate> {
        self.vault()?;
        self.builder.mark_sent(id)
    }

    pub fn receive_slate(&self, slate: &Slate, message: Option<String>) -> Result<Slate> {
        let vault = self.vault()?;
        self.builder.receive_slate(&vault, slate, message)
    }

    pub fn finalize(&self, slate: &Slate) -> Result<Slate> {
        let vault = self.vault()?;
        self.builder.finalize(&vault, slate)
    }

    pub fn post_tx(&self, id: Uuid, fluff: bool) -> Result<Slate> {
        self.vault()?;
        self.builder
            .post_tx(id, |tx| self.sync.push_transaction(tx, fluff))
    }

    pub fn finalize_and_post(&self, slate: &Slate, fluff: bool) -> Result<Slate> {
        let finalized = self.finalize(slate)?;
        self.post_tx(finalized.id, fluff)
    }

    pub fn cancel_tx(&self, id: Uuid) -> Result<Slate> {
        self.vault()?;
        self.builder.cancel_tx(id)
    }

    /// Armor `slate`, encrypted to `recipient` when given. The sender key is
    /// the address at `index`.
    pub fn encode_slatepack(
        &self,
        slate: &Slate,
        index: u32,
        recipient: Option<&PublicKey>,
    ) -> Result<String> {
        let vault = self.vault()?;
        let sender = vault.address_key(index)?;
        let encrypt_to = match recipient {
            Some(recipient) => {
                let info = slatepack::exchange_info(&sender, recipient);
                Some((*recipient, vault.shared_key(index, recipient, &info)?))
            }
            None => None,
        };
        slatepack::encode_with(slate, Some(sender), encrypt_to)
    }

    /// Decode a slatepack; encrypted packs must be addressed to the key at
    /// `index`.
    pub fn decode_slatepack(&self, armored: &str, index: u32) -> Result<Slatepack> {
        let vault = self.vault()?;
        let own = vault.address_key(index)?;
        let key_for = |sender: &PublicKey, recipient: &PublicKey| {
            if *recipient != own {
                return Err(WalletError::InvalidSlate(
                    "slatepack is addressed to another wallet".into(),
                ));
            }
            vault.shared_key(index, sender, &slatepack::exchange_info(sender, recipient))
        };
        slatepack::decode_with(armored, Some(&key_for))
    }

    /// Close and erase all persisted state. Irreversible.
    pub fn delete(&self) -> Result<()> {
        self.close();
        self.store.purge().map_err(WalletError::storage)?;
        info!("deleted wallet {:?}", self.name);
        Ok(())
    }
}
