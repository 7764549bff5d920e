use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Result, WalletError};
use crate::keys::SigningContext;
use crate::model::{TxDirection, TxLogEntry};
use crate::slate::Slate;
use crate::storage::WalletStore;

const SLATE_PREFIX: &str = "slate/";
const CONTEXT_PREFIX: &str = "context/";
const TXLOG_PREFIX: &str = "txlog/";

/// Persisted slates, signing contexts and the tx log, plus per-slate
/// exclusivity for state transitions.
pub struct SlateStore<S: WalletStore> {
    store: Arc<S>,
    /// Only live guards are reachable; an id nobody holds costs nothing.
    guards: Mutex<HashMap<Uuid, Weak<Mutex<()>>>>,
    cancel_requests: Mutex<HashSet<Uuid>>,
}

impl<S: WalletStore> SlateStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            guards: Mutex::new(HashMap::new()),
            cancel_requests: Mutex::new(HashSet::new()),
        }
    }

    /// Lock to hold while transitioning slate `id`.
    pub fn guard(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut guards = self.guards.lock();
        if let Some(live) = guards.get(&id).and_then(Weak::upgrade) {
            return live;
        }
        guards.retain(|_, g| g.strong_count() > 0);
        let fresh = Arc::new(Mutex::new(()));
        guards.insert(id, Arc::downgrade(&fresh));
        fresh
    }

    #[cfg(test)]
    fn live_guards(&self) -> usize {
        self.guards.lock().values().filter(|g| g.strong_count() > 0).count()
    }

    /// Flag `id` so an operation already holding its guard gives up
    /// before committing.
    pub fn request_cancel(&self, id: Uuid) {
        self.cancel_requests.lock().insert(id);
    }

    pub fn cancel_requested(&self, id: Uuid) -> bool {
        self.cancel_requests.lock().contains(&id)
    }

    pub fn clear_cancel(&self, id: Uuid) {
        self.cancel_requests.lock().remove(&id);
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Slate>> {
        self.store
            .get(&format!("{SLATE_PREFIX}{id}"))
            .map_err(WalletError::storage)
    }

    pub fn require(&self, id: Uuid) -> Result<Slate> {
        self.get(id)?
            .ok_or_else(|| WalletError::SlateNotFound(id.to_string()))
    }

    pub fn save(&self, slate: &Slate) -> Result<()> {
        self.store
            .put(&format!("{SLATE_PREFIX}{}", slate.id), slate)
            .map_err(WalletError::storage)?;
        self.touch_log(slate)
    }

    pub fn list(&self) -> Result<Vec<Slate>> {
        self.store.list(SLATE_PREFIX).map_err(WalletError::storage)
    }

    pub fn context(&self, id: Uuid) -> Result<Option<SigningContext>> {
        self.store
            .get(&format!("{CONTEXT_PREFIX}{id}"))
            .map_err(WalletError::storage)
    }

    pub fn save_context(&self, ctx: &SigningContext) -> Result<()> {
        self.store
            .put(&format!("{CONTEXT_PREFIX}{}", ctx.slate_id), ctx)
            .map_err(WalletError::storage)
    }

    pub fn delete_context(&self, id: Uuid) -> Result<()> {
        self.store
            .del(&format!("{CONTEXT_PREFIX}{id}"))
            .map_err(WalletError::storage)
    }

    pub fn log_entry(&self, id: Uuid) -> Result<Option<TxLogEntry>> {
        self.store
            .get(&format!("{TXLOG_PREFIX}{id}"))
            .map_err(WalletError::storage)
    }

    pub fn put_log_entry(&self, entry: &TxLogEntry) -> Result<()> {
        self.store
            .put(&format!("{TXLOG_PREFIX}{}", entry.id), entry)
            .map_err(WalletError::storage)
    }

    /// History, oldest first.
    pub fn log(&self) -> Result<Vec<TxLogEntry>> {
        let mut entries: Vec<TxLogEntry> =
            self.store.list(TXLOG_PREFIX).map_err(WalletError::storage)?;
        entries.sort_by_key(|e| (e.created_at, e.id));
        Ok(entries)
    }

    /// Open a log entry for a slate this wallet just joined.
    pub fn start_log(&self, slate: &Slate, direction: TxDirection, note: Option<String>) -> Result<()> {
        let now = Utc::now();
        self.put_log_entry(&TxLogEntry {
            id: slate.id,
            direction,
            amount: slate.amount,
            fee: slate.fee,
            state: slate.state,
            created_at: now,
            updated_at: now,
            note,
            kernel_excess: slate.kernel.as_ref().map(|k| k.excess),
            confirmed: false,
            confirmed_height: None,
        })
    }

    fn touch_log(&self, slate: &Slate) -> Result<()> {
        let Some(mut entry) = self.log_entry(slate.id)? else {
            return Ok(());
        };
        let excess = slate.kernel.as_ref().map(|k| k.excess);
        if entry.state == slate.state && entry.kernel_excess == excess {
            return Ok(());
        }
        entry.state = slate.state;
        entry.kernel_excess = excess;
        entry.updated_at = Utc::now();
        self.put_log_entry(&entry)
    }
}
