// SPDX-License-Identifier: Apache-2.0

//! Long-poll listener that feeds relay messages into a wallet.
//!
//! A slate still waiting for the receiver is signed and sent back to its
//! sender; a slate carrying the receiver's share is finalized and posted.
//! Anything the wallet already holds at the same or a later state is
//! dropped, so redelivery is harmless.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use mw_wallet_core::{Address, RelayConfig, Result, RetryPolicy, SlateState, WalletError};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::{HttpRelay, RelayClient, RelayMessage};
use crate::endpoint::SlateEndpoint;

/// Pause after an empty poll so a relay that answers immediately is not
/// hammered.
const IDLE_PAUSE: Duration = Duration::from_millis(200);
const SEEN_LIMIT: usize = 1024;
/// How long `cancel` waits for a listener parked in a long poll before
/// leaving the thread to exit on its own.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerHandle(pub u64);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    pub polls: u64,
    pub received: u64,
    pub finalized: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub failures: u64,
    pub reconnects: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatched {
    /// Signed as receiver and answered.
    Received(Uuid),
    /// Finalized and posted as sender.
    Finalized(Uuid),
    Duplicate(Uuid),
    /// Not a slate this wallet can act on.
    Ignored(Uuid),
    /// Message id whose payload the wallet refused.
    Rejected(u64),
}

#[derive(Default)]
struct Flags {
    stopped: bool,
    finished: bool,
}

/// Cancellation flag a sleeping listener can be woken from. Message
/// handling runs under `busy`, so once `halt` returns no message is being
/// handled and none will start.
#[derive(Default)]
pub struct StopSignal {
    flags: Mutex<Flags>,
    cv: Condvar,
    busy: Mutex<()>,
}

impl StopSignal {
    pub fn stop(&self) {
        self.flags.lock().stopped = true;
        self.cv.notify_all();
    }

    /// Stop, then wait for the message being handled, if any.
    pub fn halt(&self) {
        self.stop();
        drop(self.busy.lock());
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.lock().stopped
    }

    /// Sleep up to `timeout`; true if stopped meanwhile.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut flags = self.flags.lock();
        if !flags.stopped {
            self.cv.wait_for(&mut flags, timeout);
        }
        flags.stopped
    }

    /// Run `f` unless stopped. Holds off `halt` until `f` returns.
    pub fn unless_stopped<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        let _busy = self.busy.lock();
        if self.is_stopped() {
            return None;
        }
        Some(f())
    }

    fn finish(&self) {
        self.flags.lock().finished = true;
        self.cv.notify_all();
    }

    /// Wait up to `timeout` for the listener loop to exit.
    fn wait_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flags = self.flags.lock();
        while !flags.finished {
            if self.cv.wait_until(&mut flags, deadline).timed_out() {
                break;
            }
        }
        flags.finished
    }
}

pub struct Listener<R: RelayClient = HttpRelay> {
    wallet: Arc<dyn SlateEndpoint>,
    client: R,
    index: u32,
    /// Base58 address polled on the relay.
    address: String,
    /// Full address (with relay suffix) put in the `from` of replies.
    reply_from: String,
    wait: Duration,
    retry: RetryPolicy,
    after: u64,
    seen: HashSet<u64>,
}

impl<R: RelayClient> Listener<R> {
    pub fn new(wallet: Arc<dyn SlateEndpoint>, relay: &RelayConfig, client: R) -> Result<Self> {
        relay.validate()?;
        let own = wallet.address(relay.address_index)?;
        Ok(Self {
            address: own.base58(),
            reply_from: own.with_relay(relay.domain_suffix()).to_string(),
            wallet,
            client,
            index: relay.address_index,
            wait: Duration::from_secs(relay.poll_wait_secs),
            retry: relay.retry,
            after: 0,
            seen: HashSet::new(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// One poll round. Transport failures are returned; per-message
    /// failures are logged and reported as `Rejected`. Messages still
    /// unhandled when `stop` fires are left on the relay.
    pub fn poll_once(&mut self, stop: &StopSignal) -> Result<Vec<Dispatched>> {
        let messages = self.client.poll(&self.address, self.after, self.wait)?;
        let mut done = Vec::with_capacity(messages.len());
        for msg in messages {
            let Some(outcome) = stop.unless_stopped(|| self.handle(&msg)) else {
                debug!("listener for {} stopped mid-batch", self.address);
                break;
            };
            done.extend(outcome);
        }
        if self.seen.len() > SEEN_LIMIT {
            let floor = self.after.saturating_sub(SEEN_LIMIT as u64);
            self.seen.retain(|id| *id > floor);
        }
        Ok(done)
    }

    fn handle(&mut self, msg: &RelayMessage) -> Option<Dispatched> {
        self.after = self.after.max(msg.id);
        if !self.seen.insert(msg.id) {
            return None;
        }
        match self.dispatch(msg) {
            Ok(outcome) => {
                debug!("relay message {} -> {outcome:?}", msg.id);
                Some(outcome)
            }
            Err(err) => {
                warn!("relay message {} from {} dropped: {err}", msg.id, msg.from);
                Some(Dispatched::Rejected(msg.id))
            }
        }
    }

    fn dispatch(&self, msg: &RelayMessage) -> Result<Dispatched> {
        let pack = self.wallet.decode_slatepack(&msg.payload, self.index)?;
        let slate = pack.slate;
        if let Some(local) = self.wallet.slate_state(slate.id)? {
            if local.rank() >= slate.state.rank() {
                return Ok(Dispatched::Duplicate(slate.id));
            }
        }
        match slate.state {
            SlateState::Created | SlateState::Sent => {
                let reply = self.wallet.receive_slate(&slate)?;
                let armored =
                    self.wallet
                        .encode_slatepack(&reply, self.index, pack.sender.as_ref())?;
                let to = Address::parse(&msg.from)?.base58();
                self.retry.run("publish reply", |_| {
                    self.client
                        .publish(&to, &self.reply_from, &armored)
                        .map_err(WalletError::from)
                })?;
                info!("answered slate {} from {}", slate.id, msg.from);
                Ok(Dispatched::Received(slate.id))
            }
            SlateState::Received => {
                self.wallet.finalize(&slate)?;
                self.wallet.post_tx(slate.id)?;
                info!("finalized and posted slate {}", slate.id);
                Ok(Dispatched::Finalized(slate.id))
            }
            _ => Ok(Dispatched::Ignored(slate.id)),
        }
    }

    /// Poll until `stop` fires, backing off on transport failures.
    pub fn run(mut self, stop: &StopSignal, stats: &Mutex<ListenerStats>) {
        info!("relay listener started for {}", self.address);
        let mut failures: u32 = 0;
        while !stop.is_stopped() {
            match self.poll_once(stop) {
                Ok(done) => {
                    {
                        let mut s = stats.lock();
                        s.polls += 1;
                        if failures > 0 {
                            s.reconnects += 1;
                        }
                        for outcome in &done {
                            match outcome {
                                Dispatched::Received(_) => s.received += 1,
                                Dispatched::Finalized(_) => s.finalized += 1,
                                Dispatched::Duplicate(_) | Dispatched::Ignored(_) => {
                                    s.duplicates += 1
                                }
                                Dispatched::Rejected(_) => s.rejected += 1,
                            }
                        }
                    }
                    if failures > 0 {
                        info!("relay reachable again after {failures} failed polls");
                    }
                    failures = 0;
                    if done.is_empty() && stop.wait(IDLE_PAUSE) {
                        break;
                    }
                }
                Err(err) => {
                    let delay = self.retry.delay_for(failures);
                    failures = failures.saturating_add(1);
                    stats.lock().failures += 1;
                    warn!("relay poll failed ({err}); reconnecting in {delay:?}");
                    if stop.wait(delay) {
                        break;
                    }
                }
            }
        }
        info!("relay listener for {} stopped", self.address);
        stop.finish();
    }
}

struct Running {
    address: String,
    wallet: Arc<dyn SlateEndpoint>,
    stop: Arc<StopSignal>,
    stats: Arc<Mutex<ListenerStats>>,
    thread: Option<JoinHandle<()>>,
}

impl Running {
    fn shutdown(mut self) {
        self.stop.halt();
        let Some(thread) = self.thread.take() else {
            return;
        };
        if !self.stop.wait_finished(SHUTDOWN_GRACE) {
            // parked in a long poll; it exits without touching the wallet
            debug!("relay listener for {} detached mid-poll", self.address);
            return;
        }
        if thread.join().is_err() {
            warn!("relay listener for {} panicked", self.address);
        }
    }
}

fn same_wallet(a: &Arc<dyn SlateEndpoint>, b: &Arc<dyn SlateEndpoint>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Registry of running listeners, addressed by opaque handles.
#[derive(Default)]
pub struct ListenerTransport {
    running: Mutex<HashMap<u64, Running>>,
    next_id: AtomicU64,
}

impl ListenerTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by the C boundary.
    pub fn global() -> &'static ListenerTransport {
        static TRANSPORT: OnceLock<ListenerTransport> = OnceLock::new();
        TRANSPORT.get_or_init(ListenerTransport::new)
    }

    /// Validate `relay` and start listening over HTTP. Configuration errors
    /// surface here, before any connection is attempted.
    pub fn start(
        &self,
        wallet: Arc<dyn SlateEndpoint>,
        relay: &RelayConfig,
    ) -> Result<ListenerHandle> {
        relay.validate()?;
        let client = HttpRelay::new(
            &relay.base_url(),
            Duration::from_secs(relay.poll_wait_secs),
        )
        .map_err(|e| WalletError::InvalidRelayConfig(e.to_string()))?;
        self.start_with(wallet, relay, client)
    }

    pub fn start_with<R: RelayClient>(
        &self,
        wallet: Arc<dyn SlateEndpoint>,
        relay: &RelayConfig,
        client: R,
    ) -> Result<ListenerHandle> {
        let listener = Listener::new(wallet.clone(), relay, client)?;
        let address = listener.address().to_string();

        let mut running = self.running.lock();
        if let Some((id, _)) = running.iter().find(|(_, r)| r.address == address) {
            info!("relay listener for {address} already running");
            return Ok(ListenerHandle(*id));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let stop = Arc::new(StopSignal::default());
        let stats = Arc::new(Mutex::new(ListenerStats::default()));
        let thread = {
            let stop = stop.clone();
            let stats = stats.clone();
            thread::Builder::new()
                .name(format!("relay-listener-{id}"))
                .spawn(move || listener.run(&stop, &stats))
                .map_err(|e| WalletError::NetworkUnavailable(format!("spawn listener: {e}")))?
        };
        running.insert(
            id,
            Running {
                address,
                wallet,
                stop,
                stats,
                thread: Some(thread),
            },
        );
        Ok(ListenerHandle(id))
    }

    /// Stop the listener. No message is handled once this returns; a poll
    /// already in flight is abandoned. Returns false if it was not running,
    /// which makes repeated cancels harmless.
    pub fn cancel(&self, handle: ListenerHandle) -> bool {
        let Some(running) = self.running.lock().remove(&handle.0) else {
            return false;
        };
        running.shutdown();
        true
    }

    /// Stop every listener serving `wallet`.
    pub fn cancel_wallet(&self, wallet: &Arc<dyn SlateEndpoint>) -> usize {
        let stopped: Vec<Running> = {
            let mut running = self.running.lock();
            let ids: Vec<u64> = running
                .iter()
                .filter(|(_, r)| same_wallet(&r.wallet, wallet))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| running.remove(id)).collect()
        };
        let count = stopped.len();
        stopped.into_iter().for_each(Running::shutdown);
        count
    }

    pub fn is_running(&self, handle: ListenerHandle) -> bool {
        self.running.lock().contains_key(&handle.0)
    }

    pub fn stats(&self, handle: ListenerHandle) -> Option<ListenerStats> {
        self.running
            .lock()
            .get(&handle.0)
            .map(|r| *r.stats.lock())
    }
}

impl Drop for ListenerTransport {
    fn drop(&mut self) {
        let running: Vec<Running> = self.running.get_mut().drain().map(|(_, r)| r).collect();
        running.into_iter().for_each(Running::shutdown);
    }
}
