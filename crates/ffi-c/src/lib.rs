//! Flat C ABI over the wallet.
//!
//! Every export returns a heap string holding `{"ok": value}` or
//! `{"error": {"code", "kind", "message"}}`; hand it back to
//! [`rust_string_free`]. Wallets and listeners are addressed by opaque
//! integer handles. Arguments are NUL-terminated UTF-8; amounts are decimal
//! strings, configs are JSON. Panics are caught and reported as fatal
//! errors.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use libc::c_char;
use log::{error, info};
use mw_node_rpc::NodeRpc;
use mw_relay::{
    delete_wallet, send_tx_http, send_via_relay, ListenerHandle, ListenerTransport, SlateEndpoint,
};
use mw_wallet_core::amount::parse_amount;
use mw_wallet_core::{
    generate_mnemonic as new_mnemonic, get_chain_height, validate_address, CreateTxArgs,
    FileStore, RelayConfig, Result, RetryPolicy, SelectionStrategy, Slate, WalletConfig,
    WalletError, WalletSession,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;
use zeroize::Zeroize;

type Session = WalletSession<FileStore, NodeRpc>;

#[derive(Default)]
struct Sessions {
    open: Mutex<HashMap<u64, Arc<Session>>>,
    next: AtomicU64,
}

impl Sessions {
    fn insert(&self, session: Session) -> u64 {
        let handle = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        self.open.lock().insert(handle, Arc::new(session));
        handle
    }

    fn get(&self, handle: u64) -> Result<Arc<Session>> {
        self.open
            .lock()
            .get(&handle)
            .cloned()
            .ok_or(WalletError::NoActiveWallet)
    }

    fn remove(&self, handle: u64) -> Result<Arc<Session>> {
        self.open
            .lock()
            .remove(&handle)
            .ok_or(WalletError::NoActiveWallet)
    }
}

fn sessions() -> &'static Sessions {
    static SESSIONS: OnceLock<Sessions> = OnceLock::new();
    SESSIONS.get_or_init(Sessions::default)
}

fn endpoint(session: Arc<Session>) -> Arc<dyn SlateEndpoint> {
    session
}

fn error_json(err: &WalletError) -> Value {
    json!({
        "error": {
            "code": err.code(),
            "kind": err.kind(),
            "message": err.to_string(),
        }
    })
}

fn envelope<T: Serialize>(result: Result<T>) -> String {
    let value = match result {
        Ok(ok) => serde_json::to_value(ok)
            .map(|ok| json!({ "ok": ok }))
            .unwrap_or_else(|e| {
                error_json(&WalletError::CorruptedState(format!("result encode: {e}")))
            }),
        Err(err) => error_json(&err),
    };
    value.to_string()
}

fn into_c(s: String) -> *mut c_char {
    // serialized JSON escapes control characters, so no interior NUL
    CString::new(s)
        .map(CString::into_raw)
        .unwrap_or(std::ptr::null_mut())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn ffi_call<T: Serialize>(what: &str, f: impl FnOnce() -> Result<T>) -> *mut c_char {
    let result = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let msg = panic_message(payload.as_ref());
        error!("{what} panicked: {msg}");
        Err(WalletError::CorruptedState(format!("{what} panicked: {msg}")))
    });
    into_c(envelope(result))
}

unsafe fn arg<'a>(ptr: *const c_char, name: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(WalletError::InvalidArgument(format!("{name} is null")));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| WalletError::InvalidArgument(format!("{name} is not utf-8")))
}

/// Null and "" both mean absent.
unsafe fn opt_arg<'a>(ptr: *const c_char, name: &str) -> Result<Option<&'a str>> {
    if ptr.is_null() {
        return Ok(None);
    }
    arg(ptr, name).map(|s| if s.is_empty() { None } else { Some(s) })
}

unsafe fn config_arg(ptr: *const c_char) -> Result<WalletConfig> {
    WalletConfig::from_json(arg(ptr, "config_json")?)
}

unsafe fn relay_arg(ptr: *const c_char) -> Result<Option<RelayConfig>> {
    opt_arg(ptr, "relay_json")?
        .map(RelayConfig::from_json)
        .transpose()
}

unsafe fn tx_args(
    amount: *const c_char,
    min_confirmations: u64,
    message: *const c_char,
) -> Result<CreateTxArgs> {
    let mut args = CreateTxArgs::new(parse_amount(arg(amount, "amount")?)?, min_confirmations);
    args.message = opt_arg(message, "message")?.map(str::to_string);
    Ok(args)
}

#[no_mangle]
/// Create a wallet. A null `mnemonic` generates a fresh 24-word phrase.
/// Returns `{"wallet": handle, "mnemonic": phrase}`.
///
/// # Safety
/// `config_json`, `password` and `name` must be valid C strings; `mnemonic`
/// may be null.
pub unsafe extern "C" fn wallet_init(
    config_json: *const c_char,
    mnemonic: *const c_char,
    password: *const c_char,
    name: *const c_char,
) -> *mut c_char {
    ffi_call("wallet_init", || {
        let config = config_arg(config_json)?;
        let session = Session::init(
            config,
            opt_arg(mnemonic, "mnemonic")?,
            arg(password, "password")?,
            arg(name, "name")?,
        )?;
        let phrase = session.get_mnemonic()?;
        let wallet = sessions().insert(session);
        Ok(json!({ "wallet": wallet, "mnemonic": phrase.as_str() }))
    })
}

#[no_mangle]
pub extern "C" fn generate_mnemonic() -> *mut c_char {
    ffi_call("generate_mnemonic", || {
        let phrase = new_mnemonic()?;
        Ok(json!(phrase.as_str()))
    })
}

#[no_mangle]
pub extern "C" fn get_mnemonic(wallet: u64) -> *mut c_char {
    ffi_call("get_mnemonic", || {
        let phrase = sessions().get(wallet)?.get_mnemonic()?;
        Ok(json!(phrase.as_str()))
    })
}

#[no_mangle]
/// Returns `{"wallet": handle, "name": name}`.
///
/// # Safety
/// Both arguments must be valid C strings.
pub unsafe extern "C" fn rust_open_wallet(
    config_json: *const c_char,
    password: *const c_char,
) -> *mut c_char {
    ffi_call("rust_open_wallet", || {
        let session = Session::open(config_arg(config_json)?, arg(password, "password")?)?;
        let name = session.name().to_string();
        let wallet = sessions().insert(session);
        Ok(json!({ "wallet": wallet, "name": name }))
    })
}

#[no_mangle]
/// # Safety
/// All arguments must be valid C strings.
pub unsafe extern "C" fn rust_recover_from_mnemonic(
    config_json: *const c_char,
    password: *const c_char,
    mnemonic: *const c_char,
    name: *const c_char,
) -> *mut c_char {
    ffi_call("rust_recover_from_mnemonic", || {
        let session = Session::recover(
            config_arg(config_json)?,
            arg(password, "password")?,
            arg(mnemonic, "mnemonic")?,
            arg(name, "name")?,
        )?;
        let wallet = sessions().insert(session);
        Ok(json!({ "wallet": wallet }))
    })
}

#[no_mangle]
/// Stops the wallet's listeners and drops its seed. The handle is invalid
/// afterwards.
pub extern "C" fn rust_close_wallet(wallet: u64) -> *mut c_char {
    ffi_call("rust_close_wallet", || {
        let session = sessions().remove(wallet)?;
        session.close();
        ListenerTransport::global().cancel_wallet(&endpoint(session));
        info!("closed wallet handle {wallet}");
        Ok(true)
    })
}

#[no_mangle]
pub extern "C" fn rust_wallet_balances(
    wallet: u64,
    refresh: bool,
    min_confirmations: u64,
) -> *mut c_char {
    ffi_call("rust_wallet_balances", || {
        sessions().get(wallet)?.balances(refresh, min_confirmations)
    })
}

#[no_mangle]
pub extern "C" fn rust_wallet_scan_outputs(
    wallet: u64,
    start_height: u64,
    number_of_blocks: u64,
) -> *mut c_char {
    ffi_call("rust_wallet_scan_outputs", || {
        sessions()
            .get(wallet)?
            .scan_outputs(start_height, number_of_blocks)
    })
}

#[no_mangle]
/// Create a slate for `amount` and publish it on the relay, encrypted to
/// `to_address`. Returns the slate in state Sent.
///
/// # Safety
/// `amount`, `relay_json` and `to_address` must be valid C strings;
/// `message` may be null.
pub unsafe extern "C" fn rust_create_tx(
    wallet: u64,
    amount: *const c_char,
    min_confirmations: u64,
    relay_json: *const c_char,
    to_address: *const c_char,
    message: *const c_char,
) -> *mut c_char {
    ffi_call("rust_create_tx", || {
        let session = sessions().get(wallet)?;
        let relay = RelayConfig::from_json(arg(relay_json, "relay_json")?)?;
        let args = tx_args(amount, min_confirmations, message)?;
        send_via_relay(&*session, &relay, &args, arg(to_address, "to_address")?)
    })
}

#[no_mangle]
pub extern "C" fn rust_txs_get(wallet: u64, refresh_from_node: bool) -> *mut c_char {
    ffi_call("rust_txs_get", || {
        sessions().get(wallet)?.txs_get(refresh_from_node)
    })
}

#[no_mangle]
/// # Safety
/// `tx_id` must be a valid C string holding a UUID.
pub unsafe extern "C" fn rust_tx_cancel(wallet: u64, tx_id: *const c_char) -> *mut c_char {
    ffi_call("rust_tx_cancel", || {
        let raw = arg(tx_id, "tx_id")?;
        let id = Uuid::parse_str(raw)
            .map_err(|e| WalletError::InvalidArgument(format!("tx_id {raw:?}: {e}")))?;
        sessions().get(wallet)?.cancel_tx(id)
    })
}

#[no_mangle]
/// Push a finalized slate whose earlier post failed. With a null `tx_id`
/// every such slate is retried and the list of posted slates returned.
///
/// # Safety
/// `tx_id` must be a valid C string holding a UUID, or null.
pub unsafe extern "C" fn rust_tx_post(wallet: u64, tx_id: *const c_char) -> *mut c_char {
    ffi_call("rust_tx_post", || {
        let session = sessions().get(wallet)?;
        match opt_arg(tx_id, "tx_id")? {
            Some(raw) => {
                let id = Uuid::parse_str(raw)
                    .map_err(|e| WalletError::InvalidArgument(format!("tx_id {raw:?}: {e}")))?;
                Ok(vec![session.post_tx(id, false)?])
            }
            None => session.repost_finalized(false),
        }
    })
}

#[no_mangle]
/// # Safety
/// `config_json` must be a valid C string.
pub unsafe extern "C" fn rust_get_chain_height(config_json: *const c_char) -> *mut c_char {
    ffi_call("rust_get_chain_height", || {
        get_chain_height(&config_arg(config_json)?)
    })
}

#[no_mangle]
/// Stop the wallet's listeners and erase it from disk. The handle is
/// invalid afterwards.
///
/// # Safety
/// `relay_json` must be a valid C string or null.
pub unsafe extern "C" fn rust_delete_wallet(
    wallet: u64,
    relay_json: *const c_char,
) -> *mut c_char {
    ffi_call("rust_delete_wallet", || {
        relay_arg(relay_json)?;
        let session = sessions().remove(wallet)?;
        delete_wallet(ListenerTransport::global(), &endpoint(session))?;
        Ok(true)
    })
}

#[no_mangle]
/// Address at `index`, suffixed with the relay domain when `relay_json` is
/// given.
///
/// # Safety
/// `relay_json` must be a valid C string or null.
pub unsafe extern "C" fn rust_get_wallet_address(
    wallet: u64,
    index: u32,
    relay_json: *const c_char,
) -> *mut c_char {
    ffi_call("rust_get_wallet_address", || {
        let relay = relay_arg(relay_json)?;
        let address = sessions().get(wallet)?.get_address(index, relay.as_ref())?;
        Ok(address.to_string())
    })
}

#[no_mangle]
/// Returns `{"address", "chain", "public_key", "relay"}`.
///
/// # Safety
/// `address` must be a valid C string.
pub unsafe extern "C" fn rust_validate_address(address: *const c_char) -> *mut c_char {
    ffi_call("rust_validate_address", || {
        let parsed = validate_address(arg(address, "address")?)?;
        Ok(json!({
            "address": parsed.to_string(),
            "chain": parsed.chain,
            "public_key": parsed.public_key,
            "relay": parsed.relay,
        }))
    })
}

#[no_mangle]
/// # Safety
/// `amount` must be a valid C string.
pub unsafe extern "C" fn rust_get_tx_fees(
    wallet: u64,
    amount: *const c_char,
    min_confirmations: u64,
    use_all: bool,
) -> *mut c_char {
    ffi_call("rust_get_tx_fees", || {
        let amount = parse_amount(arg(amount, "amount")?)?;
        let strategy = if use_all {
            SelectionStrategy::All
        } else {
            SelectionStrategy::LargestFirst
        };
        sessions()
            .get(wallet)?
            .get_tx_fees(amount, min_confirmations, strategy)
    })
}

#[no_mangle]
/// Send `amount` to the wallet listening at `dest` (an http(s) url), then
/// finalize and post. Returns the posted slate.
///
/// # Safety
/// `amount` and `dest` must be valid C strings; `message` may be null.
pub unsafe extern "C" fn rust_tx_send_http(
    wallet: u64,
    amount: *const c_char,
    min_confirmations: u64,
    dest: *const c_char,
    message: *const c_char,
) -> *mut c_char {
    ffi_call("rust_tx_send_http", || {
        let session = sessions().get(wallet)?;
        let args = tx_args(amount, min_confirmations, message)?;
        send_tx_http(&*session, &args, arg(dest, "dest")?, &RetryPolicy::default())
    })
}

#[no_mangle]
/// Returns `{"listener": handle}`. Relay configuration errors are reported
/// here, before any connection is made.
///
/// # Safety
/// `relay_json` must be a valid C string.
pub unsafe extern "C" fn rust_mwcmqs_listener_start(
    wallet: u64,
    relay_json: *const c_char,
) -> *mut c_char {
    ffi_call("rust_mwcmqs_listener_start", || {
        let relay = RelayConfig::from_json(arg(relay_json, "relay_json")?)?;
        let session = sessions().get(wallet)?;
        let handle = ListenerTransport::global().start(endpoint(session), &relay)?;
        Ok(json!({ "listener": handle }))
    })
}

#[no_mangle]
/// `true` if the listener was running. Cancelling twice is harmless.
pub extern "C" fn rust_mwcmqs_listener_cancel(listener: u64) -> *mut c_char {
    ffi_call("rust_mwcmqs_listener_cancel", || {
        Ok(ListenerTransport::global().cancel(ListenerHandle(listener)))
    })
}

#[no_mangle]
/// Armor a slate. With `recipient_address` the pack is encrypted to it.
///
/// # Safety
/// `slate_json` must be a valid C string; `recipient_address` may be null.
pub unsafe extern "C" fn rust_encode_slatepack(
    wallet: u64,
    slate_json: *const c_char,
    index: u32,
    recipient_address: *const c_char,
) -> *mut c_char {
    ffi_call("rust_encode_slatepack", || {
        let slate = Slate::from_json(arg(slate_json, "slate_json")?)?;
        let recipient = opt_arg(recipient_address, "recipient_address")?
            .map(validate_address)
            .transpose()?;
        sessions().get(wallet)?.encode_slatepack(
            &slate,
            index,
            recipient.as_ref().map(|a| &a.public_key),
        )
    })
}

#[no_mangle]
/// Returns `{"slate", "sender", "recipient", "encrypted"}`.
///
/// # Safety
/// `armored` must be a valid C string.
pub unsafe extern "C" fn rust_decode_slatepack(
    wallet: u64,
    armored: *const c_char,
    index: u32,
) -> *mut c_char {
    ffi_call("rust_decode_slatepack", || {
        let pack = sessions()
            .get(wallet)?
            .decode_slatepack(arg(armored, "armored")?, index)?;
        Ok(json!({
            "encrypted": pack.is_encrypted(),
            "slate": pack.slate,
            "sender": pack.sender,
            "recipient": pack.recipient,
        }))
    })
}

#[no_mangle]
/// Release a string returned by this library. The bytes are wiped first,
/// since some results carry the mnemonic.
///
/// # Safety
/// `s` must come from this library and not be freed twice. Null is ignored.
pub unsafe extern "C" fn rust_string_free(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    let mut bytes = CString::from_raw(s).into_bytes();
    bytes.zeroize();
}
