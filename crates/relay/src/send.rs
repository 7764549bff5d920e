// SPDX-License-Identifier: Apache-2.0

//! One-shot slate delivery: synchronous HTTP to a listening wallet, or an
//! encrypted drop on the relay for the recipient's listener to pick up.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use mw_wallet_core::{
    Address, CreateTxArgs, RelayConfig, Result, RetryPolicy, Slate, WalletError,
};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::client::{HttpRelay, RelayClient};
use crate::endpoint::SlateEndpoint;
use crate::listener::ListenerTransport;

const FOREIGN_API_PATH: &str = "v2/foreign";
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

fn destination(dest: &str) -> Result<Url> {
    let mut url =
        Url::parse(dest).map_err(|e| WalletError::InvalidAddress(format!("{dest}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(WalletError::InvalidAddress(format!(
            "{dest}: expected an http(s) url"
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.join(FOREIGN_API_PATH)
        .map_err(|e| WalletError::InvalidAddress(format!("{dest}: {e}")))
}

fn request_error(err: reqwest::Error) -> WalletError {
    if err.is_decode() || err.is_builder() {
        WalletError::PeerRejected(err.to_string())
    } else {
        WalletError::NetworkUnavailable(err.to_string())
    }
}

/// Hand `slate` to the wallet listening at `dest` and return its signed
/// reply. Transient failures are retried; when the budget runs out the
/// result is `DeliveryTimeout`.
pub fn send_http(slate: &Slate, dest: &str, retry: &RetryPolicy) -> Result<Slate> {
    #[derive(Serialize)]
    struct Request<'a> {
        jsonrpc: &'a str,
        id: u32,
        method: &'a str,
        params: (&'a Slate, Option<()>, Option<()>),
    }

    #[derive(Deserialize)]
    struct Envelope {
        result: Option<Value>,
        error: Option<Value>,
    }

    let url = destination(dest)?;
    let client = Client::builder()
        .timeout(SEND_TIMEOUT)
        .build()
        .map_err(request_error)?;
    let request = Request {
        jsonrpc: "2.0",
        id: 1,
        method: "receive_tx",
        params: (slate, None, None),
    };

    let reply = retry.deliver("send slate", |_| {
        let resp = client
            .post(url.clone())
            .json(&request)
            .send()
            .map_err(request_error)?;
        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(WalletError::NetworkUnavailable(format!(
                "{url} returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(WalletError::PeerRejected(format!("{url} returned {status}")));
        }
        let envelope: Envelope = resp.json().map_err(request_error)?;
        if let Some(err) = envelope.error {
            return Err(WalletError::PeerRejected(err.to_string()));
        }
        let mut result = envelope
            .result
            .ok_or_else(|| WalletError::InvalidSlate("receive_tx returned no slate".into()))?;
        // listeners wrap the reply as {"Ok": slate} or {"Err": reason}
        if let Some(err) = result.get("Err") {
            return Err(WalletError::PeerRejected(err.to_string()));
        }
        if result.get("Ok").is_some() {
            result = result["Ok"].take();
        }
        serde_json::from_value::<Slate>(result)
            .map_err(|e| WalletError::InvalidSlate(format!("receive_tx reply: {e}")))
    })?;

    if reply.id != slate.id {
        return Err(WalletError::InvalidSlate(format!(
            "reply is for slate {}, sent {}",
            reply.id, slate.id
        )));
    }
    Ok(reply)
}

/// Full sender flow over HTTP: create, deliver, finalize and post. A slate
/// that never got a reply is cancelled so its inputs are released.
pub fn send_tx_http(
    wallet: &dyn SlateEndpoint,
    args: &CreateTxArgs,
    dest: &str,
    retry: &RetryPolicy,
) -> Result<Slate> {
    destination(dest)?;
    let slate = wallet.create_tx(args)?;
    let reply = match wallet
        .mark_sent(slate.id)
        .and_then(|sent| send_http(&sent, dest, retry))
    {
        Ok(reply) => reply,
        Err(err) => {
            release(wallet, &slate, &err);
            return Err(err);
        }
    };
    let finalized = match wallet.finalize(&reply) {
        Ok(finalized) => finalized,
        Err(err) => {
            release(wallet, &slate, &err);
            return Err(err);
        }
    };
    info!("slate {} finalized with {dest}", finalized.id);
    wallet.post_tx(finalized.id)
}

/// Publish a new slate on the relay, encrypted to `to`. The recipient's
/// listener answers it and this wallet's listener completes it.
pub fn send_via_relay(
    wallet: &dyn SlateEndpoint,
    relay: &RelayConfig,
    args: &CreateTxArgs,
    to: &str,
) -> Result<Slate> {
    relay.validate()?;
    let client = HttpRelay::new(
        &relay.base_url(),
        Duration::from_secs(relay.poll_wait_secs),
    )
    .map_err(|e| WalletError::InvalidRelayConfig(e.to_string()))?;
    send_via_relay_with(wallet, &client, relay, args, to)
}

pub fn send_via_relay_with(
    wallet: &dyn SlateEndpoint,
    client: &dyn RelayClient,
    relay: &RelayConfig,
    args: &CreateTxArgs,
    to: &str,
) -> Result<Slate> {
    relay.validate()?;
    let recipient = Address::parse(to)?;
    let from = wallet
        .address(relay.address_index)?
        .with_relay(relay.domain_suffix())
        .to_string();

    let slate = wallet.create_tx(args)?;
    // marked before publishing so a fast reply never finds it still Created
    let published = wallet.mark_sent(slate.id).and_then(|sent| {
        let armored =
            wallet.encode_slatepack(&sent, relay.address_index, Some(&recipient.public_key))?;
        relay.retry.deliver("publish slate", |_| {
            client
                .publish(&recipient.base58(), &from, &armored)
                .map_err(WalletError::from)
        })?;
        Ok(sent)
    });
    match published {
        Ok(sent) => {
            info!("slate {} published for {to}", sent.id);
            Ok(sent)
        }
        Err(err) => {
            release(wallet, &slate, &err);
            Err(err)
        }
    }
}

fn release(wallet: &dyn SlateEndpoint, slate: &Slate, cause: &WalletError) {
    warn!("slate {} not delivered ({cause}); cancelling", slate.id);
    if let Err(err) = wallet.cancel_tx(slate.id) {
        warn!("cancel of slate {} failed: {err}", slate.id);
    }
}

/// Stop the wallet's listeners, then erase it.
pub fn delete_wallet(
    transport: &ListenerTransport,
    wallet: &Arc<dyn SlateEndpoint>,
) -> Result<()> {
    let stopped = transport.cancel_wallet(wallet);
    if stopped > 0 {
        info!("stopped {stopped} listener(s) before deleting wallet");
    }
    wallet.delete()
}
