mod common;

use common::{funded_alice, relay_config, wallet, MemoryRelay, MockChain, BOB};
use httpmock::prelude::*;
use mw_relay::{send_http, send_tx_http, send_via_relay_with, RelayClient, RelayError, RelayMessage};
use mw_wallet_core::{CreateTxArgs, RetryPolicy, SlateState, WalletError};
use serde_json::json;
use std::time::Duration;

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::immediate(attempts)
}

#[test]
fn send_http_returns_the_signed_reply() {
    let chain = MockChain::default();
    let alice = funded_alice(&chain);
    let bob = wallet(BOB, &chain);
    let offer = alice.create_tx(&CreateTxArgs::new(40, 1)).unwrap();
    let offer = alice.mark_sent(offer.id).unwrap();
    let reply = bob.receive_slate(&offer, None).unwrap();

    let server = MockServer::start();
    let listener = server.mock(|when, then| {
        when.method(POST)
            .path("/v2/foreign")
            .body_contains("receive_tx")
            .body_contains(offer.id.to_string());
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"Ok": reply}
        }));
    });

    let got = send_http(&offer, &server.base_url(), &fast_retry(1)).unwrap();
    listener.assert();
    assert_eq!(got, reply);

    let finalized = alice.finalize(&got).unwrap();
    assert_eq!(finalized.state, SlateState::Finalized);
}

#[test]
fn unreachable_receiver_times_out_and_releases_inputs() {
    let chain = MockChain::default();
    let alice = funded_alice(&chain);
    let server = MockServer::start();
    let down = server.mock(|when, then| {
        when.method(POST).path("/v2/foreign");
        then.status(503);
    });

    let err = send_tx_http(
        &alice,
        &CreateTxArgs::new(60, 1),
        &server.base_url(),
        &fast_retry(3),
    )
    .unwrap_err();
    down.assert_hits(3);
    assert!(matches!(err, WalletError::DeliveryTimeout { attempts: 3, .. }));
    assert_eq!(err.code(), 3002);

    let txs = alice.txs_get(false).unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].state, SlateState::Cancelled);
    assert_eq!(alice.balances(false, 1).unwrap().spendable, 100);
}

#[test]
fn receiver_refusal_is_not_retried() {
    let chain = MockChain::default();
    let alice = funded_alice(&chain);
    let server = MockServer::start();
    let refused = server.mock(|when, then| {
        when.method(POST).path("/v2/foreign");
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "wallet locked"}
        }));
    });

    let err = send_tx_http(
        &alice,
        &CreateTxArgs::new(10, 1),
        &server.base_url(),
        &fast_retry(5),
    )
    .unwrap_err();
    refused.assert_hits(1);
    assert!(matches!(err, WalletError::PeerRejected(_)));
    assert_eq!(alice.balances(false, 1).unwrap().locked, 0);
}

#[test]
fn reply_for_another_slate_is_refused() {
    let chain = MockChain::default();
    let alice = funded_alice(&chain);
    let bob = wallet(BOB, &chain);
    let first = alice.create_tx(&CreateTxArgs::new(10, 1)).unwrap();
    let second = alice.create_tx(&CreateTxArgs::new(10, 1)).unwrap();
    let wrong_reply = bob.receive_slate(&first, None).unwrap();

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v2/foreign");
        then.status(200)
            .json_body(json!({"jsonrpc": "2.0", "id": 1, "result": wrong_reply}));
    });
    let err = send_http(&second, &server.base_url(), &fast_retry(1)).unwrap_err();
    assert!(matches!(err, WalletError::InvalidSlate(_)));
}

#[test]
fn bad_destination_creates_nothing() {
    let chain = MockChain::default();
    let alice = funded_alice(&chain);
    let err = send_tx_http(
        &alice,
        &CreateTxArgs::new(10, 1),
        "ftp://wallet.example",
        &fast_retry(1),
    )
    .unwrap_err();
    assert!(matches!(err, WalletError::InvalidAddress(_)));
    assert!(alice.txs_get(false).unwrap().is_empty());
}

struct DeadRelay;

impl RelayClient for DeadRelay {
    fn publish(&self, _to: &str, _from: &str, _payload: &str) -> Result<(), RelayError> {
        Err(RelayError::Status {
            path: "publish".into(),
            status: 502,
        })
    }

    fn poll(&self, _: &str, _: u64, _: Duration) -> Result<Vec<RelayMessage>, RelayError> {
        Ok(Vec::new())
    }
}

#[test]
fn relay_send_cancels_when_publish_fails() {
    let chain = MockChain::default();
    let alice = funded_alice(&chain);
    let bob = wallet(BOB, &chain);
    let cfg = relay_config();
    let to = bob.get_address(0, Some(&cfg)).unwrap().to_string();

    let err = send_via_relay_with(&alice, &DeadRelay, &cfg, &CreateTxArgs::new(10, 1), &to)
        .unwrap_err();
    assert!(matches!(err, WalletError::DeliveryTimeout { attempts: 3, .. }));
    assert_eq!(
        alice.txs_get(false).unwrap()[0].state,
        SlateState::Cancelled
    );
}

#[test]
fn relay_send_rejects_a_bad_recipient() {
    let chain = MockChain::default();
    let alice = funded_alice(&chain);
    let relay = MemoryRelay::default();
    let err = send_via_relay_with(
        &alice,
        &relay,
        &relay_config(),
        &CreateTxArgs::new(10, 1),
        "xyz@relay.test",
    )
    .unwrap_err();
    assert!(matches!(err, WalletError::InvalidAddress(_)));
    assert!(alice.txs_get(false).unwrap().is_empty());
}
