mod common;

use common::{config, funded_alice, wallet, MockChain, ALICE, BOB, PASSWORD};
use httpmock::prelude::*;
use mw_wallet_core::{
    get_chain_height, validate_address, ChainType, CreateTxArgs, FileStore, RelayConfig,
    WalletError, WalletSession,
};
use serde_json::json;

fn file_wallet(dir: &std::path::Path, chain: &MockChain) -> WalletSession<FileStore, MockChain> {
    let mut cfg = config();
    cfg.data_dir = dir.to_path_buf();
    WalletSession::recover_with(
        cfg,
        FileStore::open(dir).unwrap(),
        chain.clone(),
        PASSWORD,
        ALICE,
        "main",
    )
    .unwrap()
}

#[test]
fn reopen_needs_the_right_password() {
    let dir = tempfile::tempdir().unwrap();
    let chain = MockChain::new(10);
    let created = file_wallet(dir.path(), &chain);
    let address = created.get_address(0, None).unwrap();
    created.close();
    drop(created);

    let mut cfg = config();
    cfg.data_dir = dir.path().to_path_buf();
    let wrong = WalletSession::open_with(
        cfg.clone(),
        FileStore::open(dir.path()).unwrap(),
        chain.clone(),
        "wrong password",
    );
    assert!(matches!(wrong, Err(WalletError::InvalidPassword)));

    let reopened =
        WalletSession::open_with(cfg, FileStore::open(dir.path()).unwrap(), chain, PASSWORD)
            .unwrap();
    assert_eq!(reopened.name(), "main");
    assert_eq!(reopened.get_address(0, None).unwrap(), address);
    assert_eq!(reopened.get_mnemonic().unwrap().as_str(), ALICE);
}

#[test]
fn init_refuses_to_overwrite_and_open_needs_a_wallet() {
    let dir = tempfile::tempdir().unwrap();
    let chain = MockChain::new(10);
    let _first = file_wallet(dir.path(), &chain);

    let mut cfg = config();
    cfg.data_dir = dir.path().to_path_buf();
    let second = WalletSession::init_with(
        cfg,
        FileStore::open(dir.path()).unwrap(),
        chain.clone(),
        None,
        PASSWORD,
        "again",
    );
    assert!(matches!(second, Err(WalletError::WalletExists(_))));

    let empty = tempfile::tempdir().unwrap();
    let mut cfg = config();
    cfg.data_dir = empty.path().to_path_buf();
    let missing = WalletSession::open_with(
        cfg,
        FileStore::open(empty.path()).unwrap(),
        chain,
        PASSWORD,
    );
    assert!(matches!(missing, Err(WalletError::WalletNotFound(_))));
}

#[test]
fn init_validates_input() {
    let chain = MockChain::new(10);
    let weak = WalletSession::init_with(
        config(),
        mw_wallet_core::InMemoryStore::new(),
        chain.clone(),
        None,
        "short",
        "w",
    );
    assert!(matches!(weak, Err(WalletError::WeakPassword(_))));

    let bad_phrase = WalletSession::init_with(
        config(),
        mw_wallet_core::InMemoryStore::new(),
        chain,
        Some("abandon abandon abandon"),
        PASSWORD,
        "w",
    );
    assert!(matches!(bad_phrase, Err(WalletError::InvalidMnemonic(_))));
}

#[test]
fn fresh_wallet_starts_scanning_at_tip() {
    let chain = MockChain::new(500);
    let session = WalletSession::init_with(
        config(),
        mw_wallet_core::InMemoryStore::new(),
        chain,
        None,
        PASSWORD,
        "fresh",
    )
    .unwrap();
    assert_eq!(session.scan_cursor().unwrap().next_height, 500);
    assert_eq!(session.get_mnemonic().unwrap().split(' ').count(), 24);
}

#[test]
fn close_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let chain = MockChain::new(10);
    let session = file_wallet(dir.path(), &chain);
    session.close();
    assert!(!session.is_open());
    assert!(matches!(session.get_mnemonic(), Err(WalletError::NoActiveWallet)));
    assert!(matches!(
        session.balances(false, 1),
        Err(WalletError::NoActiveWallet)
    ));

    session.delete().unwrap();
    assert!(!dir.path().join("wallet.db").exists());
}

#[test]
fn addresses_carry_the_relay_domain() {
    let chain = MockChain::new(10);
    let alice = wallet(ALICE, &chain);
    let relay = RelayConfig::new("mqs.example.org", 443);
    let address = alice.get_address(2, Some(&relay)).unwrap();
    let text = address.to_string();
    assert!(text.ends_with("@mqs.example.org"));

    let parsed = validate_address(&text).unwrap();
    assert_eq!(parsed.chain, ChainType::Floonet);
    assert_eq!(parsed.public_key, alice.address_key(2).unwrap());
    assert!(matches!(
        validate_address("not-an-address"),
        Err(WalletError::InvalidAddress(_))
    ));
}

#[test]
fn encrypted_slatepack_between_wallets() {
    let chain = MockChain::new(0);
    let alice = funded_alice(&chain);
    let bob = wallet(BOB, &chain);
    let offer = alice.create_tx(&CreateTxArgs::new(60, 1)).unwrap();

    let bob_key = bob.address_key(0).unwrap();
    let armored = alice.encode_slatepack(&offer, 0, Some(&bob_key)).unwrap();
    let pack = bob.decode_slatepack(&armored, 0).unwrap();
    assert_eq!(pack.slate, offer);
    assert_eq!(pack.sender, Some(alice.address_key(0).unwrap()));
    assert!(pack.is_encrypted());

    // not addressed to alice, and unreadable without a key
    assert!(alice.decode_slatepack(&armored, 0).is_err());
    assert!(mw_wallet_core::slatepack::decode(&armored).is_err());
}

#[test]
fn chain_height_from_node() {
    let server = MockServer::start();
    let tip = server.mock(|when, then| {
        when.method(POST)
            .path("/v2/foreign")
            .body_contains("get_tip");
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "height": 4242,
                "last_block_pushed": "00",
                "prev_block_to_last": "00",
                "total_difficulty": 1
            }
        }));
    });

    let mut cfg = config();
    cfg.node_url = server.base_url();
    assert_eq!(get_chain_height(&cfg).unwrap(), 4242);
    tip.assert();
}

#[test]
fn chain_height_unreachable_is_transient() {
    let mut cfg = config();
    cfg.node_url = "http://127.0.0.1:9".into();
    let err = get_chain_height(&cfg).unwrap_err();
    assert!(matches!(err, WalletError::NetworkUnavailable(_)));
    assert_eq!(err.code(), 3001);
}
