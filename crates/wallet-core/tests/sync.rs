mod common;

use common::{funded_alice, vault, wallet, MockChain, ALICE, BOB};
use mw_wallet_core::{CreateTxArgs, OutputStatus, SlateState, WalletError};

/// Blocks 100..=109 holding four of Alice's outputs (one later spent) and
/// one of Bob's.
fn busy_chain() -> MockChain {
    let chain = MockChain::new(0);
    let alice = vault(ALICE);
    let bob = vault(BOB);
    chain.pay(&alice, 11, 3, 101);
    chain.pay(&bob, 99, 0, 102);
    chain.pay(&alice, 22, 7, 104);
    chain.pay(&alice, 33, 1, 106);
    chain.pay(&alice, 44, 2, 108);
    let (spent, _) = alice.build_output(22, 7).unwrap();
    chain.spend(&spent.to_hex(), 107);
    chain.set_tip(109);
    chain
}

#[test]
fn scan_finds_owned_outputs_only() {
    let chain = busy_chain();
    let alice = wallet(ALICE, &chain);
    let report = alice.scan_outputs(100, 10).unwrap();
    assert_eq!(report.blocks_scanned, 10);
    assert_eq!(report.outputs_found, 4);
    assert_eq!(report.outputs_spent, 1);
    assert_eq!(report.next_height, 110);

    let outputs = alice.outputs().unwrap();
    let mut amounts: Vec<u64> = outputs.iter().map(|o| o.amount).collect();
    amounts.sort();
    assert_eq!(amounts, vec![11, 22, 33, 44]);
    let spent = outputs.iter().find(|o| o.amount == 22).unwrap();
    assert_eq!(spent.status, OutputStatus::Spent);

    let b = alice.balances(false, 1).unwrap();
    assert_eq!(b.total, 11 + 33 + 44);
}

#[test]
fn interrupted_scan_resumes_to_the_same_state() {
    let chain = busy_chain();
    let once = wallet(ALICE, &chain);
    once.scan_outputs(100, 10).unwrap();

    chain.fail_once_at(106);
    let resumed = wallet(ALICE, &chain);
    let err = resumed.scan_outputs(100, 10).unwrap_err();
    assert!(matches!(err, WalletError::NetworkUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(resumed.scan_cursor().unwrap().next_height, 106);

    resumed.scan_outputs(106, 4).unwrap();
    assert_eq!(resumed.outputs().unwrap(), once.outputs().unwrap());
    assert_eq!(resumed.scan_cursor().unwrap(), once.scan_cursor().unwrap());
}

#[test]
fn rescanning_is_idempotent() {
    let chain = busy_chain();
    let alice = wallet(ALICE, &chain);
    alice.scan_outputs(100, 10).unwrap();
    let first = alice.outputs().unwrap();
    alice.scan_outputs(100, 10).unwrap();
    alice.scan_outputs(104, 3).unwrap();
    assert_eq!(alice.outputs().unwrap(), first);
}

#[test]
fn range_is_capped_at_tip() {
    let chain = busy_chain();
    let alice = wallet(ALICE, &chain);
    let report = alice.scan_outputs(105, 1_000).unwrap();
    assert_eq!(report.next_height, 110);
    assert_eq!(report.blocks_scanned, 5);

    let past_tip = alice.scan_outputs(500, 10).unwrap();
    assert_eq!(past_tip.blocks_scanned, 0);
}

#[test]
fn refresh_scans_from_cursor() {
    let chain = busy_chain();
    let alice = wallet(ALICE, &chain);
    let first = alice.refresh().unwrap();
    assert_eq!(first.start_height, 0);
    assert_eq!(first.next_height, 110);

    chain.pay(&vault(ALICE), 5, 9, 112);
    let second = alice.refresh().unwrap();
    assert_eq!(second.start_height, 110);
    assert_eq!(second.outputs_found, 1);
    assert_eq!(alice.balances(false, 1).unwrap().total, 11 + 33 + 44 + 5);
}

#[test]
fn new_outputs_skip_scanned_key_indexes() {
    let chain = busy_chain();
    let alice = wallet(ALICE, &chain);
    alice.refresh().unwrap();
    // highest scanned index is 7, so change must use a fresh index
    let slate = alice
        .create_tx(&mw_wallet_core::CreateTxArgs::new(10, 1))
        .unwrap();
    let change = alice
        .outputs()
        .unwrap()
        .into_iter()
        .find(|o| o.tx_id == Some(slate.id) && o.status == OutputStatus::Unconfirmed)
        .unwrap();
    assert!(change.key_index > 7);
}

#[test]
fn rescan_does_not_confirm_an_unposted_spend() {
    let chain = MockChain::new(0);
    let alice = funded_alice(&chain);
    let offer = alice.create_tx(&CreateTxArgs::new(60, 1)).unwrap();
    alice.mark_sent(offer.id).unwrap();

    // blocks 1 and 2 hold the inputs the offer locked
    let report = alice.scan_outputs(0, 21).unwrap();
    assert_eq!(report.txs_confirmed, 0);

    let log = alice.txs_get(false).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].state, SlateState::Sent);
    assert!(!log[0].confirmed);
    assert_eq!(log[0].confirmed_height, None);
}
