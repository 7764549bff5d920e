// SPDX-License-Identifier: Apache-2.0

//! Slate transport for mw-wallet.
//!
//! - [`listener`]: background long-poll listeners on a store-and-forward
//!   relay, keyed by opaque handles.
//! - [`send`]: one-shot HTTP delivery to a listening wallet and encrypted
//!   drops on the relay.
//! - [`client`]: the relay wire client.

pub mod client;
pub mod endpoint;
pub mod listener;
pub mod send;

pub use client::{HttpRelay, RelayClient, RelayError, RelayMessage};
pub use endpoint::SlateEndpoint;
pub use listener::{
    Dispatched, Listener, ListenerHandle, ListenerStats, ListenerTransport, StopSignal,
};
pub use send::{delete_wallet, send_http, send_tx_http, send_via_relay, send_via_relay_with};
