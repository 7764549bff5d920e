// SPDX-License-Identifier: Apache-2.0

use mw_wallet_core::{
    crypto::PublicKey, Address, ChainSource, CreateTxArgs, Result, Slate, SlateState, Slatepack,
    WalletError, WalletSession, WalletStore,
};
use uuid::Uuid;

/// What the transport layer needs from an open wallet.
pub trait SlateEndpoint: Send + Sync + 'static {
    fn address(&self, index: u32) -> Result<Address>;
    /// Local state of slate `id`, if this wallet has seen it.
    fn slate_state(&self, id: Uuid) -> Result<Option<SlateState>>;
    fn create_tx(&self, args: &CreateTxArgs) -> Result<Slate>;
    fn mark_sent(&self, id: Uuid) -> Result<Slate>;
    fn receive_slate(&self, slate: &Slate) -> Result<Slate>;
    fn finalize(&self, slate: &Slate) -> Result<Slate>;
    fn post_tx(&self, id: Uuid) -> Result<Slate>;
    fn cancel_tx(&self, id: Uuid) -> Result<Slate>;
    fn encode_slatepack(
        &self,
        slate: &Slate,
        index: u32,
        recipient: Option<&PublicKey>,
    ) -> Result<String>;
    fn decode_slatepack(&self, armored: &str, index: u32) -> Result<Slatepack>;
    fn delete(&self) -> Result<()>;
}

impl<S: WalletStore, C: ChainSource> SlateEndpoint for WalletSession<S, C> {
    fn address(&self, index: u32) -> Result<Address> {
        self.get_address(index, None)
    }

    fn slate_state(&self, id: Uuid) -> Result<Option<SlateState>> {
        match self.slate(id) {
            Ok(slate) => Ok(Some(slate.state)),
            Err(WalletError::SlateNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create_tx(&self, args: &CreateTxArgs) -> Result<Slate> {
        WalletSession::create_tx(self, args)
    }

    fn mark_sent(&self, id: Uuid) -> Result<Slate> {
        WalletSession::mark_sent(self, id)
    }

    fn receive_slate(&self, slate: &Slate) -> Result<Slate> {
        WalletSession::receive_slate(self, slate, None)
    }

    fn finalize(&self, slate: &Slate) -> Result<Slate> {
        WalletSession::finalize(self, slate)
    }

    fn post_tx(&self, id: Uuid) -> Result<Slate> {
        WalletSession::post_tx(self, id, false)
    }

    fn cancel_tx(&self, id: Uuid) -> Result<Slate> {
        WalletSession::cancel_tx(self, id)
    }

    fn encode_slatepack(
        &self,
        slate: &Slate,
        index: u32,
        recipient: Option<&PublicKey>,
    ) -> Result<String> {
        WalletSession::encode_slatepack(self, slate, index, recipient)
    }

    fn decode_slatepack(&self, armored: &str, index: u32) -> Result<Slatepack> {
        WalletSession::decode_slatepack(self, armored, index)
    }

    fn delete(&self) -> Result<()> {
        WalletSession::delete(self)
    }
}
