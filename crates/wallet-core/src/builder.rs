//! TransactionBuilder: input selection, the sender/receiver halves of the
//! signing protocol and the slate state machine.

use std::sync::Arc;

use log::{info, warn};
use mw_node_rpc::Transaction;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{self, Commitment, PartialSig, PublicKey};
use crate::error::{Result, WalletError};
use crate::fees::FeeSchedule;
use crate::keys::{KeyRef, KeyVault, SigningContext};
use crate::model::{FeeEstimate, Output, OutputStatus, TxDirection};
use crate::outputs::OutputStore;
use crate::plan::{select_inputs, SelectionStrategy};
use crate::slate::{KernelData, ParticipantRole, Slate, SlateInput, SlateOutput, SlateState};
use crate::slates::SlateStore;
use crate::storage::WalletStore;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateTxArgs {
    pub amount: u64,
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u64,
    #[serde(default)]
    pub strategy: SelectionStrategy,
    /// Local note kept in the tx log.
    #[serde(default)]
    pub note: Option<String>,
    /// Message carried in the sender's participant data.
    #[serde(default)]
    pub message: Option<String>,
    /// Blocks after the current tip before the slate expires.
    #[serde(default)]
    pub ttl_blocks: Option<u64>,
}

fn default_min_confirmations() -> u64 {
    10
}

impl CreateTxArgs {
    pub fn new(amount: u64, min_confirmations: u64) -> Self {
        Self {
            amount,
            min_confirmations,
            ..Self::default()
        }
    }
}

pub struct TransactionBuilder<S: WalletStore> {
    outputs: Arc<OutputStore<S>>,
    slates: Arc<SlateStore<S>>,
    fees: FeeSchedule,
}

impl<S: WalletStore> TransactionBuilder<S> {
    pub fn new(outputs: Arc<OutputStore<S>>, slates: Arc<SlateStore<S>>, fees: FeeSchedule) -> Self {
        Self {
            outputs,
            slates,
            fees,
        }
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    /// Dry run of selection and fee computation. Touches nothing.
    pub fn get_tx_fees(
        &self,
        amount: u64,
        min_confirmations: u64,
        strategy: SelectionStrategy,
    ) -> Result<FeeEstimate> {
        let candidates = self.outputs.spendable(min_confirmations)?;
        let refs: Vec<&Output> = candidates.iter().collect();
        let sel = select_inputs(&refs, amount, &self.fees, strategy)?;
        Ok(FeeEstimate {
            amount,
            fee: sel.fee,
            num_inputs: sel.inputs.len(),
            total_inputs: sel.total,
            change: sel.change,
        })
    }

    /// Select and lock inputs, build the change output and the sender's
    /// half of the signature data.
    pub fn create_tx(&self, vault: &KeyVault, args: &CreateTxArgs) -> Result<Slate> {
        if vault.is_locked() {
            return Err(WalletError::WalletLocked);
        }
        let (mut slate, selection) = {
            let _reserve = self.outputs.reserve_guard();
            let tip = self.outputs.tip_height()?;
            let candidates = self.outputs.spendable(args.min_confirmations)?;
            let refs: Vec<&Output> = candidates.iter().collect();
            let selection = select_inputs(&refs, args.amount, &self.fees, args.strategy)?;
            let mut slate = Slate::new(args.amount, selection.fee, tip);
            slate.ttl_cutoff_height = args.ttl_blocks.map(|t| tip.saturating_add(t.max(1)));
            let ids: Vec<Commitment> = selection.inputs.iter().map(|o| o.commitment).collect();
            self.outputs.lock_outputs(&ids, slate.id)?;
            (slate, selection)
        };

        let built = (|| -> Result<()> {
            slate.inputs = selection
                .inputs
                .iter()
                .map(|o| SlateInput {
                    commitment: o.commitment,
                    is_coinbase: o.is_coinbase,
                })
                .collect();
            let mut ctx = SigningContext {
                slate_id: slate.id,
                role: ParticipantRole::Sender,
                inputs: selection
                    .inputs
                    .iter()
                    .map(|o| KeyRef {
                        index: o.key_index,
                        amount: o.amount,
                    })
                    .collect(),
                outputs: Vec::new(),
            };
            if selection.change > 0 {
                let index = self.outputs.next_key_index()?;
                let (commitment, proof) = vault.build_output(selection.change, index)?;
                self.outputs.record_output(Output {
                    commitment,
                    amount: selection.change,
                    key_index: index,
                    height: slate.height,
                    is_coinbase: false,
                    status: OutputStatus::Unconfirmed,
                    tx_id: Some(slate.id),
                })?;
                slate.outputs.push(SlateOutput { commitment, proof });
                ctx.outputs.push(KeyRef {
                    index,
                    amount: selection.change,
                });
            }
            let data = vault.participant_data(&slate, &ctx, args.message.clone())?;
            slate.participants.push(data);
            self.slates.save_context(&ctx)?;
            self.slates
                .start_log(&slate, TxDirection::Sent, args.note.clone())?;
            self.slates.save(&slate)
        })();

        if let Err(err) = built {
            if let Err(unwind) = self.outputs.release_tx(slate.id) {
                warn!("could not release outputs of failed slate {}: {unwind}", slate.id);
            }
            return Err(err);
        }
        info!(
            "created slate {} amount={} fee={} inputs={} change={}",
            slate.id,
            slate.amount,
            slate.fee,
            slate.inputs.len(),
            selection.change
        );
        Ok(slate)
    }

    /// Record that the slate left this wallet. Repeating is a no-op.
    pub fn mark_sent(&self, id: Uuid) -> Result<Slate> {
        let guard = self.slates.guard(id);
        let _held = guard.lock();
        let mut slate = self.slates.require(id)?;
        match slate.state {
            SlateState::Sent => return Ok(slate),
            SlateState::Cancelled => return Err(WalletError::Cancelled(id.to_string())),
            _ => {}
        }
        slate.transition(SlateState::Sent)?;
        self.slates.save(&slate)?;
        Ok(slate)
    }

    /// Receiver side: add our output and signature share.
    pub fn receive_slate(
        &self,
        vault: &KeyVault,
        incoming: &Slate,
        message: Option<String>,
    ) -> Result<Slate> {
        incoming.validate()?;
        if !matches!(incoming.state, SlateState::Created | SlateState::Sent) {
            return Err(WalletError::InvalidSlate(format!(
                "cannot receive a slate in state {}",
                incoming.state
            )));
        }
        if incoming.participants.len() != 1 || incoming.signature_count() != 0 {
            return Err(WalletError::InvalidSlate(
                "expected unsigned sender data only".into(),
            ));
        }

        let guard = self.slates.guard(incoming.id);
        let _held = guard.lock();
        if let Some(existing) = self.slates.get(incoming.id)? {
            if let Some(ctx) = self.slates.context(incoming.id)? {
                if ctx.role == ParticipantRole::Sender {
                    return Err(WalletError::InvalidSlate(
                        "slate was created by this wallet".into(),
                    ));
                }
            }
            if existing.state == SlateState::Cancelled {
                return Err(WalletError::Cancelled(existing.id.to_string()));
            }
            if same_offer(&existing, incoming) {
                info!("duplicate delivery of slate {}, ignoring", incoming.id);
                return Ok(existing);
            }
            return Err(WalletError::InvalidSlate(format!(
                "slate {} conflicts with the copy already received",
                incoming.id
            )));
        }

        let tip = self.outputs.tip_height()?;
        if let Some(ttl) = incoming.ttl_cutoff_height {
            if tip > 0 && tip >= ttl {
                return Err(WalletError::InvalidSlate(format!(
                    "slate expired at height {ttl}"
                )));
            }
        }

        let mut slate = incoming.clone();
        let index = self.outputs.next_key_index()?;
        let (commitment, proof) = vault.build_output(slate.amount, index)?;
        slate.outputs.push(SlateOutput { commitment, proof });
        let ctx = SigningContext {
            slate_id: slate.id,
            role: ParticipantRole::Receiver,
            inputs: Vec::new(),
            outputs: vec![KeyRef {
                index,
                amount: slate.amount,
            }],
        };
        let data = vault.participant_data(&slate, &ctx, message)?;
        slate.participants.push(data);
        let sig = vault.sign(&slate, &ctx)?;
        slate
            .participant_mut(ParticipantRole::Receiver)
            .ok_or_else(|| WalletError::SigningError("receiver data vanished".into()))?
            .part_sig = Some(sig);
        slate.transition(SlateState::Received)?;

        self.outputs.record_output(Output {
            commitment,
            amount: slate.amount,
            key_index: index,
            height: tip,
            is_coinbase: false,
            status: OutputStatus::Unconfirmed,
            tx_id: Some(slate.id),
        })?;
        self.slates.save_context(&ctx)?;
        self.slates.start_log(&slate, TxDirection::Received, None)?;
        self.slates.save(&slate)?;
        info!("received slate {} amount={}", slate.id, slate.amount);
        Ok(slate)
    }

    /// Sender side: add our share, aggregate, verify and mark Finalized.
    pub fn finalize(&self, vault: &KeyVault, incoming: &Slate) -> Result<Slate> {
        let id = incoming.id;
        let guard = self.slates.guard(id);
        let _held = guard.lock();
        let stored = self.slates.require(id)?;
        match stored.state {
            SlateState::Cancelled => return Err(WalletError::Cancelled(id.to_string())),
            SlateState::Finalized | SlateState::PostedToChain => {
                info!("slate {id} already {}, ignoring", stored.state);
                return Ok(stored);
            }
            _ => {}
        }
        let ctx = self
            .slates
            .context(id)?
            .ok_or_else(|| WalletError::CorruptedState(format!("no signing context for {id}")))?;
        if ctx.role != ParticipantRole::Sender {
            return Err(WalletError::InvalidSlate(
                "only the sender can finalize".into(),
            ));
        }

        incoming.validate()?;
        if incoming.state != SlateState::Received {
            return Err(WalletError::InvalidSlate(format!(
                "cannot finalize a slate in state {}",
                incoming.state
            )));
        }
        check_matches_offer(&stored, incoming)?;

        let present = incoming.signature_count() + 1;
        let required = incoming.num_participants as usize;
        let receiver = incoming
            .participant(ParticipantRole::Receiver)
            .filter(|p| p.part_sig.is_some())
            .ok_or(WalletError::IncompleteParticipation { present, required })?
            .clone();

        for input in &stored.inputs {
            match self.outputs.get(&input.commitment)? {
                Some(o) if o.status == OutputStatus::Locked && o.tx_id == Some(id) => {}
                _ => return Err(WalletError::OutputUnavailable(input.commitment.to_hex())),
            }
        }

        let mut slate = incoming.clone();
        let own_sig = vault.sign(&slate, &ctx)?;
        slate
            .participant_mut(ParticipantRole::Sender)
            .ok_or_else(|| WalletError::InvalidSlate("sender data missing".into()))?
            .part_sig = Some(own_sig);

        let excess_sum = crypto::sum_points(slate.participants.iter().map(|p| &p.public_excess))
            .ok_or_else(|| WalletError::InvalidSlate("invalid public excess".into()))?;
        let nonce_sum = crypto::sum_points(slate.participants.iter().map(|p| &p.public_nonce))
            .ok_or_else(|| WalletError::InvalidSlate("invalid public nonce".into()))?;
        let msg = crypto::kernel_message(slate.fee, slate.lock_height);
        let receiver_sig = receiver
            .part_sig
            .ok_or(WalletError::IncompleteParticipation { present, required })?;
        if !crypto::verify_partial(
            &receiver_sig,
            &receiver.public_nonce,
            &receiver.public_excess,
            &nonce_sum,
            &excess_sum,
            &msg,
        ) {
            return Err(WalletError::InvalidSlate(
                "receiver signature share does not verify".into(),
            ));
        }

        let shares: Vec<PartialSig> = slate.participants.iter().filter_map(|p| p.part_sig).collect();
        if shares.len() < required {
            return Err(WalletError::IncompleteParticipation {
                present: shares.len(),
                required,
            });
        }
        let signature = crypto::aggregate(&shares, &nonce_sum)
            .ok_or_else(|| WalletError::SigningError("non-canonical signature share".into()))?;
        let excess = PublicKey(excess_sum.compress().to_bytes());
        if !crypto::verify_kernel(&signature, &excess, slate.fee, slate.lock_height) {
            return Err(WalletError::SigningError(
                "aggregate signature does not verify".into(),
            ));
        }
        let balance = crypto::commitment_excess(
            &slate.input_commitments(),
            &slate.output_commitments(),
            slate.fee,
        )
        .ok_or_else(|| WalletError::InvalidSlate("invalid commitment".into()))?;
        if balance != excess_sum {
            return Err(WalletError::InvalidSlate("commitments do not balance".into()));
        }
        let spent = slate
            .amount
            .checked_add(ctx.output_total())
            .and_then(|v| v.checked_add(slate.fee));
        if spent != Some(ctx.input_total()) {
            return Err(WalletError::InvalidSlate(format!(
                "inputs {} != amount {} + change {} + fee {}",
                ctx.input_total(),
                slate.amount,
                ctx.output_total(),
                slate.fee
            )));
        }

        slate.kernel = Some(KernelData {
            excess,
            excess_sig: signature,
            fee: slate.fee,
            lock_height: slate.lock_height,
        });
        if self.slates.cancel_requested(id) {
            warn!("slate {id} cancelled during finalize");
            return Err(WalletError::Cancelled(id.to_string()));
        }
        slate.transition(SlateState::Finalized)?;
        self.slates.save(&slate)?;
        info!("finalized slate {id} kernel={excess}");
        Ok(slate)
    }

    /// Hand a finalized slate to `push` and mark it posted. Posting an
    /// already posted slate is a no-op.
    pub fn post_tx(
        &self,
        id: Uuid,
        push: impl FnOnce(&Transaction) -> Result<()>,
    ) -> Result<Slate> {
        let guard = self.slates.guard(id);
        let _held = guard.lock();
        let mut slate = self.slates.require(id)?;
        match slate.state {
            SlateState::PostedToChain => return Ok(slate),
            SlateState::Cancelled => return Err(WalletError::Cancelled(id.to_string())),
            SlateState::Finalized => {}
            other => {
                return Err(WalletError::InvalidTransition {
                    id: id.to_string(),
                    from: other,
                    to: SlateState::PostedToChain,
                })
            }
        }
        let tx = slate.to_transaction()?;
        push(&tx)?;
        slate.transition(SlateState::PostedToChain)?;
        self.slates.save(&slate)?;
        info!("posted slate {id}");
        Ok(slate)
    }

    /// Release everything the slate reserved and mark it Cancelled.
    /// Fails with `AlreadyFinalized` once the slate is finalized or posted;
    /// cancelling twice is a no-op.
    pub fn cancel_tx(&self, id: Uuid) -> Result<Slate> {
        self.slates.request_cancel(id);
        let guard = self.slates.guard(id);
        let result = {
            let _held = guard.lock();
            self.cancel_locked(id)
        };
        self.slates.clear_cancel(id);
        result
    }

    fn cancel_locked(&self, id: Uuid) -> Result<Slate> {
        let mut slate = self.slates.require(id)?;
        match slate.state {
            SlateState::Cancelled => return Ok(slate),
            SlateState::Finalized | SlateState::PostedToChain => {
                return Err(WalletError::AlreadyFinalized(id.to_string()))
            }
            _ => {}
        }
        self.outputs.release_tx(id)?;
        slate.transition(SlateState::Cancelled)?;
        self.slates.save(&slate)?;
        self.slates.delete_context(id)?;
        info!("cancelled slate {id}");
        Ok(slate)
    }
}

/// Same sender offer, ignoring what the receiver added.
fn same_offer(received: &Slate, incoming: &Slate) -> bool {
    received.amount == incoming.amount
        && received.fee == incoming.fee
        && received.height == incoming.height
        && received.lock_height == incoming.lock_height
        && received.inputs == incoming.inputs
        && received.participant(ParticipantRole::Sender)
            == incoming.participant(ParticipantRole::Sender)
        && incoming.outputs.iter().all(|o| received.outputs.contains(o))
        && received.outputs.len() == incoming.outputs.len() + 1
}

fn check_matches_offer(sent: &Slate, incoming: &Slate) -> Result<()> {
    let mismatch = |what: &str| {
        Err(WalletError::InvalidSlate(format!(
            "{what} differs from the slate that was sent"
        )))
    };
    if sent.amount != incoming.amount {
        return mismatch("amount");
    }
    if sent.fee != incoming.fee {
        return mismatch("fee");
    }
    if sent.lock_height != incoming.lock_height {
        return mismatch("lock height");
    }
    if sent.inputs != incoming.inputs {
        return mismatch("input set");
    }
    if sent.participant(ParticipantRole::Sender) != incoming.participant(ParticipantRole::Sender) {
        return mismatch("sender data");
    }
    if !sent.outputs.iter().all(|o| incoming.outputs.contains(o)) {
        return mismatch("change output");
    }
    if incoming.outputs.len() != sent.outputs.len() + 1 {
        return Err(WalletError::InvalidSlate(
            "expected exactly one receiver output".into(),
        ));
    }
    Ok(())
}
