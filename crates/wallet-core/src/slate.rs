use std::collections::BTreeSet;
use std::fmt;

use mw_node_rpc::{BlockOutput, OutputType, Transaction, TxKernel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{Commitment, PartialSig, PublicKey, Signature};
use crate::error::{Result, WalletError};

pub const SLATE_VERSION: u16 = 1;
/// Only sender + receiver negotiation is supported.
pub const TWO_PARTY: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlateState {
    Created,
    Sent,
    Received,
    Finalized,
    PostedToChain,
    Cancelled,
}

impl SlateState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SlateState::PostedToChain | SlateState::Cancelled)
    }

    /// Position along the success path; `Cancelled` sorts last.
    pub fn rank(self) -> u8 {
        match self {
            SlateState::Created => 0,
            SlateState::Sent => 1,
            SlateState::Received => 2,
            SlateState::Finalized => 3,
            SlateState::PostedToChain => 4,
            SlateState::Cancelled => 5,
        }
    }

    pub fn can_transition_to(self, next: SlateState) -> bool {
        use SlateState::*;
        matches!(
            (self, next),
            (Created, Sent)
                | (Created, Received)
                | (Sent, Received)
                | (Received, Finalized)
                | (Finalized, PostedToChain)
                | (Created, Cancelled)
                | (Sent, Cancelled)
                | (Received, Cancelled)
        )
    }
}

impl fmt::Display for SlateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Sender,
    Receiver,
}

impl ParticipantRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ParticipantRole::Sender => "sender",
            ParticipantRole::Receiver => "receiver",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantData {
    pub role: ParticipantRole,
    pub public_excess: PublicKey,
    pub public_nonce: PublicKey,
    #[serde(default)]
    pub part_sig: Option<PartialSig>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlateInput {
    pub commitment: Commitment,
    #[serde(default)]
    pub is_coinbase: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlateOutput {
    pub commitment: Commitment,
    #[serde(with = "hex")]
    pub proof: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelData {
    pub excess: PublicKey,
    pub excess_sig: Signature,
    pub fee: u64,
    pub lock_height: u64,
}

/// A transaction under negotiation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slate {
    pub version: u16,
    pub id: Uuid,
    pub state: SlateState,
    pub amount: u64,
    pub fee: u64,
    /// Chain height the sender saw when building.
    pub height: u64,
    #[serde(default)]
    pub lock_height: u64,
    #[serde(default)]
    pub ttl_cutoff_height: Option<u64>,
    pub num_participants: u8,
    #[serde(default)]
    pub inputs: Vec<SlateInput>,
    #[serde(default)]
    pub outputs: Vec<SlateOutput>,
    #[serde(default)]
    pub participants: Vec<ParticipantData>,
    #[serde(default)]
    pub kernel: Option<KernelData>,
}

impl Slate {
    pub fn new(amount: u64, fee: u64, height: u64) -> Self {
        Self {
            version: SLATE_VERSION,
            id: Uuid::new_v4(),
            state: SlateState::Created,
            amount,
            fee,
            height,
            lock_height: 0,
            ttl_cutoff_height: None,
            num_participants: TWO_PARTY,
            inputs: Vec::new(),
            outputs: Vec::new(),
            participants: Vec::new(),
            kernel: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| WalletError::InvalidSlate(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| WalletError::InvalidSlate(e.to_string()))
    }

    pub fn participant(&self, role: ParticipantRole) -> Option<&ParticipantData> {
        self.participants.iter().find(|p| p.role == role)
    }

    pub(crate) fn participant_mut(&mut self, role: ParticipantRole) -> Option<&mut ParticipantData> {
        self.participants.iter_mut().find(|p| p.role == role)
    }

    pub fn signature_count(&self) -> usize {
        self.participants
            .iter()
            .filter(|p| p.part_sig.is_some())
            .count()
    }

    pub fn input_commitments(&self) -> Vec<Commitment> {
        self.inputs.iter().map(|i| i.commitment).collect()
    }

    pub fn output_commitments(&self) -> Vec<Commitment> {
        self.outputs.iter().map(|o| o.commitment).collect()
    }

    /// Structural checks that need no wallet state.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(WalletError::InvalidSlate(msg));
        if self.version != SLATE_VERSION {
            return bad(format!("unsupported slate version {}", self.version));
        }
        if self.amount == 0 {
            return bad("amount must be positive".into());
        }
        if self.fee == 0 {
            return bad("fee must be positive".into());
        }
        if self.amount.checked_add(self.fee).is_none() {
            return bad("amount + fee overflows".into());
        }
        if self.num_participants != TWO_PARTY {
            return bad(format!(
                "{} participants requested, only {TWO_PARTY} supported",
                self.num_participants
            ));
        }
        if self.participants.len() > self.num_participants as usize {
            return bad(format!(
                "{} participants present for a {}-party slate",
                self.participants.len(),
                self.num_participants
            ));
        }
        let roles: BTreeSet<_> = self.participants.iter().map(|p| p.role).collect();
        if roles.len() != self.participants.len() {
            return bad("duplicate participant role".into());
        }
        let mut seen = BTreeSet::new();
        for c in self.input_commitments().iter().chain(self.output_commitments().iter()) {
            if !seen.insert(*c) {
                return bad(format!("commitment {c} appears twice"));
            }
        }
        if let Some(ttl) = self.ttl_cutoff_height {
            if ttl <= self.height {
                return bad(format!("ttl {ttl} is not above height {}", self.height));
            }
        }
        if self.state != SlateState::Created {
            if self.inputs.is_empty() {
                return bad("slate has no inputs".into());
            }
            if self.participant(ParticipantRole::Sender).is_none() {
                return bad("sender participant data missing".into());
            }
        }
        Ok(())
    }

    pub(crate) fn transition(&mut self, next: SlateState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(WalletError::InvalidTransition {
                id: self.id.to_string(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Node payload for a finalized slate.
    pub fn to_transaction(&self) -> Result<Transaction> {
        let kernel = self
            .kernel
            .as_ref()
            .ok_or_else(|| WalletError::InvalidSlate(format!("slate {} has no kernel", self.id)))?;
        Ok(Transaction {
            offset: hex::encode([0u8; 32]),
            inputs: self.inputs.iter().map(|i| i.commitment.to_hex()).collect(),
            outputs: self
                .outputs
                .iter()
                .map(|o| BlockOutput {
                    commit: o.commitment.to_hex(),
                    proof: hex::encode(&o.proof),
                    output_type: OutputType::Transaction,
                })
                .collect(),
            kernels: vec![TxKernel {
                excess: kernel.excess.to_hex(),
                excess_sig: kernel.excess_sig.to_hex(),
                fee: kernel.fee,
                lock_height: kernel.lock_height,
            }],
        })
    }
}
