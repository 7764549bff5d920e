//! KeyVault: mnemonic, master seed and every secret derived from it.
//!
//! Secrets never leave this module. Callers get commitments, public keys,
//! sealed proofs and signature shares; blinding factors and nonces are
//! re-derived on demand from the seed and the indexes in a
//! [`SigningContext`].

use std::sync::atomic::{AtomicBool, Ordering};

use bip39::{Language, Mnemonic};
use curve25519_dalek::scalar::Scalar;
use log::debug;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use crate::address::Address;
use crate::config::ChainType;
use crate::crypto::{self, Commitment, PartialSig, PublicKey};
use crate::error::{Result, WalletError};
use crate::slate::{ParticipantData, ParticipantRole, Slate};

const GENERATED_ENTROPY_BYTES: usize = 32;

/// Key index plus the amount it commits to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRef {
    pub index: u32,
    pub amount: u64,
}

/// Everything needed to re-derive one party's secrets for a slate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningContext {
    pub slate_id: Uuid,
    pub role: ParticipantRole,
    pub inputs: Vec<KeyRef>,
    pub outputs: Vec<KeyRef>,
}

impl SigningContext {
    pub fn input_total(&self) -> u64 {
        self.inputs.iter().map(|k| k.amount).sum()
    }

    pub fn output_total(&self) -> u64 {
        self.outputs.iter().map(|k| k.amount).sum()
    }
}

pub struct KeyVault {
    phrase: Zeroizing<String>,
    seed: Zeroizing<[u8; 64]>,
    chain: ChainType,
    account: String,
    locked: AtomicBool,
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault")
            .field("chain", &self.chain)
            .field("account", &self.account)
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// Fresh 24-word English phrase.
pub fn generate_mnemonic() -> Result<Zeroizing<String>> {
    let mut entropy = Zeroizing::new([0u8; GENERATED_ENTROPY_BYTES]);
    OsRng.fill_bytes(entropy.as_mut_slice());
    let mnemonic = Mnemonic::from_entropy(entropy.as_slice())
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}

/// Parse and normalise a phrase; rejects bad words and checksums.
pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic> {
    let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
    let mnemonic = Mnemonic::parse_in(Language::English, normalized.as_str())
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    match mnemonic.word_count() {
        12 | 15 | 18 | 21 | 24 => Ok(mnemonic),
        n => Err(WalletError::InvalidMnemonic(format!("{n} words"))),
    }
}

pub fn check_password_strength(password: &str, min_len: usize) -> Result<()> {
    if password.chars().count() < min_len {
        return Err(WalletError::WeakPassword(format!(
            "must be at least {min_len} characters"
        )));
    }
    if password.trim().is_empty() {
        return Err(WalletError::WeakPassword("blank".into()));
    }
    Ok(())
}

impl KeyVault {
    /// Build a vault from an existing phrase. The password feeds the seed
    /// derivation, so recovery requires the same password.
    pub fn from_mnemonic(
        phrase: &str,
        password: &str,
        chain: ChainType,
        account: &str,
    ) -> Result<Self> {
        let mnemonic = parse_mnemonic(phrase)?;
        let seed = Zeroizing::new(mnemonic.to_seed(password));
        debug!("key vault opened for account {account} on {chain:?}");
        Ok(Self {
            phrase: Zeroizing::new(mnemonic.to_string()),
            seed,
            chain,
            account: account.to_string(),
            locked: AtomicBool::new(false),
        })
    }

    pub fn chain(&self) -> ChainType {
        self.chain
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn mnemonic(&self) -> Zeroizing<String> {
        self.phrase.clone()
    }

    pub fn check_password(&self, password: &str) -> bool {
        match Mnemonic::parse_in(Language::English, self.phrase.as_str()) {
            Ok(m) => {
                let mut candidate = m.to_seed(password);
                let same = candidate == *self.seed;
                candidate.zeroize();
                same
            }
            Err(_) => false,
        }
    }

    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    pub fn unlock(&self, password: &str) -> Result<()> {
        if !self.check_password(password) {
            return Err(WalletError::InvalidPassword);
        }
        self.locked.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn child_scalar(&self, info: &str) -> Result<Scalar> {
        let okm = crypto::hkdf_expand::<64>(Some(b"mw-wallet/keys"), &self.seed[..], info.as_bytes())?;
        Ok(crypto::scalar_from_okm(&okm))
    }

    fn blind(&self, index: u32) -> Result<Scalar> {
        self.child_scalar(&format!("blind/{}/{index}", self.account))
    }

    fn address_secret(&self, index: u32) -> Result<Scalar> {
        self.child_scalar(&format!("address/{index}"))
    }

    fn detection_key(&self) -> Result<Zeroizing<[u8; 32]>> {
        crypto::hkdf_expand::<32>(Some(b"mw-wallet/keys"), &self.seed[..], b"detect")
    }

    pub fn address_key(&self, index: u32) -> Result<PublicKey> {
        Ok(crypto::public_key(&self.address_secret(index)?))
    }

    /// Deterministic in (seed, index).
    pub fn derive_address(&self, index: u32) -> Result<Address> {
        Ok(Address::new(self.chain, self.address_key(index)?))
    }

    pub fn commit(&self, amount: u64, index: u32) -> Result<Commitment> {
        Ok(crypto::commit(amount, &self.blind(index)?))
    }

    /// Commitment plus the proof that lets a later scan recognise it.
    pub fn build_output(&self, amount: u64, index: u32) -> Result<(Commitment, Vec<u8>)> {
        let commitment = self.commit(amount, index)?;
        let key = self.detection_key()?;
        let proof = crypto::seal_output_proof(&*key, &commitment, amount, index)?;
        Ok((commitment, proof))
    }

    /// `(amount, key_index)` when the output belongs to this wallet.
    pub fn rewind(&self, commitment: &Commitment, proof: &[u8]) -> Result<Option<(u64, u32)>> {
        let key = self.detection_key()?;
        let Some((amount, index)) = crypto::open_output_proof(&*key, commitment, proof)? else {
            return Ok(None);
        };
        if self.commit(amount, index)? != *commitment {
            return Ok(None);
        }
        Ok(Some((amount, index)))
    }

    fn excess_secret(&self, ctx: &SigningContext) -> Result<Scalar> {
        let mut x = Scalar::ZERO;
        for k in &ctx.outputs {
            x += self.blind(k.index)?;
        }
        for k in &ctx.inputs {
            x -= self.blind(k.index)?;
        }
        Ok(x)
    }

    fn nonce_secret(&self, slate: &Slate, ctx: &SigningContext) -> Result<Scalar> {
        let mut h = Sha256::new();
        h.update(slate.amount.to_le_bytes());
        h.update(slate.fee.to_le_bytes());
        h.update(slate.lock_height.to_le_bytes());
        for k in ctx.inputs.iter().chain(ctx.outputs.iter()) {
            h.update(k.index.to_le_bytes());
            h.update(k.amount.to_le_bytes());
        }
        let digest: [u8; 32] = h.finalize().into();
        let info = format!("nonce/{}/{}", ctx.slate_id, ctx.role.as_str());
        let mut ikm = Zeroizing::new(self.seed.to_vec());
        ikm.extend_from_slice(&digest);
        let okm = crypto::hkdf_expand::<64>(Some(b"mw-wallet/nonce"), &ikm, info.as_bytes())?;
        Ok(crypto::scalar_from_okm(&okm))
    }

    /// Public excess and nonce for this party, without a signature yet.
    pub fn participant_data(
        &self,
        slate: &Slate,
        ctx: &SigningContext,
        message: Option<String>,
    ) -> Result<ParticipantData> {
        if ctx.slate_id != slate.id {
            return Err(WalletError::SigningError("context belongs to another slate".into()));
        }
        Ok(ParticipantData {
            role: ctx.role,
            public_excess: crypto::public_key(&self.excess_secret(ctx)?),
            public_nonce: crypto::public_key(&self.nonce_secret(slate, ctx)?),
            part_sig: None,
            message,
        })
    }

    /// Produce this party's signature share. Needs every participant's
    /// public data on the slate.
    pub fn sign(&self, slate: &Slate, ctx: &SigningContext) -> Result<PartialSig> {
        if self.is_locked() {
            return Err(WalletError::WalletLocked);
        }
        if ctx.slate_id != slate.id {
            return Err(WalletError::SigningError("context belongs to another slate".into()));
        }
        if slate.participants.len() != slate.num_participants as usize {
            return Err(WalletError::SigningError(format!(
                "{} of {} participants have joined",
                slate.participants.len(),
                slate.num_participants
            )));
        }
        let x = self.excess_secret(ctx)?;
        let k = self.nonce_secret(slate, ctx)?;
        let own = slate
            .participant(ctx.role)
            .ok_or_else(|| WalletError::SigningError("own participant data missing".into()))?;
        if own.public_excess != crypto::public_key(&x) || own.public_nonce != crypto::public_key(&k) {
            return Err(WalletError::SigningError(
                "participant data does not match signing context".into(),
            ));
        }
        let excess_sum = crypto::sum_points(slate.participants.iter().map(|p| &p.public_excess))
            .ok_or_else(|| WalletError::SigningError("invalid public excess".into()))?;
        let nonce_sum = crypto::sum_points(slate.participants.iter().map(|p| &p.public_nonce))
            .ok_or_else(|| WalletError::SigningError("invalid public nonce".into()))?;
        let msg = crypto::kernel_message(slate.fee, slate.lock_height);
        let e = crypto::challenge(&nonce_sum, &excess_sum, &msg);
        Ok(PartialSig((k + e * x).to_bytes()))
    }

    /// Symmetric key shared between address `index` and a peer key.
    pub(crate) fn shared_key(
        &self,
        index: u32,
        peer: &PublicKey,
        info: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>> {
        crypto::shared_key(&self.address_secret(index)?, peer, info)
    }
}
