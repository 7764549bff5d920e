//! Commitments, output proofs and the aggregate kernel signature, all on
//! the Ristretto group.

use std::fmt;
use std::sync::OnceLock;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT,
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
    traits::Identity,
};
use hkdf::Hkdf;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

use crate::error::{Result, WalletError};

const VALUE_GENERATOR_LABEL: &[u8] = b"mw-wallet/pedersen/value-generator";
const PROOF_INFO: &[u8] = b"mw-wallet/output-proof";
const PROOF_NONCE_LABEL: &[u8] = b"mw-wallet/output-proof-nonce";
const KERNEL_LABEL: &[u8] = b"mw-wallet/kernel";
const CHALLENGE_LABEL: &[u8] = b"mw-wallet/challenge";

macro_rules! hex_bytes32 {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> std::result::Result<Self, String> {
                let bytes = hex::decode(s.trim()).map_err(|e| format!("bad hex: {e}"))?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))?;
                Ok(Self(arr))
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
                s.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
                let raw = String::deserialize(d)?;
                Self::from_hex(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_bytes32!(
    /// Pedersen commitment `r·G + v·H`, compressed.
    Commitment
);
hex_bytes32!(
    /// Compressed Ristretto point used as a public excess, nonce or address key.
    PublicKey
);
hex_bytes32!(
    /// One participant's Schnorr share `k_i + e·x_i`.
    PartialSig
);

/// Aggregate kernel signature `(R, s)`; serialized as 64 bytes of hex.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Signature {
    pub nonce: PublicKey,
    pub s: [u8; 32],
}

impl Signature {
    pub fn to_hex(&self) -> String {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.nonce.0);
        bytes[32..].copy_from_slice(&self.s);
        hex::encode(bytes)
    }

    pub fn from_hex(s: &str) -> std::result::Result<Self, String> {
        let bytes = hex::decode(s.trim()).map_err(|e| format!("bad hex: {e}"))?;
        if bytes.len() != 64 {
            return Err(format!("expected 64 bytes, got {}", bytes.len()));
        }
        let mut nonce = [0u8; 32];
        let mut sig = [0u8; 32];
        nonce.copy_from_slice(&bytes[..32]);
        sig.copy_from_slice(&bytes[32..]);
        Ok(Self {
            nonce: PublicKey(nonce),
            s: sig,
        })
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// Second generator `H`, hashed to the curve so nobody knows `log_G(H)`.
pub fn value_generator() -> &'static RistrettoPoint {
    static H: OnceLock<RistrettoPoint> = OnceLock::new();
    H.get_or_init(|| RistrettoPoint::hash_from_bytes::<Sha512>(VALUE_GENERATOR_LABEL))
}

pub(crate) fn decompress(bytes: &[u8; 32]) -> Option<RistrettoPoint> {
    CompressedRistretto(*bytes).decompress()
}

pub(crate) fn canonical_scalar(bytes: &[u8; 32]) -> Option<Scalar> {
    Option::from(Scalar::from_canonical_bytes(*bytes))
}

pub(crate) fn commit(value: u64, blind: &Scalar) -> Commitment {
    let point = RISTRETTO_BASEPOINT_POINT * blind + value_generator() * Scalar::from(value);
    Commitment(point.compress().to_bytes())
}

pub(crate) fn public_key(secret: &Scalar) -> PublicKey {
    PublicKey((RISTRETTO_BASEPOINT_POINT * secret).compress().to_bytes())
}

/// True when the bytes decode to a valid group element.
pub fn is_valid_point(bytes: &[u8; 32]) -> bool {
    decompress(bytes).is_some()
}

/// Sum of compressed points; `None` if any fails to decompress.
pub fn sum_points<'a>(keys: impl IntoIterator<Item = &'a PublicKey>) -> Option<RistrettoPoint> {
    keys.into_iter()
        .try_fold(RistrettoPoint::identity(), |acc, k| {
            decompress(&k.0).map(|p| acc + p)
        })
}

/// `Σ C_out − Σ C_in + fee·H`; equals the kernel excess of a balanced tx.
pub fn commitment_excess(
    inputs: &[Commitment],
    outputs: &[Commitment],
    fee: u64,
) -> Option<RistrettoPoint> {
    let mut acc = value_generator() * Scalar::from(fee);
    for c in outputs {
        acc += decompress(&c.0)?;
    }
    for c in inputs {
        acc -= decompress(&c.0)?;
    }
    Some(acc)
}

/// Message committed to by the kernel signature.
pub fn kernel_message(fee: u64, lock_height: u64) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(KERNEL_LABEL);
    h.update(fee.to_le_bytes());
    h.update(lock_height.to_le_bytes());
    h.finalize().into()
}

pub(crate) fn challenge(
    nonce_sum: &RistrettoPoint,
    excess_sum: &RistrettoPoint,
    msg: &[u8; 32],
) -> Scalar {
    let mut h = Sha512::new();
    h.update(CHALLENGE_LABEL);
    h.update(nonce_sum.compress().as_bytes());
    h.update(excess_sum.compress().as_bytes());
    h.update(msg);
    Scalar::from_hash(h)
}

/// Check one share: `s_i·G == R_i + e·X_i`.
pub fn verify_partial(
    sig: &PartialSig,
    nonce: &PublicKey,
    excess: &PublicKey,
    nonce_sum: &RistrettoPoint,
    excess_sum: &RistrettoPoint,
    msg: &[u8; 32],
) -> bool {
    let (Some(s), Some(r), Some(x)) = (
        canonical_scalar(&sig.0),
        decompress(&nonce.0),
        decompress(&excess.0),
    ) else {
        return false;
    };
    let e = challenge(nonce_sum, excess_sum, msg);
    RISTRETTO_BASEPOINT_POINT * s == r + x * e
}

/// Sum shares into the final signature over the summed nonce.
pub fn aggregate(shares: &[PartialSig], nonce_sum: &RistrettoPoint) -> Option<Signature> {
    let s = shares
        .iter()
        .try_fold(Scalar::ZERO, |acc, share| {
            canonical_scalar(&share.0).map(|s| acc + s)
        })?;
    Some(Signature {
        nonce: PublicKey(nonce_sum.compress().to_bytes()),
        s: s.to_bytes(),
    })
}

/// Check the aggregate signature: `s·G == R + e·X`.
pub fn verify_kernel(sig: &Signature, excess: &PublicKey, fee: u64, lock_height: u64) -> bool {
    let (Some(s), Some(r), Some(x)) = (
        canonical_scalar(&sig.s),
        decompress(&sig.nonce.0),
        decompress(&excess.0),
    ) else {
        return false;
    };
    let e = challenge(&r, &x, &kernel_message(fee, lock_height));
    RISTRETTO_BASEPOINT_POINT * s == r + x * e
}

/// HKDF-SHA256 expansion into a fixed-size zeroizing buffer.
pub(crate) fn hkdf_expand<const N: usize>(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
) -> Result<Zeroizing<[u8; N]>> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = Zeroizing::new([0u8; N]);
    hk.expand(info, &mut okm[..])
        .map_err(|e| WalletError::SigningError(format!("hkdf expand: {e}")))?;
    Ok(okm)
}

pub(crate) fn scalar_from_okm(okm: &[u8; 64]) -> Scalar {
    Scalar::from_bytes_mod_order_wide(okm)
}

fn proof_cipher(detect_key: &[u8; 32], commitment: &Commitment) -> Result<(ChaCha20Poly1305, [u8; 12])> {
    let mut info = PROOF_INFO.to_vec();
    info.extend_from_slice(&commitment.0);
    let key = hkdf_expand::<32>(None, detect_key, &info)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let mut h = Sha256::new();
    h.update(PROOF_NONCE_LABEL);
    h.update(commitment.0);
    let digest: [u8; 32] = h.finalize().into();
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&digest[..12]);
    Ok((cipher, nonce))
}

/// Seal `(amount, key_index)` so only the detection key can recover it.
pub(crate) fn seal_output_proof(
    detect_key: &[u8; 32],
    commitment: &Commitment,
    amount: u64,
    key_index: u32,
) -> Result<Vec<u8>> {
    let (cipher, nonce) = proof_cipher(detect_key, commitment)?;
    let mut plain = Zeroizing::new([0u8; 12]);
    plain[..8].copy_from_slice(&amount.to_le_bytes());
    plain[8..].copy_from_slice(&key_index.to_le_bytes());
    cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &plain[..],
                aad: &commitment.0,
            },
        )
        .map_err(|_| WalletError::SigningError("output proof sealing failed".into()))
}

/// `None` when the proof was not sealed for this detection key.
pub(crate) fn open_output_proof(
    detect_key: &[u8; 32],
    commitment: &Commitment,
    proof: &[u8],
) -> Result<Option<(u64, u32)>> {
    let (cipher, nonce) = proof_cipher(detect_key, commitment)?;
    let Ok(plain) = cipher.decrypt(
        Nonce::from_slice(&nonce),
        Payload {
            msg: proof,
            aad: &commitment.0,
        },
    ) else {
        return Ok(None);
    };
    if plain.len() != 12 {
        return Ok(None);
    }
    let mut amount = [0u8; 8];
    let mut index = [0u8; 4];
    amount.copy_from_slice(&plain[..8]);
    index.copy_from_slice(&plain[8..]);
    Ok(Some((u64::from_le_bytes(amount), u32::from_le_bytes(index))))
}

/// Symmetric key from a Diffie-Hellman exchange on Ristretto.
pub(crate) fn shared_key(
    secret: &Scalar,
    peer: &PublicKey,
    info: &[u8],
) -> Result<Zeroizing<[u8; 32]>> {
    let peer = decompress(&peer.0)
        .ok_or_else(|| WalletError::InvalidSlate("peer key is not a valid point".into()))?;
    let shared = Zeroizing::new((peer * secret).compress().to_bytes());
    hkdf_expand::<32>(Some(b"mw-wallet/ecdh"), &shared[..], info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn random_scalar() -> Scalar {
        Scalar::random(&mut OsRng)
    }

    #[test]
    fn commitments_are_homomorphic() {
        let r1 = random_scalar();
        let r2 = random_scalar();
        let c1 = decompress(&commit(30, &r1).0).unwrap();
        let c2 = decompress(&commit(12, &r2).0).unwrap();
        let sum = decompress(&commit(42, &(r1 + r2)).0).unwrap();
        assert_eq!(c1 + c2, sum);
    }

    #[test]
    fn two_party_signature_verifies() {
        let (x1, k1) = (random_scalar(), random_scalar());
        let (x2, k2) = (random_scalar(), random_scalar());
        let (px1, pk1) = (public_key(&x1), public_key(&k1));
        let (px2, pk2) = (public_key(&x2), public_key(&k2));
        let x_sum = sum_points([&px1, &px2]).unwrap();
        let r_sum = sum_points([&pk1, &pk2]).unwrap();
        let msg = kernel_message(8_000_000, 0);
        let e = challenge(&r_sum, &x_sum, &msg);
        let s1 = PartialSig((k1 + e * x1).to_bytes());
        let s2 = PartialSig((k2 + e * x2).to_bytes());

        assert!(verify_partial(&s1, &pk1, &px1, &r_sum, &x_sum, &msg));
        assert!(verify_partial(&s2, &pk2, &px2, &r_sum, &x_sum, &msg));
        assert!(!verify_partial(&s1, &pk2, &px2, &r_sum, &x_sum, &msg));

        let sig = aggregate(&[s1, s2], &r_sum).unwrap();
        let excess = PublicKey(x_sum.compress().to_bytes());
        assert!(verify_kernel(&sig, &excess, 8_000_000, 0));
        assert!(!verify_kernel(&sig, &excess, 8_000_001, 0));
    }

    #[test]
    fn balanced_commitments_reduce_to_excess() {
        let r_in = random_scalar();
        let r_change = random_scalar();
        let r_recv = random_scalar();
        let input = commit(100, &r_in);
        let change = commit(38, &r_change);
        let recv = commit(60, &r_recv);
        let excess = commitment_excess(&[input], &[change, recv], 2).unwrap();
        let expected = RISTRETTO_BASEPOINT_POINT * (r_change + r_recv - r_in);
        assert_eq!(excess, expected);
    }

    #[test]
    fn output_proof_opens_only_for_owner() {
        let key = [7u8; 32];
        let other = [8u8; 32];
        let c = commit(55, &random_scalar());
        let proof = seal_output_proof(&key, &c, 55, 9).unwrap();
        assert_eq!(open_output_proof(&key, &c, &proof).unwrap(), Some((55, 9)));
        assert_eq!(open_output_proof(&other, &c, &proof).unwrap(), None);
        let c2 = commit(55, &random_scalar());
        assert_eq!(open_output_proof(&key, &c2, &proof).unwrap(), None);
    }

    #[test]
    fn ecdh_agrees_both_ways() {
        let a = random_scalar();
        let b = random_scalar();
        let ka = shared_key(&a, &public_key(&b), b"ctx").unwrap();
        let kb = shared_key(&b, &public_key(&a), b"ctx").unwrap();
        assert_eq!(*ka, *kb);
    }

    #[test]
    fn signature_hex_roundtrip_rejects_short_input() {
        assert!(Signature::from_hex("abcd").is_err());
        assert!(Commitment::from_hex("zz").is_err());
    }
}
