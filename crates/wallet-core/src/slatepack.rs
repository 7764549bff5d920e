//! Armored text encoding of slates for copy/paste and relay transport.
//!
//! ```text
//! BEGINSLATEPACK. <base58 in 15-char words>. ENDSLATEPACK.
//! ```
//! The base58 payload is `checksum4 || version || mode || sender ||
//! [recipient || nonce12] || body`. Mode 1 bodies are sealed with a key
//! agreed between the sender and recipient address keys.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::crypto::PublicKey;
use crate::error::{Result, WalletError};
use crate::slate::Slate;

const HEADER: &str = "BEGINSLATEPACK.";
const FOOTER: &str = "ENDSLATEPACK.";
const WORD_LEN: usize = 15;
const PACK_VERSION: u8 = 1;
const MODE_PLAIN: u8 = 0;
const MODE_ENCRYPTED: u8 = 1;
const CHECKSUM_LEN: usize = 4;
const NONCE_LEN: usize = 12;
const PLAIN_HEADER_LEN: usize = 2 + 32;
const ENCRYPTED_HEADER_LEN: usize = PLAIN_HEADER_LEN + 32 + NONCE_LEN;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slatepack {
    pub slate: Slate,
    pub sender: Option<PublicKey>,
    pub recipient: Option<PublicKey>,
}

impl Slatepack {
    pub fn is_encrypted(&self) -> bool {
        self.recipient.is_some()
    }
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let twice = Sha256::digest(Sha256::digest(payload));
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&twice[..CHECKSUM_LEN]);
    out
}

/// Key-derivation context shared by both ends.
pub(crate) fn exchange_info(sender: &PublicKey, recipient: &PublicKey) -> Vec<u8> {
    let mut info = b"mw-wallet/slatepack".to_vec();
    info.extend_from_slice(&sender.0);
    info.extend_from_slice(&recipient.0);
    info
}

fn armor(data: &[u8]) -> String {
    let b58 = bs58::encode(data).into_string();
    let words: Vec<&str> = b58
        .as_bytes()
        .chunks(WORD_LEN)
        .filter_map(|c| std::str::from_utf8(c).ok())
        .collect();
    format!("{HEADER} {}. {FOOTER}", words.join(" "))
}

fn dearmor(armored: &str) -> Result<Vec<u8>> {
    let bad = |msg: &str| WalletError::InvalidSlate(format!("slatepack: {msg}"));
    let body = armored
        .trim()
        .strip_prefix(HEADER)
        .ok_or_else(|| bad("missing header"))?
        .trim_end()
        .strip_suffix(FOOTER)
        .ok_or_else(|| bad("missing footer"))?
        .trim_end();
    let body = body.strip_suffix('.').ok_or_else(|| bad("missing terminator"))?;
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let data = bs58::decode(compact)
        .into_vec()
        .map_err(|e| bad(&format!("base58: {e}")))?;
    if data.len() < CHECKSUM_LEN + PLAIN_HEADER_LEN {
        return Err(bad("too short"));
    }
    let (sum, payload) = data.split_at(CHECKSUM_LEN);
    if checksum(payload) != sum {
        return Err(bad("checksum mismatch"));
    }
    Ok(payload.to_vec())
}

/// Encode with an optional sender key and optional encryption to
/// `(recipient, shared_key)`.
pub(crate) fn encode_with(
    slate: &Slate,
    sender: Option<PublicKey>,
    encrypt_to: Option<(PublicKey, Zeroizing<[u8; 32]>)>,
) -> Result<String> {
    let json = slate.to_json()?;
    let mut payload = vec![PACK_VERSION];
    match encrypt_to {
        None => {
            payload.push(MODE_PLAIN);
            payload.extend_from_slice(&sender.unwrap_or(PublicKey([0; 32])).0);
            payload.extend_from_slice(json.as_bytes());
        }
        Some((recipient, key)) => {
            let sender = sender.ok_or_else(|| {
                WalletError::InvalidArgument("encrypted slatepack needs a sender key".into())
            })?;
            let mut nonce = [0u8; NONCE_LEN];
            OsRng.fill_bytes(&mut nonce);
            payload.push(MODE_ENCRYPTED);
            payload.extend_from_slice(&sender.0);
            payload.extend_from_slice(&recipient.0);
            payload.extend_from_slice(&nonce);
            let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
            let sealed = cipher
                .encrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: json.as_bytes(),
                        aad: &payload,
                    },
                )
                .map_err(|_| WalletError::SigningError("slatepack encryption failed".into()))?;
            payload.extend_from_slice(&sealed);
        }
    }
    let mut data = checksum(&payload).to_vec();
    data.extend_from_slice(&payload);
    Ok(armor(&data))
}

type KeyLookup<'a> = &'a dyn Fn(&PublicKey, &PublicKey) -> Result<Zeroizing<[u8; 32]>>;

/// Decode; `key_for(sender, recipient)` supplies the shared key for
/// encrypted packs.
pub(crate) fn decode_with(armored: &str, key_for: Option<KeyLookup<'_>>) -> Result<Slatepack> {
    let payload = dearmor(armored)?;
    if payload[0] != PACK_VERSION {
        return Err(WalletError::InvalidSlate(format!(
            "unsupported slatepack version {}",
            payload[0]
        )));
    }
    let mut sender_bytes = [0u8; 32];
    sender_bytes.copy_from_slice(&payload[2..PLAIN_HEADER_LEN]);
    let sender = (sender_bytes != [0u8; 32]).then_some(PublicKey(sender_bytes));

    match payload[1] {
        MODE_PLAIN => {
            let json = std::str::from_utf8(&payload[PLAIN_HEADER_LEN..])
                .map_err(|_| WalletError::InvalidSlate("slatepack body is not utf-8".into()))?;
            Ok(Slatepack {
                slate: Slate::from_json(json)?,
                sender,
                recipient: None,
            })
        }
        MODE_ENCRYPTED => {
            if payload.len() < ENCRYPTED_HEADER_LEN {
                return Err(WalletError::InvalidSlate("slatepack: too short".into()));
            }
            let sender = sender
                .ok_or_else(|| WalletError::InvalidSlate("encrypted slatepack without sender".into()))?;
            let mut recipient = [0u8; 32];
            recipient.copy_from_slice(&payload[PLAIN_HEADER_LEN..PLAIN_HEADER_LEN + 32]);
            let recipient = PublicKey(recipient);
            let key_for = key_for.ok_or_else(|| {
                WalletError::InvalidSlate("slatepack is encrypted; recipient key required".into())
            })?;
            let key = key_for(&sender, &recipient)?;
            let (header, sealed) = payload.split_at(ENCRYPTED_HEADER_LEN);
            let nonce = &header[PLAIN_HEADER_LEN + 32..];
            let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
            let plain = cipher
                .decrypt(
                    Nonce::from_slice(nonce),
                    Payload {
                        msg: sealed,
                        aad: header,
                    },
                )
                .map_err(|_| WalletError::InvalidSlate("cannot decrypt slatepack".into()))?;
            let json = String::from_utf8(plain)
                .map_err(|_| WalletError::InvalidSlate("slatepack body is not utf-8".into()))?;
            Ok(Slatepack {
                slate: Slate::from_json(&json)?,
                sender: Some(sender),
                recipient: Some(recipient),
            })
        }
        other => Err(WalletError::InvalidSlate(format!(
            "unknown slatepack mode {other}"
        ))),
    }
}

/// Plain (unencrypted, anonymous) slatepack.
pub fn encode(slate: &Slate) -> Result<String> {
    encode_with(slate, None, None)
}

/// Decode a plain slatepack. Encrypted packs need the wallet, see
/// `WalletSession::decode_slatepack`.
pub fn decode(armored: &str) -> Result<Slatepack> {
    decode_with(armored, None)
}
