use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::config::{ChainType, KdfParams};
use crate::error::{Result, WalletError};

const SEALED_VERSION: u8 = 1;

/// The recovery phrase encrypted under the wallet password. This is the
/// only form in which key material reaches disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SealedSeed {
    pub version: u8,
    pub name: String,
    pub chain: ChainType,
    pub account: String,
    pub kdf: KdfParams,
    pub salt: [u8; 16],
    pub nonce: [u8; 12],
    pub ciphertext: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

fn derive_key(password: &str, salt: &[u8], kdf: &KdfParams) -> Result<Zeroizing<[u8; 32]>> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(32))
        .map_err(|e| WalletError::InvalidConfig(format!("kdf: {e}")))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; 32]);
    argon
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| WalletError::InvalidConfig(format!("kdf: {e}")))?;
    Ok(key)
}

impl SealedSeed {
    pub fn seal(
        phrase: &str,
        password: &str,
        name: &str,
        chain: ChainType,
        account: &str,
        kdf: KdfParams,
    ) -> Result<Self> {
        let mut salt = [0u8; 16];
        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);
        let key = derive_key(password, &salt, &kdf)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), phrase.as_bytes())
            .map_err(|_| WalletError::Storage("seed encryption failed".into()))?;
        Ok(Self {
            version: SEALED_VERSION,
            name: name.to_string(),
            chain,
            account: account.to_string(),
            kdf,
            salt,
            nonce,
            ciphertext,
            created_at: Utc::now(),
        })
    }

    pub fn open(&self, password: &str) -> Result<Zeroizing<String>> {
        if self.version != SEALED_VERSION {
            return Err(WalletError::CorruptedState(format!(
                "unknown sealed seed version {}",
                self.version
            )));
        }
        let key = derive_key(password, &self.salt, &self.kdf)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let plain = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_slice())
                .map_err(|_| WalletError::InvalidPassword)?,
        );
        let phrase = std::str::from_utf8(&plain)
            .map_err(|_| WalletError::CorruptedState("sealed seed is not utf-8".into()))?;
        Ok(Zeroizing::new(phrase.to_string()))
    }
}
