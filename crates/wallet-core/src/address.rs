use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::config::ChainType;
use crate::crypto::{self, PublicKey};
use crate::error::{Result, WalletError};

const CHECKSUM_LEN: usize = 4;
const PAYLOAD_LEN: usize = 1 + 32;
const SCHEME: &str = "mwcmqs://";

/// Wallet payment address: a derived public key, optionally routed through
/// a relay domain.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    pub chain: ChainType,
    pub public_key: PublicKey,
    /// `domain` or `domain:port`.
    pub relay: Option<String>,
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&second[..CHECKSUM_LEN]);
    out
}

fn validate_relay(relay: &str) -> Result<()> {
    let bad = || WalletError::InvalidAddress(format!("bad relay suffix {relay:?}"));
    let (domain, port) = match relay.rsplit_once(':') {
        Some((d, p)) => (d, Some(p)),
        None => (relay, None),
    };
    if domain.is_empty()
        || !domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(bad());
    }
    if let Some(port) = port {
        match port.parse::<u16>() {
            Ok(p) if p > 0 => {}
            _ => return Err(bad()),
        }
    }
    Ok(())
}

impl Address {
    pub fn new(chain: ChainType, public_key: PublicKey) -> Self {
        Self {
            chain,
            public_key,
            relay: None,
        }
    }

    pub fn with_relay(mut self, relay: impl Into<String>) -> Self {
        self.relay = Some(relay.into());
        self
    }

    /// The base58 part, without any relay suffix.
    pub fn base58(&self) -> String {
        let mut payload = Vec::with_capacity(PAYLOAD_LEN + CHECKSUM_LEN);
        payload.push(self.chain.address_version());
        payload.extend_from_slice(&self.public_key.0);
        let sum = checksum(&payload);
        payload.extend_from_slice(&sum);
        bs58::encode(payload).into_string()
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix(SCHEME).unwrap_or(s);
        let (body, relay) = match s.split_once('@') {
            Some((b, r)) => {
                validate_relay(r)?;
                (b, Some(r.to_string()))
            }
            None => (s, None),
        };
        let bytes = bs58::decode(body)
            .into_vec()
            .map_err(|e| WalletError::InvalidAddress(format!("base58: {e}")))?;
        if bytes.len() != PAYLOAD_LEN + CHECKSUM_LEN {
            return Err(WalletError::InvalidAddress(format!(
                "expected {} bytes, got {}",
                PAYLOAD_LEN + CHECKSUM_LEN,
                bytes.len()
            )));
        }
        let (payload, sum) = bytes.split_at(PAYLOAD_LEN);
        if checksum(payload) != sum {
            return Err(WalletError::InvalidAddress("checksum mismatch".into()));
        }
        let chain = ChainType::from_address_version(payload[0]).ok_or_else(|| {
            WalletError::InvalidAddress(format!("unknown version byte {:#04x}", payload[0]))
        })?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&payload[1..]);
        if !crypto::is_valid_point(&key) {
            return Err(WalletError::InvalidAddress("key is not a valid point".into()));
        }
        Ok(Self {
            chain,
            public_key: PublicKey(key),
            relay,
        })
    }

    /// Parse and additionally require the given chain.
    pub fn parse_for(s: &str, chain: ChainType) -> Result<Self> {
        let addr = Self::parse(s)?;
        if addr.chain != chain {
            return Err(WalletError::InvalidAddress(format!(
                "address is for {:?}, wallet is on {chain:?}",
                addr.chain
            )));
        }
        Ok(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relay {
            Some(relay) => write!(f, "{}@{relay}", self.base58()),
            None => f.write_str(&self.base58()),
        }
    }
}

impl FromStr for Address {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;

    fn sample() -> Address {
        let key = PublicKey(RISTRETTO_BASEPOINT_POINT.compress().to_bytes());
        Address::new(ChainType::Mainnet, key)
    }

    #[test]
    fn roundtrips_with_and_without_relay() {
        let addr = sample();
        assert_eq!(Address::parse(&addr.to_string()).unwrap(), addr);

        let routed = sample().with_relay("mqs.example.org:8443");
        let text = routed.to_string();
        assert!(text.ends_with("@mqs.example.org:8443"));
        assert_eq!(Address::parse(&text).unwrap(), routed);
        assert_eq!(
            Address::parse(&format!("mwcmqs://{text}")).unwrap(),
            routed
        );
    }

    #[test]
    fn rejects_corruption() {
        let text = sample().base58();
        let mut chars: Vec<char> = text.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '2' { '3' } else { '2' };
        let corrupted: String = chars.into_iter().collect();
        assert!(matches!(
            Address::parse(&corrupted),
            Err(WalletError::InvalidAddress(_))
        ));
        assert!(Address::parse("0OIl").is_err());
        assert!(Address::parse("").is_err());
        assert!(Address::parse(&format!("{text}@bad domain")).is_err());
        assert!(Address::parse(&format!("{text}@relay:0")).is_err());
    }

    #[test]
    fn chain_is_encoded_in_version_byte() {
        let mut floo = sample();
        floo.chain = ChainType::Floonet;
        assert_ne!(floo.base58(), sample().base58());
        assert!(Address::parse_for(&floo.to_string(), ChainType::Mainnet).is_err());
        Address::parse_for(&floo.to_string(), ChainType::Floonet).unwrap();
    }
}
