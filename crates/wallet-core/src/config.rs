use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::fees::FeeSchedule;
use crate::retry::RetryPolicy;

pub const DEFAULT_COINBASE_MATURITY: u64 = 1440;
pub const DEFAULT_MIN_PASSWORD_LEN: usize = 8;
pub const DEFAULT_RELAY_PORT: u16 = 443;
/// User name the node expects alongside `node_api_secret`.
pub const NODE_API_USER: &str = "mwcmain";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    #[default]
    Mainnet,
    #[serde(alias = "testnet")]
    Floonet,
}

impl ChainType {
    /// Leading byte of base58 addresses on this chain.
    pub fn address_version(self) -> u8 {
        match self {
            ChainType::Mainnet => 0x0d,
            ChainType::Floonet => 0x0f,
        }
    }

    pub fn from_address_version(version: u8) -> Option<Self> {
        match version {
            0x0d => Some(ChainType::Mainnet),
            0x0f => Some(ChainType::Floonet),
            _ => None,
        }
    }
}

/// Argon2id cost parameters used to seal the mnemonic at rest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(default)]
    pub chain: ChainType,
    #[serde(alias = "wallet_dir")]
    pub data_dir: PathBuf,
    #[serde(alias = "check_node_api_http_addr")]
    pub node_url: String,
    #[serde(default)]
    pub node_api_secret: Option<String>,
    #[serde(default)]
    pub fee: FeeSchedule,
    #[serde(default = "default_coinbase_maturity")]
    pub coinbase_maturity: u64,
    #[serde(default)]
    pub kdf: KdfParams,
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
    #[serde(default = "default_account")]
    pub account: String,
    /// Applied to node queries during sync.
    #[serde(default)]
    pub node_retry: RetryPolicy,
}

fn default_coinbase_maturity() -> u64 {
    DEFAULT_COINBASE_MATURITY
}

fn default_min_password_len() -> usize {
    DEFAULT_MIN_PASSWORD_LEN
}

fn default_account() -> String {
    "default".to_string()
}

impl WalletConfig {
    pub fn new(chain: ChainType, data_dir: impl Into<PathBuf>, node_url: &str) -> Self {
        Self {
            chain,
            data_dir: data_dir.into(),
            node_url: node_url.to_string(),
            node_api_secret: None,
            fee: FeeSchedule::default(),
            coinbase_maturity: DEFAULT_COINBASE_MATURITY,
            kdf: KdfParams::default(),
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
            account: default_account(),
            node_retry: RetryPolicy::default(),
        }
    }

    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| WalletError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(WalletError::InvalidConfig("data_dir is empty".into()));
        }
        if !(self.node_url.starts_with("http://") || self.node_url.starts_with("https://")) {
            return Err(WalletError::InvalidConfig(format!(
                "node_url must be http(s): {:?}",
                self.node_url
            )));
        }
        if self.account.is_empty() || self.account.contains('/') {
            return Err(WalletError::InvalidConfig(format!(
                "bad account name {:?}",
                self.account
            )));
        }
        if self.fee.base_fee == 0 {
            return Err(WalletError::InvalidConfig("fee.base_fee must be > 0".into()));
        }
        if self.kdf.memory_kib < 8 * self.kdf.parallelism.max(1) || self.kdf.iterations == 0 {
            return Err(WalletError::InvalidConfig("kdf parameters too small".into()));
        }
        self.node_retry
            .validate()
            .map_err(|e| WalletError::InvalidConfig(format!("node_retry: {e}")))?;
        Ok(())
    }

    /// Basic-auth pair for the node, when a secret is configured.
    pub fn node_auth(&self) -> Option<(String, String)> {
        self.node_api_secret
            .as_ref()
            .map(|secret| (NODE_API_USER.to_string(), secret.clone()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(alias = "mwcmqs_domain")]
    pub domain: String,
    #[serde(alias = "mwcmqs_port", default = "default_relay_port")]
    pub port: u16,
    /// Full base url; overrides `https://domain:port` when set.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub address_index: u32,
    #[serde(default = "default_poll_wait_secs")]
    pub poll_wait_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_relay_port() -> u16 {
    DEFAULT_RELAY_PORT
}

fn default_poll_wait_secs() -> u64 {
    10
}

impl RelayConfig {
    pub fn new(domain: &str, port: u16) -> Self {
        Self {
            domain: domain.to_string(),
            port,
            url: None,
            address_index: 0,
            poll_wait_secs: default_poll_wait_secs(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| WalletError::InvalidRelayConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(WalletError::InvalidRelayConfig(msg));
        if self.domain.is_empty() {
            return bad("domain is empty".into());
        }
        if !self
            .domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
            || self.domain.starts_with('.')
            || self.domain.ends_with('.')
        {
            return bad(format!("bad domain {:?}", self.domain));
        }
        if self.port == 0 {
            return bad("port must be non-zero".into());
        }
        if let Some(url) = &self.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return bad(format!("url must be http(s): {url:?}"));
            }
        }
        if self.poll_wait_secs > 300 {
            return bad("poll_wait_secs above 300".into());
        }
        self.retry
            .validate()
            .map_err(WalletError::InvalidRelayConfig)
    }

    pub fn base_url(&self) -> String {
        match &self.url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}:{}", self.domain, self.port),
        }
    }

    /// `domain` or `domain:port` as used in address suffixes.
    pub fn domain_suffix(&self) -> String {
        if self.port == DEFAULT_RELAY_PORT {
            self.domain.clone()
        } else {
            format!("{}:{}", self.domain, self.port)
        }
    }
}
