//! mw-node-rpc
//!
//! Minimal, blocking HTTP client for the node foreign API.
//! Endpoints used (JSON-RPC 2.0 over `POST /v2/foreign`):
//! - `get_tip`
//! - `get_block`        (by height)
//! - `push_transaction`
//!
//! Commitments, proofs and signatures travel as lowercase hex strings; this
//! crate does not interpret them.

use base64::{engine::general_purpose, Engine as _};
use log::debug;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const FOREIGN_API_PATH: &str = "/v2/foreign";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("url parse: {0}")]
    Url(#[from] url::ParseError),
    #[error("{method} returned HTTP {status}")]
    Status { method: String, status: u16 },
    #[error("rpc returned error: {0}")]
    Node(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RpcError {
    /// Whether a caller retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Http(err) => !err.is_decode() && !err.is_builder(),
            RpcError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct NodeRpc {
    base: Url,
    client: Client,
    auth_header: Option<HeaderValue>,
}

impl NodeRpc {
    /// Create a new client. `base` like "http://127.0.0.1:3413".
    /// Optional basic auth via (user, pass). If None, no Authorization header is sent.
    pub fn new(base: &str, auth: Option<(String, String)>) -> Result<Self, RpcError> {
        Self::with_timeout(base, auth, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base: &str,
        auth: Option<(String, String)>,
        timeout: Duration,
    ) -> Result<Self, RpcError> {
        let base = Url::parse(base)?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        let auth_header = match auth {
            Some((user, pass)) => {
                let token = format!("{user}:{pass}");
                let enc = general_purpose::STANDARD.encode(token);
                let header_value = HeaderValue::from_str(&format!("Basic {}", enc))
                    .map_err(|e| RpcError::Decode(format!("auth header encode: {e}")))?;
                Some(header_value)
            }
            None => None,
        };

        Ok(Self {
            base,
            client,
            auth_header,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(a) = &self.auth_header {
            h.insert(AUTHORIZATION, a.clone());
        }
        h
    }

    fn json_rpc<P, R>(&self, method: &str, params: &P) -> Result<R, RpcError>
    where
        P: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        self.call(method, params)?
            .ok_or_else(|| RpcError::Node(format!("{method} missing result")))
    }

    /// Raw call; `Ok(None)` when the node answers with a null result.
    fn call<P, R>(&self, method: &str, params: &P) -> Result<Option<R>, RpcError>
    where
        P: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        #[derive(Serialize)]
        struct Request<'a, T> {
            jsonrpc: &'a str,
            id: u32,
            method: &'a str,
            params: &'a T,
        }

        #[derive(Deserialize)]
        struct Envelope<T> {
            result: Option<T>,
            error: Option<RpcErrorDetail>,
        }

        #[derive(Deserialize)]
        struct RpcErrorDetail {
            code: i64,
            message: String,
        }

        let url = self.base.join(FOREIGN_API_PATH)?;
        let request = Request {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        debug!("node rpc {method} -> {url}");
        let resp = self
            .client
            .post(url)
            .headers(self.auth_headers())
            .json(&request)
            .send()?;
        if !resp.status().is_success() {
            return Err(RpcError::Status {
                method: method.to_string(),
                status: resp.status().as_u16(),
            });
        }
        let envelope: Envelope<R> = resp
            .json()
            .map_err(|e| RpcError::Decode(format!("{method} response: {e}")))?;
        if let Some(err) = envelope.error {
            return Err(RpcError::Node(format!(
                "{method} error code={} message={}",
                err.code, err.message
            )));
        }
        Ok(envelope.result)
    }

    /// JSON-RPC `get_tip`.
    pub fn get_tip(&self) -> Result<Tip, RpcError> {
        self.json_rpc("get_tip", &Vec::<()>::new())
    }

    /// Height of the node's current chain tip.
    pub fn get_height(&self) -> Result<u64, RpcError> {
        Ok(self.get_tip()?.height)
    }

    /// JSON-RPC `get_block` addressed by height.
    pub fn get_block(&self, height: u64) -> Result<BlockPrintable, RpcError> {
        let params = (Some(height), None::<String>, None::<String>);
        let block: BlockPrintable = self.json_rpc("get_block", &params)?;
        if block.header.height != height {
            return Err(RpcError::Decode(format!(
                "get_block asked for height {height}, node returned {}",
                block.header.height
            )));
        }
        Ok(block)
    }

    /// JSON-RPC `push_transaction`. `fluff` skips the dandelion stem phase.
    pub fn push_transaction(&self, tx: &Transaction, fluff: bool) -> Result<(), RpcError> {
        let params = (tx, fluff);
        let _: Option<serde_json::Value> = self.call("push_transaction", &params)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tip {
    pub height: u64,
    pub last_block_pushed: String,
    #[serde(default)]
    pub prev_block_to_last: String,
    #[serde(default)]
    pub total_difficulty: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: String,
    #[serde(default)]
    pub previous: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputType {
    Coinbase,
    Transaction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockOutput {
    pub commit: String,
    pub proof: String,
    pub output_type: OutputType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxKernel {
    pub excess: String,
    pub excess_sig: String,
    pub fee: u64,
    #[serde(default)]
    pub lock_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPrintable {
    pub header: BlockHeader,
    /// Commitments spent by this block.
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<BlockOutput>,
    #[serde(default)]
    pub kernels: Vec<TxKernel>,
}

/// Transaction body as accepted by `push_transaction`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub offset: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<BlockOutput>,
    pub kernels: Vec<TxKernel>,
}
